//! Session-scoped pub/sub and the SSE bridge.
//!
//! Each reasoning session gets one single-producer, single-consumer
//! channel. The channel is non-retentive: publishes with no subscriber
//! are dropped, which is why the stream side performs a `worker_ack`
//! handshake before any frame is written.

pub mod bus;
pub mod events;
pub mod sse;

pub use bus::{EventBus, SessionSubscription};
pub use events::{EventType, SessionEvent};
pub use sse::{await_worker_ack, frame_stream, HandshakeTimeout};

/// How long the SSE side waits for the worker's acknowledgment.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;
