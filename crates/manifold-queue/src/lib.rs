//! Durable, at-least-once FIFO between the HTTP entry point and the
//! reasoning workers. Tasks persist in SQLite; a claim marks a row
//! without removing it, and the worker acknowledges (deletes) only after
//! publishing a terminal event. Stale claims return to pending.

pub mod db;
pub mod error;
pub mod queue;
pub mod types;

pub use error::QueueError;
pub use queue::{ClaimedTask, TaskQueue};
pub use types::SessionTask;
