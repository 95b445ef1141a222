//! Self-healing credential pool for upstream provider API keys.
//!
//! Every key lives in exactly one of three buckets per provider:
//! available (FIFO rotation), quarantined (time-boxed after a transient
//! failure), or retired (permanently dead). The executor drives the
//! transitions; a background sweep returns expired quarantine entries
//! to rotation.

pub mod error;
pub mod loader;
pub mod pool;
pub mod sweep;

pub use error::KeysError;
pub use pool::{Credential, KeyPool, ProviderCounts};
