//! Content-addressed response cache, gated per model rule.
//!
//! The fingerprint is SHA-256 over a canonical (recursively key-sorted)
//! JSON encoding of the internal model name plus the request fields the
//! rule selects, so identical requests hash identically regardless of
//! field insertion order.

pub mod fingerprint;
pub mod store;

pub use fingerprint::request_fingerprint;
pub use store::ResponseCache;
