//! Alias routing and credential rotation.
//!
//! The executor runs one request against one provider profile, rotating
//! through the credential pool and classifying upstream failures. The
//! router resolves a client alias to its priority chain and drives the
//! executor across profiles until one succeeds.

pub mod error;
pub mod executor;
pub mod router;

pub use error::{ExecuteError, RouteError};
pub use executor::KeyRotationExecutor;
pub use router::{RouteRequest, RoutedResponse, Router};
