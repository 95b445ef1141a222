//! Tool gateway — an HTTP-addressable registry of callable tools.
//!
//! Tools declare their own descriptors (name, summary, parameter schema);
//! the reasoning engine fetches the descriptor array at prompt-build time
//! and invokes tools with `POST /tools/{name}`. Per-tool secrets live in
//! this process's environment and never travel back to the gateway.

pub mod registry;
pub mod server;
pub mod tools;

pub use registry::{GatewayTool, ToolDescriptor, ToolParam, ToolRegistry};
pub use server::build_router;
