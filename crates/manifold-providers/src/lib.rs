//! Provider adapters — the pluggable boundary between the router and
//! upstream LLM APIs. Each adapter turns a unified request into one
//! provider's wire format, performs the HTTP call with a pool credential,
//! and hands the response (or classified error) back to the executor.

pub mod adapter;
pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod registry;
pub mod stream;

pub use adapter::{
    AdapterError, ProviderAdapter, RequestKind, ResponseBody, UpstreamRequest, UpstreamResponse,
};
pub use registry::AdapterRegistry;
pub use stream::StreamDelta;
