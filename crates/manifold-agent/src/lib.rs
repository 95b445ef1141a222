//! The cognitive-reasoning engine.
//!
//! A pool of workers drains the task queue. Each worker owns one session
//! end-to-end: it builds the system prompt from the configured reasoning
//! pattern, streams LLM output through the tag parser, calls tools on the
//! tool gateway, and publishes every step to the session's event channel.

pub mod engine;
pub mod parser;
pub mod prompt;
pub mod scratchpad;
pub mod toolclient;

pub use engine::{run_session, spawn_workers, EngineContext, LlmStream};
pub use parser::{ParseEvent, TagStreamParser};
pub use prompt::{build_system_prompt, PatternLibrary, PromptSources};
pub use scratchpad::{parse_action, Scratchpad, ScratchpadEntry, ToolAction};
pub use toolclient::{ToolGatewayClient, ToolInvoker};
