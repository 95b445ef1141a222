use serde::{Deserialize, Serialize};

/// The closed set of event kinds a reasoning session can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "worker_ack")]
    WorkerAck,
    AgentThoughtStream,
    AgentThoughtEnd,
    AgentToolCallStart,
    AgentToolCallEnd,
    AgentObservation,
    FinalAnswerStream,
    FinalAnswerStreamEnd,
    #[serde(rename = "error")]
    Error,
}

impl EventType {
    /// True for the two kinds that end a session's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::FinalAnswerStreamEnd | EventType::Error)
    }
}

/// One event on a session channel; serialized as-is onto the SSE wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

impl SessionEvent {
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            payload,
        }
    }

    pub fn worker_ack(session_id: &str) -> Self {
        Self::new(
            EventType::WorkerAck,
            serde_json::json!({ "session_id": session_id }),
        )
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self::new(
            EventType::Error,
            serde_json::json!({ "code": code, "message": message }),
        )
    }
}
