use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown model alias: {alias}")]
    AliasNotFound { alias: String },

    #[error("No provider available for this request")]
    NoProviderAvailable,

    #[error("Upstream rejected the request content ({status}): {body}")]
    RequestContentInvalid { status: u16, body: String },

    #[error("No worker acknowledged the session in time")]
    WorkerTimeout,

    #[error("Unknown reasoning pattern: {name}")]
    UnknownPattern { name: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Short error code string sent to clients in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "CONFIG_ERROR",
            GatewayError::AliasNotFound { .. } => "ALIAS_NOT_FOUND",
            GatewayError::NoProviderAvailable => "NO_PROVIDER_AVAILABLE",
            GatewayError::RequestContentInvalid { .. } => "REQUEST_CONTENT_INVALID",
            GatewayError::WorkerTimeout => "WORKER_TIMEOUT",
            GatewayError::UnknownPattern { .. } => "UNKNOWN_PATTERN",
            GatewayError::Serialization(_) => "SERIALIZATION_ERROR",
            GatewayError::Io(_) => "IO_ERROR",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
