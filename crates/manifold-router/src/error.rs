use thiserror::Error;

/// Failure of one profile's executor run. The router consumes these;
/// only `RequestContent` ever reaches the client directly.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// Every credential for the provider was tried (or the pool is empty).
    #[error("provider '{provider}' exhausted all credentials")]
    ProviderExhausted { provider: String },

    /// The upstream rejected the request itself — not a credential
    /// problem, so retrying with another key would be pointless.
    #[error("upstream rejected the request content ({status}): {body}")]
    RequestContent { status: u16, body: String },

    /// The provider answered 2xx but the body did not parse.
    #[error("provider '{provider}' returned a malformed response: {detail}")]
    Malformed { provider: String, detail: String },

    /// The profile routed an operation the adapter cannot serve.
    #[error("provider '{provider}' does not support this operation")]
    Unsupported { provider: String },
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("unknown model alias: {alias}")]
    AliasNotFound { alias: String },

    /// Every profile in the priority chain failed.
    #[error("no provider available for this request")]
    NoProviderAvailable,

    #[error("upstream rejected the request content ({status}): {body}")]
    RequestContent { status: u16, body: String },
}

impl From<RouteError> for manifold_core::GatewayError {
    fn from(e: RouteError) -> Self {
        match e {
            RouteError::AliasNotFound { alias } => {
                manifold_core::GatewayError::AliasNotFound { alias }
            }
            RouteError::NoProviderAvailable => manifold_core::GatewayError::NoProviderAvailable,
            RouteError::RequestContent { status, body } => {
                manifold_core::GatewayError::RequestContentInvalid { status, body }
            }
        }
    }
}
