use axum::{http::StatusCode, response::IntoResponse, Json};
use manifold_core::GatewayError;
use manifold_router::RouteError;

/// JSON error envelope for the client and admin APIs.
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        let status = match &e {
            GatewayError::AliasNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::NoProviderAvailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::RequestContentInvalid { .. } => StatusCode::BAD_REQUEST,
            GatewayError::WorkerTimeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Config(_) | GatewayError::UnknownPattern { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl From<RouteError> for ApiError {
    fn from(e: RouteError) -> Self {
        GatewayError::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(serde_json::json!({
                "error": { "code": self.code, "message": self.message }
            })),
        )
            .into_response()
    }
}
