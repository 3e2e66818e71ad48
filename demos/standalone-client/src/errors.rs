use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use clientcred_core::ResourceRequestError;
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Debug, derive_more::Error, derive_more::From, derive_more::Display)]
pub(super) enum AppError {
    #[display("{_0}")]
    Resource(ResourceRequestError),

    #[display("Resource server answered {status}")]
    #[from(skip)]
    UnexpectedStatus { status: u16 },
}

/// API error response returned for all error cases
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Human-readable error message
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            Self::Resource(ResourceRequestError::Authorization(error))
                if error.is_configuration() =>
            {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Resource(
                ResourceRequestError::InvalidUrl(_) | ResourceRequestError::OutsideBase { .. },
            ) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Resource(_) | Self::UnexpectedStatus { .. } => StatusCode::BAD_GATEWAY,
        };
        error!(%status, error = %self, "fail to call protected resource");
        let message = self.to_string();

        let error_response = ApiErrorResponse { message };

        (status, Json(error_response)).into_response()
    }
}
