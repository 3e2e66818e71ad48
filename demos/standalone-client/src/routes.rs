use axum::Router;
use axum::extract::State;
use axum::routing::get;
use tracing::info;

use crate::AppState;
use crate::errors::AppError;

/// The application router
pub fn app_router() -> Router<AppState> {
    Router::new()
        .route("/apis/v1/test", get(test_resource))
        .route("/health", get(|| async move { "OK" }))
}

async fn test_resource(State(state): State<AppState>) -> Result<String, AppError> {
    let response = state.call_resource("/test").await?;

    let status = response.status();
    if !status.is_success() {
        return Err(AppError::UnexpectedStatus {
            status: status.as_u16(),
        });
    }

    let body = response
        .text()
        .await
        .map_err(clientcred_core::ResourceRequestError::from)?;
    info!(%status, "protected resource answered");
    Ok(body)
}
