#![allow(missing_docs)]
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use clientcred_core::ClientConfig;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

mod errors;
mod routes;
mod state;

pub use self::errors::ApiErrorResponse;
pub use self::state::AppState;

use self::routes::app_router;

/// Upper bound for one incoming request, retries included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Launch the server
///
/// # Errors
///
/// fail if the socket cannot be created (e.g. port already used)
/// fail if the server cannot be launch
pub async fn run(addr: SocketAddr, config: ClientConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("opening {addr}"))?;
    info!("Using address {addr}");

    launch(listener, config).await
}

/// Launch the server
///
/// # Errors
///
/// fail if the configuration cannot build the OAuth2 client
/// fail if the server cannot be launch
pub async fn launch(listener: tokio::net::TcpListener, config: ClientConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&config).context("create state")?;
    let app = with_middlewares(app_router()).with_state(state);

    axum::serve(listener, app.into_make_service())
        .await
        .context("starting server")?;

    Ok(())
}

/// Middlewares applied to every route, innermost first.
fn with_middlewares(router: Router<AppState>) -> Router<AppState> {
    router
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}
