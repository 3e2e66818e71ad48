#![allow(missing_docs, clippy::expect_used)]

use axum::http::StatusCode;
use insta::assert_snapshot;
use rstest::rstest;
use tracing::info;

use standalone_client::ApiErrorResponse;

mod common;
pub use self::common::*;

async fn error_message(response: reqwest::Response) -> anyhow::Result<String> {
    let body = response.text().await?;
    let error: ApiErrorResponse = serde_json::from_str(&body)?;
    Ok(error.message)
}

#[rstest]
#[tokio::test]
async fn should_call_protected_resource(#[future] app: TestApp) -> anyhow::Result<()> {
    let app = app.await;

    let response = app.get("/apis/v1/test").await?;

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await?, "Success");
    assert_eq!(app.upstream.authorizations(), ["Bearer token-1"]);

    app.get("/apis/v1/test").await?;
    assert_eq!(app.upstream.token_hits(), 1);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn should_answer_bad_gateway_on_rejected_credentials(
    #[future] app: TestApp,
) -> anyhow::Result<()> {
    let app = app.await;
    app.upstream
        .fail_token_requests([(StatusCode::UNAUTHORIZED, r#"{"error":"invalid_client"}"#)]);

    let response = app.get("/apis/v1/test").await?;

    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    let message = error_message(response).await?;
    info!(%message, "error response");
    assert_snapshot!(message, @r#"Authorization failed: Authorization server returned 401: {"error":"invalid_client"}"#);
    assert_eq!(app.upstream.token_hits(), 1);
    assert_eq!(app.upstream.resource_hits(), 0);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn should_retry_unavailable_authorization_server(
    #[future] app: TestApp,
) -> anyhow::Result<()> {
    let app = app.await;
    app.upstream.fail_token_requests([
        (StatusCode::SERVICE_UNAVAILABLE, "maintenance"),
        (StatusCode::TOO_MANY_REQUESTS, "slow down"),
    ]);

    let response = app.get("/apis/v1/test").await?;

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(app.upstream.token_hits(), 3);
    assert_eq!(app.upstream.authorizations(), ["Bearer token-3"]);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn should_answer_bad_gateway_on_resource_failure(
    #[future] app: TestApp,
) -> anyhow::Result<()> {
    let app = app.await;
    app.upstream.resource_status(StatusCode::INTERNAL_SERVER_ERROR);

    let response = app.get("/apis/v1/test").await?;

    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    assert_snapshot!(error_message(response).await?, @"Resource server answered 500");
    Ok(())
}

#[rstest]
#[tokio::test]
async fn should_refresh_token_after_resource_rejection(
    #[future] app: TestApp,
) -> anyhow::Result<()> {
    let app = app.await;
    app.upstream.resource_status(StatusCode::UNAUTHORIZED);

    let response = app.get("/apis/v1/test").await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);

    app.upstream.resource_status(StatusCode::OK);
    let response = app.get("/apis/v1/test").await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    assert_eq!(
        app.upstream.authorizations(),
        ["Bearer token-1", "Bearer token-2"]
    );
    Ok(())
}
