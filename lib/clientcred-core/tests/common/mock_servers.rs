#![allow(
    clippy::missing_errors_doc,
    dead_code,
    missing_docs,
    clippy::expect_used
)]
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use tracing::info;
use url::Url;

use clientcred_core::{ClientAuthenticationMethod, ClientRegistration};

pub const TOKEN_PATH: &str = "/oauth2/token";

/// Token request as received by the mock authorization server.
#[derive(Debug, Clone)]
pub struct CapturedTokenRequest {
    pub headers: HeaderMap,
    pub form: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct AuthState {
    hits: AtomicUsize,
    reply: Mutex<Option<(StatusCode, String)>>,
    expires_in: Mutex<Option<u64>>,
    delay: Mutex<Duration>,
    requests: Mutex<Vec<CapturedTokenRequest>>,
}

/// Authorization server issuing `token-1`, `token-2`, ... unless told otherwise.
#[derive(Debug, Clone)]
pub struct MockAuthServer {
    base: Url,
    state: Arc<AuthState>,
}

impl MockAuthServer {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(AuthState {
            expires_in: Mutex::new(Some(3600)),
            ..AuthState::default()
        });
        let router = Router::new()
            .route(TOKEN_PATH, post(token))
            .with_state(Arc::clone(&state));
        let base = serve(router).await?;
        Ok(Self { base, state })
    }

    pub fn token_uri(&self) -> String {
        self.base.join(TOKEN_PATH).expect("valid token path").to_string()
    }

    pub fn registration(&self, method: ClientAuthenticationMethod) -> ClientRegistration {
        ClientRegistration::builder("test", "test-client", "test-secret", self.token_uri())
            .expect("valid token uri")
            .add_scopes(["read", "write"])
            .with_authentication_method(method)
            .build()
            .expect("valid registration")
    }

    /// Answers every request with this status and body.
    pub fn reply_with(&self, status: StatusCode, body: impl Into<String>) {
        *self.state.reply.lock().expect("reply lock") = Some((status, body.into()));
    }

    /// Sets `expires_in` of issued tokens, `None` to leave it out.
    pub fn expires_in(&self, expires_in: Option<u64>) {
        *self.state.expires_in.lock().expect("expires_in lock") = expires_in;
    }

    /// Waits before answering.
    pub fn delay(&self, delay: Duration) {
        *self.state.delay.lock().expect("delay lock") = delay;
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CapturedTokenRequest> {
        self.state.requests.lock().expect("requests lock").clone()
    }
}

async fn token(
    State(state): State<Arc<AuthState>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst) + 1;
    let form = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect::<HashMap<_, _>>();
    info!(hit, ?form, "mock authorization server received token request");
    state
        .requests
        .lock()
        .expect("requests lock")
        .push(CapturedTokenRequest { headers, form });

    let delay = *state.delay.lock().expect("delay lock");
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let reply = state.reply.lock().expect("reply lock").clone();
    let (status, body) = reply.unwrap_or_else(|| {
        let mut body = serde_json::json!({
            "access_token": format!("token-{hit}"),
            "token_type": "Bearer",
            "scope": "read write",
        });
        if let Some(expires_in) = *state.expires_in.lock().expect("expires_in lock") {
            body["expires_in"] = expires_in.into();
        }
        (StatusCode::OK, body.to_string())
    });

    (status, [(CONTENT_TYPE, "application/json")], body)
}

#[derive(Debug, Default)]
struct ResourceState {
    hits: AtomicUsize,
    rejected_tokens: Mutex<Vec<String>>,
    authorizations: Mutex<Vec<String>>,
}

/// Resource server exposing `GET /test`, rejecting tokens on demand with `401`.
#[derive(Debug, Clone)]
pub struct MockResourceServer {
    base: Url,
    state: Arc<ResourceState>,
}

impl MockResourceServer {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(ResourceState::default());
        let router = Router::new()
            .route("/test", get(resource))
            .with_state(Arc::clone(&state));
        let base = serve(router).await?;
        Ok(Self { base, state })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Answers `401` to requests carrying this access token.
    pub fn reject_token(&self, token: &str) {
        self.state
            .rejected_tokens
            .lock()
            .expect("rejected lock")
            .push(token.to_string());
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// `Authorization` headers received so far.
    pub fn authorizations(&self) -> Vec<String> {
        self.state
            .authorizations
            .lock()
            .expect("authorizations lock")
            .clone()
    }
}

async fn resource(
    State(state): State<Arc<ResourceState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state
        .authorizations
        .lock()
        .expect("authorizations lock")
        .push(authorization.clone());

    let Some(token) = authorization.strip_prefix("Bearer ") else {
        return (StatusCode::UNAUTHORIZED, "missing bearer token".to_string());
    };
    let rejected = state
        .rejected_tokens
        .lock()
        .expect("rejected lock")
        .iter()
        .any(|rejected| rejected == token);
    if rejected {
        return (StatusCode::UNAUTHORIZED, "invalid_token".to_string());
    }
    (StatusCode::OK, format!("resource for {token}"))
}

async fn serve(router: Router) -> anyhow::Result<Url> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind mock server")?;
    let addr = listener.local_addr().context("mock server address")?;
    info!(%addr, "launching mock server");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("mock server running");
    });
    Url::parse(&format!("http://{addr}")).context("mock server url")
}
