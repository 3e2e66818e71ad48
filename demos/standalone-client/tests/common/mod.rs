#![allow(
    clippy::missing_errors_doc,
    dead_code,
    missing_docs,
    clippy::expect_used
)]
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::Router;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use rstest::fixture;
use tracing::info;
use url::Url;

use clientcred_core::ClientConfig;
use standalone_client::launch;

pub fn init_tracing() {
    // should be run once, fail otherwise, we skip that error
    let _ = tracing_subscriber::fmt()
        .pretty()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    info!("Tracing initialized");
}

#[derive(Debug, Default)]
struct UpstreamState {
    token_hits: AtomicUsize,
    token_failures: Mutex<VecDeque<(StatusCode, String)>>,
    resource_hits: AtomicUsize,
    resource_status: AtomicU16,
    authorizations: Mutex<Vec<String>>,
}

/// Authorization server and resource server the demo talks to.
#[derive(Debug, Clone)]
pub struct Upstream {
    base: Url,
    state: Arc<UpstreamState>,
}

impl Upstream {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(UpstreamState {
            resource_status: AtomicU16::new(200),
            ..UpstreamState::default()
        });
        let router = Router::new()
            .route("/oauth2/token", post(token))
            .route("/resource/test", get(resource))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind upstream")?;
        let addr = listener.local_addr().context("upstream address")?;
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("upstream running");
        });

        let base = Url::parse(&format!("http://{addr}")).context("upstream url")?;
        Ok(Self { base, state })
    }

    pub fn config(&self) -> anyhow::Result<ClientConfig> {
        let yaml = format!(
            r"
registrations:
  test:
    token-uri: {base}oauth2/token
    client-id: test-client
    client-secret: test-secret
    scopes: [read]
token-endpoint:
  timeout: 1s
resource:
  base: {base}resource
  registration-id: test
",
            base = self.base
        );
        ClientConfig::from_yaml(&yaml).context("upstream configuration")
    }

    /// Fails the next token requests with these answers, in order.
    pub fn fail_token_requests(
        &self,
        failures: impl IntoIterator<Item = (StatusCode, &'static str)>,
    ) {
        self.state
            .token_failures
            .lock()
            .expect("failures lock")
            .extend(
                failures
                    .into_iter()
                    .map(|(status, body)| (status, body.to_string())),
            );
    }

    pub fn resource_status(&self, status: StatusCode) {
        self.state
            .resource_status
            .store(status.as_u16(), Ordering::SeqCst);
    }

    pub fn token_hits(&self) -> usize {
        self.state.token_hits.load(Ordering::SeqCst)
    }

    pub fn resource_hits(&self) -> usize {
        self.state.resource_hits.load(Ordering::SeqCst)
    }

    pub fn authorizations(&self) -> Vec<String> {
        self.state
            .authorizations
            .lock()
            .expect("authorizations lock")
            .clone()
    }
}

async fn token(State(state): State<Arc<UpstreamState>>) -> (StatusCode, String) {
    let hit = state.token_hits.fetch_add(1, Ordering::SeqCst) + 1;
    let failure = state.token_failures.lock().expect("failures lock").pop_front();
    if let Some(failure) = failure {
        return failure;
    }
    let body = serde_json::json!({
        "access_token": format!("token-{hit}"),
        "token_type": "Bearer",
        "expires_in": 3600,
    });
    (StatusCode::OK, body.to_string())
}

async fn resource(
    State(state): State<Arc<UpstreamState>>,
    headers: HeaderMap,
) -> (StatusCode, String) {
    state.resource_hits.fetch_add(1, Ordering::SeqCst);
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state
        .authorizations
        .lock()
        .expect("authorizations lock")
        .push(authorization);

    let status = StatusCode::from_u16(state.resource_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, "Success".to_string())
}

/// The demo application bound to a random port.
#[derive(Debug)]
pub struct TestApp {
    pub base: Url,
    pub upstream: Upstream,
    client: reqwest::Client,
}

impl TestApp {
    pub async fn start() -> anyhow::Result<Self> {
        let upstream = Upstream::start().await?;
        let config = upstream.config()?;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind test app")?;
        let addr = listener.local_addr().context("test app address")?;
        info!(%addr, "launching standalone client");
        tokio::spawn(async move {
            launch(listener, config).await.expect("server launched");
        });

        let base = Url::parse(&format!("http://{addr}")).context("test app url")?;
        Ok(Self {
            base,
            upstream,
            client: reqwest::Client::new(),
        })
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<reqwest::Response> {
        let url = self.base.join(path).context("test app path")?;
        self.client.get(url).send().await.context("calling test app")
    }
}

#[fixture]
pub async fn app() -> TestApp {
    init_tracing();
    match TestApp::start().await {
        Ok(app) => app,
        Err(error) => {
            panic!("fail to start test app: {error:?}");
        }
    }
}
