//! Token endpoint client for the client-credentials grant.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use headers::{Authorization, HeaderMapExt};
use http::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use tracing::{debug, info};
use url::form_urlencoded;

use crate::clock::{Clock, SystemClock};
use crate::error::OAuth2Error;
use crate::registration::{ClientAuthenticationMethod, ClientRegistration};
use crate::token::{AccessToken, TokenErrorResponse, TokenResponse};

/// Default network timeout for a token request (5 seconds).
pub const DEFAULT_TOKEN_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(5);

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

/// Exchanges client credentials for an access token.
///
/// Implementations must not retry: one call is one exchange, and the retry policy
/// belongs to the caller.
pub trait TokenEndpoint: Send + Sync + 'static {
    /// Requests a new access token for this registration.
    fn fetch_token(
        &self,
        registration: &ClientRegistration,
    ) -> impl Future<Output = Result<AccessToken, OAuth2Error>> + Send;
}

/// [`TokenEndpoint`] over HTTP, using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl HttpTokenEndpoint {
    /// Creates an endpoint client with redirects disabled and the default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`OAuth2Error::ConfigurationError`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, OAuth2Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| OAuth2Error::configuration(format!("cannot build HTTP client: {err}")))?;
        Ok(Self::with_client(client))
    }

    /// Creates an endpoint client on top of an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TOKEN_ENDPOINT_TIMEOUT,
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the network timeout of each token request.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the clock used to timestamp obtained tokens.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the network timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn request_token(
        &self,
        registration: &ClientRegistration,
    ) -> Result<AccessToken, OAuth2Error> {
        let registration_id = registration.registration_id();
        let token_uri = registration.token_uri();

        let body = encode_form(registration)?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if registration.authentication_method() == ClientAuthenticationMethod::ClientSecretBasic {
            headers.typed_insert(basic_credentials(registration));
        }

        info!(registration_id, %token_uri, "sending token request to authorization server");
        let fetched_at = self.clock.now();
        let response = self
            .client
            .post(token_uri.clone())
            .headers(headers)
            .body(body)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        info!(registration_id, %status, "authorization server token response");
        let bytes = response.bytes().await?;

        if !status.is_success() {
            return Err(auth_server_error(status.as_u16(), &bytes));
        }

        let token = TokenResponse::from_json(&bytes)?.into_token(fetched_at, registration.scopes())?;
        debug!(
            registration_id,
            expires_in = ?token.time_until_expiry(fetched_at),
            scopes = ?token.scopes(),
            "access token obtained"
        );
        Ok(token)
    }
}

impl TokenEndpoint for HttpTokenEndpoint {
    fn fetch_token(
        &self,
        registration: &ClientRegistration,
    ) -> impl Future<Output = Result<AccessToken, OAuth2Error>> + Send {
        self.request_token(registration)
    }
}

#[derive(Serialize)]
struct ClientCredentialsForm<'a> {
    grant_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
}

/// Encodes the `application/x-www-form-urlencoded` body of a client-credentials request.
fn encode_form(registration: &ClientRegistration) -> Result<String, OAuth2Error> {
    let scopes = registration.scopes();
    let in_body = registration.authentication_method() == ClientAuthenticationMethod::ClientSecretPost;

    let form = ClientCredentialsForm {
        grant_type: "client_credentials",
        scope: (!scopes.is_empty()).then(|| scopes.join(" ")),
        client_id: in_body.then(|| registration.client_id()),
        client_secret: in_body.then(|| registration.client_secret().expose()),
    };
    serde_urlencoded::to_string(&form)
        .map_err(|err| OAuth2Error::configuration(format!("cannot encode token request: {err}")))
}

/// `client_secret_basic` credentials: both parts form-urlencoded first (RFC 6749 §2.3.1).
fn basic_credentials(registration: &ClientRegistration) -> Authorization<headers::authorization::Basic> {
    let encode = |value: &str| form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>();
    Authorization::basic(
        &encode(registration.client_id()),
        &encode(registration.client_secret().expose()),
    )
}

fn auth_server_error(status: u16, body: &[u8]) -> OAuth2Error {
    let error = serde_json::from_slice::<TokenErrorResponse>(body)
        .ok()
        .map(|response| response.error);
    OAuth2Error::AuthServerError {
        status,
        body: String::from_utf8_lossy(body).into_owned(),
        error,
    }
}
