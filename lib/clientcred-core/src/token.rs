//! Access tokens, the token endpoint response codec, and the token cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::OAuth2Error;
use crate::secure::SecureString;

/// Default safety margin subtracted from a token's expiry (60 seconds).
pub const DEFAULT_EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Access token type. Only bearer tokens are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    /// RFC 6750 bearer token.
    Bearer,
}

impl TokenType {
    /// Returns the canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bearer => "Bearer",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An access token obtained from a token endpoint.
///
/// Tokens are never mutated: a refresh produces a new `AccessToken` that supersedes
/// the cached one.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: SecureString,
    token_type: TokenType,
    issued_at: Instant,
    expires_at: Option<Instant>,
    scopes: Vec<String>,
}

impl AccessToken {
    /// Creates a bearer token without expiry.
    pub fn new(value: impl Into<SecureString>, issued_at: Instant) -> Self {
        Self {
            value: value.into(),
            token_type: TokenType::Bearer,
            issued_at,
            expires_at: None,
            scopes: Vec::new(),
        }
    }

    /// Sets the lifetime of the token, counted from its issue instant.
    ///
    /// A lifetime past the range of [`Instant`] leaves the token without expiry.
    #[must_use]
    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_at = self.issued_at.checked_add(expires_in);
        self
    }

    /// Sets the granted scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the access token value.
    pub fn secret(&self) -> &SecureString {
        &self.value
    }

    /// Returns the token type.
    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    /// Returns when the token was obtained.
    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// Returns the absolute expiry, if the server sent one.
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Returns the granted scopes.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Checks if the token is expired at `now`.
    ///
    /// Returns `false` if the token has no expiration time.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Checks if the token can still be handed out at `now`.
    ///
    /// A token is usable while it stays valid for longer than `margin`.
    pub fn is_usable(&self, now: Instant, margin: Duration) -> bool {
        self.expires_at.is_none_or(|exp| {
            now.checked_add(margin)
                .is_some_and(|deadline| deadline < exp)
        })
    }

    /// Returns the time until expiration, if known.
    pub fn time_until_expiry(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .and_then(|exp| exp.checked_duration_since(now))
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Successful token endpoint response (RFC 6749 §5.1).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The issued access token.
    pub access_token: String,
    /// The token type, expected to be `Bearer` (case-insensitive).
    pub token_type: String,
    /// Lifetime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Space-separated granted scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Decodes a JSON token response.
    ///
    /// # Errors
    ///
    /// Returns [`OAuth2Error::MalformedResponseError`] if the body is not a JSON token
    /// response; the message includes the path of the offending field.
    pub fn from_json(body: &[u8]) -> Result<Self, OAuth2Error> {
        let deserializer = &mut serde_json::Deserializer::from_slice(body);
        serde_path_to_error::deserialize(deserializer).map_err(|err| {
            OAuth2Error::malformed(format!("at '{}': {}", err.path(), err.inner()))
        })
    }

    /// Encodes the response as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`OAuth2Error::MalformedResponseError`] if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, OAuth2Error> {
        serde_json::to_vec(self).map_err(|err| OAuth2Error::malformed(err.to_string()))
    }

    /// Turns the response into an [`AccessToken`] obtained at `fetched_at`.
    ///
    /// When the response has no `scope`, the `requested_scopes` are assumed granted.
    ///
    /// # Errors
    ///
    /// Returns [`OAuth2Error::MalformedResponseError`] if the access token is empty,
    /// the token type is not `Bearer`, or `expires_in` is out of range.
    pub fn into_token(
        self,
        fetched_at: Instant,
        requested_scopes: &[String],
    ) -> Result<AccessToken, OAuth2Error> {
        let Self {
            access_token,
            token_type,
            expires_in,
            scope,
        } = self;

        if access_token.is_empty() {
            return Err(OAuth2Error::malformed("empty access_token"));
        }
        if !token_type.eq_ignore_ascii_case("bearer") {
            return Err(OAuth2Error::malformed(format!(
                "unsupported token_type '{token_type}'"
            )));
        }

        let mut token = AccessToken::new(access_token, fetched_at);
        if let Some(seconds) = expires_in {
            let lifetime = Duration::from_secs(seconds);
            if fetched_at.checked_add(lifetime).is_none() {
                return Err(OAuth2Error::malformed(format!(
                    "expires_in {seconds} is out of range"
                )));
            }
            token = token.with_expires_in(lifetime);
        }
        token = match scope {
            Some(scope) => token.with_scopes(scope.split_whitespace()),
            None => token.with_scopes(requested_scopes.iter().cloned()),
        };
        Ok(token)
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Error response from a token endpoint (RFC 6749 §5.2).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenErrorResponse {
    pub(crate) error: String,
}

/// Thread-safe cache of the current access token per registration id.
///
/// Clones share the same storage. Reads run concurrently, writes are exclusive.
/// Nothing here touches the network.
#[derive(Debug, Clone, Default)]
pub struct TokenCache {
    inner: Arc<RwLock<HashMap<String, AccessToken>>>,
}

impl TokenCache {
    /// Creates a new empty token cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached token for this registration, expired or not.
    pub async fn get(&self, registration_id: &str) -> Option<AccessToken> {
        let guard = self.inner.read().await;
        guard.get(registration_id).cloned()
    }

    /// Stores a token, unless a token issued later is already cached.
    ///
    /// Returns `false` when the token was discarded as stale.
    pub async fn put(&self, registration_id: &str, token: AccessToken) -> bool {
        let mut guard = self.inner.write().await;
        if let Some(current) = guard.get(registration_id)
            && current.issued_at() > token.issued_at()
        {
            debug!(registration_id, "discarding token older than the cached one");
            return false;
        }
        guard.insert(registration_id.to_string(), token);
        true
    }

    /// Removes and returns the cached token.
    pub async fn invalidate(&self, registration_id: &str) -> Option<AccessToken> {
        let mut guard = self.inner.write().await;
        guard.remove(registration_id)
    }

    /// Removes the cached token only if it is still `token`.
    ///
    /// Returns `false` when the entry is missing or already holds another token.
    pub async fn invalidate_if_current(&self, registration_id: &str, token: &AccessToken) -> bool {
        let mut guard = self.inner.write().await;
        if guard.get(registration_id) != Some(token) {
            debug!(registration_id, "keeping cached token, it was replaced");
            return false;
        }
        guard.remove(registration_id);
        true
    }

    /// Clears every cached token.
    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        guard.clear();
    }

    /// Returns the number of cached tokens.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Returns `true` if no token is cached.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
