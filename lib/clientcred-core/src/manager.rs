//! Authorized client manager: cache lookup, refresh decision and single-flight token
//! acquisition.
//!
//! For one registration id at most one token request is in flight. Callers that find
//! the cached token stale while a request is running join it instead of sending
//! another one. The request runs on its own task, so a caller that gives up waiting
//! does not cancel it for the others.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::endpoint::{HttpTokenEndpoint, TokenEndpoint};
use crate::error::OAuth2Error;
use crate::registration::{ClientRegistration, ClientRegistrations};
use crate::token::{AccessToken, DEFAULT_EXPIRY_SAFETY_MARGIN, TokenCache};

type SharedFetch = Shared<BoxFuture<'static, Result<AccessToken, OAuth2Error>>>;

/// Hands out valid access tokens per registration id.
///
/// Cheap to clone: clones share the cache and the in-flight requests.
///
/// # Example
///
/// ```rust,no_run
/// use clientcred_core::{AuthorizedClientManager, ClientRegistration, HttpTokenEndpoint};
///
/// # async fn example() -> Result<(), clientcred_core::OAuth2Error> {
/// let registration = ClientRegistration::builder(
///     "orders",
///     "client-id",
///     "client-secret",
///     "https://auth.example.com/oauth2/token",
/// )?
/// .add_scope("orders:read")
/// .build()?;
///
/// let manager = AuthorizedClientManager::builder(registration.into(), HttpTokenEndpoint::new()?)
///     .build();
///
/// let token = manager.authorize("orders").await?;
/// # Ok(())
/// # }
/// ```
pub struct AuthorizedClientManager<E = HttpTokenEndpoint> {
    inner: Arc<Inner<E>>,
}

struct Inner<E> {
    registrations: ClientRegistrations,
    endpoint: E,
    cache: TokenCache,
    clock: Arc<dyn Clock>,
    expiry_safety_margin: Duration,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
}

impl<E> Clone for AuthorizedClientManager<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> fmt::Debug for AuthorizedClientManager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedClientManager")
            .field("registrations", &self.inner.registrations.ids().collect::<Vec<_>>())
            .field("clock", &self.inner.clock)
            .field("expiry_safety_margin", &self.inner.expiry_safety_margin)
            .finish_non_exhaustive()
    }
}

impl<E> AuthorizedClientManager<E>
where
    E: TokenEndpoint,
{
    /// Creates a builder.
    pub fn builder(
        registrations: ClientRegistrations,
        endpoint: E,
    ) -> AuthorizedClientManagerBuilder<E> {
        AuthorizedClientManagerBuilder {
            registrations,
            endpoint,
            cache: TokenCache::new(),
            clock: Arc::new(SystemClock),
            expiry_safety_margin: DEFAULT_EXPIRY_SAFETY_MARGIN,
        }
    }

    /// Returns a valid access token for the registration.
    ///
    /// The cached token is returned while it stays valid past the expiry safety margin.
    /// Otherwise a new token is requested, or the in-flight request for the same
    /// registration is joined. If that request fails while the cached token has not
    /// actually expired yet, the cached token is returned instead of the error.
    ///
    /// # Errors
    ///
    /// Returns [`OAuth2Error::UnknownRegistration`] for an unknown id, or the error of
    /// the token request when no valid token is left.
    pub async fn authorize(&self, registration_id: &str) -> Result<AccessToken, OAuth2Error> {
        let registration = Arc::clone(self.inner.registrations.get(registration_id)?);

        if let Some(token) = self.usable_cached_token(registration_id).await {
            debug!(registration_id, "using cached access token");
            return Ok(token);
        }

        let fetch = {
            let mut in_flight = self.inner.in_flight.lock().await;
            if let Some(fetch) = in_flight.get(registration_id) {
                debug!(registration_id, "joining in-flight token request");
                fetch.clone()
            } else {
                // a request may have completed while we were waiting for the lock
                if let Some(token) = self.usable_cached_token(registration_id).await {
                    return Ok(token);
                }
                let fetch = self.spawn_fetch(registration);
                in_flight.insert(registration_id.to_string(), fetch.clone());
                fetch
            }
        };

        match fetch.await {
            Ok(token) => Ok(token),
            Err(error) => self.fallback_to_cached(registration_id, error).await,
        }
    }

    fn spawn_fetch(&self, registration: Arc<ClientRegistration>) -> SharedFetch {
        info!(
            registration_id = registration.registration_id(),
            "requesting new access token"
        );
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let registration_id = registration.registration_id().to_string();
            let request = {
                let inner = Arc::clone(&inner);
                tokio::spawn(async move { inner.endpoint.fetch_token(&registration).await })
            };
            let result = request
                .await
                .unwrap_or_else(|err| Err(request_task_failed(&err)));
            if let Ok(token) = &result {
                inner.cache.put(&registration_id, token.clone()).await;
            }
            inner.in_flight.lock().await.remove(&registration_id);
            result
        });

        async move {
            task.await
                .unwrap_or_else(|err| Err(request_task_failed(&err)))
        }
        .boxed()
        .shared()
    }

    async fn fallback_to_cached(
        &self,
        registration_id: &str,
        error: OAuth2Error,
    ) -> Result<AccessToken, OAuth2Error> {
        let now = self.inner.clock.now();
        match self.inner.cache.get(registration_id).await {
            Some(token) if !token.is_expired(now) => {
                warn!(
                    registration_id,
                    %error,
                    "token request failed, keeping the cached token until it expires"
                );
                Ok(token)
            }
            _ => {
                debug!(registration_id, %error, "token request failed");
                Err(error)
            }
        }
    }

    async fn usable_cached_token(&self, registration_id: &str) -> Option<AccessToken> {
        let token = self.inner.cache.get(registration_id).await?;
        token
            .is_usable(self.inner.clock.now(), self.inner.expiry_safety_margin)
            .then_some(token)
    }
}

fn request_task_failed(err: &JoinError) -> OAuth2Error {
    OAuth2Error::NetworkError {
        reason: format!("token request task failed: {err}"),
    }
}

impl<E> AuthorizedClientManager<E> {
    /// Drops the cached token of a registration, so the next call requests a new one.
    pub async fn invalidate(&self, registration_id: &str) -> Option<AccessToken> {
        let removed = self.inner.cache.invalidate(registration_id).await;
        if removed.is_some() {
            info!(registration_id, "cached access token invalidated");
        }
        removed
    }

    /// Drops `token` from the cache if it is still the cached one.
    ///
    /// A token cached after `token` was handed out is kept.
    pub async fn invalidate_token(&self, registration_id: &str, token: &AccessToken) -> bool {
        let removed = self
            .inner
            .cache
            .invalidate_if_current(registration_id, token)
            .await;
        if removed {
            info!(registration_id, "rejected access token invalidated");
        }
        removed
    }

    /// Returns the cached token without checking its expiry.
    pub async fn cached_token(&self, registration_id: &str) -> Option<AccessToken> {
        self.inner.cache.get(registration_id).await
    }

    /// Returns the known registrations.
    pub fn registrations(&self) -> &ClientRegistrations {
        &self.inner.registrations
    }

    /// Returns the token cache.
    pub fn cache(&self) -> &TokenCache {
        &self.inner.cache
    }

    /// Returns the expiry safety margin.
    pub fn expiry_safety_margin(&self) -> Duration {
        self.inner.expiry_safety_margin
    }
}

/// Builder for [`AuthorizedClientManager`].
pub struct AuthorizedClientManagerBuilder<E> {
    registrations: ClientRegistrations,
    endpoint: E,
    cache: TokenCache,
    clock: Arc<dyn Clock>,
    expiry_safety_margin: Duration,
}

impl<E> AuthorizedClientManagerBuilder<E>
where
    E: TokenEndpoint,
{
    /// Uses an existing cache, for instance one shared with another manager.
    #[must_use]
    pub fn with_cache(mut self, cache: TokenCache) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the clock used to check expiry.
    ///
    /// Give the token endpoint the same clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets how long before its expiry a token stops being handed out.
    #[must_use]
    pub fn with_expiry_safety_margin(mut self, margin: Duration) -> Self {
        self.expiry_safety_margin = margin;
        self
    }

    /// Builds the manager.
    pub fn build(self) -> AuthorizedClientManager<E> {
        AuthorizedClientManager {
            inner: Arc::new(Inner {
                registrations: self.registrations,
                endpoint: self.endpoint,
                cache: self.cache,
                clock: self.clock,
                expiry_safety_margin: self.expiry_safety_margin,
                in_flight: Mutex::default(),
            }),
        }
    }
}

impl<E> fmt::Debug for AuthorizedClientManagerBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedClientManagerBuilder")
            .field("registrations", &self.registrations.ids().collect::<Vec<_>>())
            .field("expiry_safety_margin", &self.expiry_safety_margin)
            .finish_non_exhaustive()
    }
}
