//! Bearer authorization of outgoing resource requests.

use std::fmt;

use headers::{Authorization, HeaderMapExt};
use http::{Method, StatusCode};
use tracing::{info, warn};
use url::Url;

use crate::endpoint::{HttpTokenEndpoint, TokenEndpoint};
use crate::error::ResourceRequestError;
use crate::manager::AuthorizedClientManager;
use crate::token::AccessToken;

/// Attaches `Authorization: Bearer` to outgoing requests and sends them.
///
/// A request is only sent once a valid token was obtained. A `401` answer from the
/// resource server drops the rejected token from the cache, so the next request
/// fetches a new one. A token cached in the meantime is kept.
pub struct RequestAuthorizer<E = HttpTokenEndpoint> {
    manager: AuthorizedClientManager<E>,
    client: reqwest::Client,
}

impl<E> Clone for RequestAuthorizer<E> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            client: self.client.clone(),
        }
    }
}

impl<E> fmt::Debug for RequestAuthorizer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestAuthorizer")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl<E> RequestAuthorizer<E>
where
    E: TokenEndpoint,
{
    /// Creates an authorizer sending requests with `client`.
    pub fn new(manager: AuthorizedClientManager<E>, client: reqwest::Client) -> Self {
        Self { manager, client }
    }

    /// Returns the manager providing the tokens.
    pub fn manager(&self) -> &AuthorizedClientManager<E> {
        &self.manager
    }

    /// Adds the bearer token of the registration to the request, replacing any
    /// existing `Authorization` header.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceRequestError::Authorization`] when no token can be obtained.
    pub async fn authorize(
        &self,
        registration_id: &str,
        request: reqwest::Request,
    ) -> Result<reqwest::Request, ResourceRequestError> {
        let (request, _) = self.with_bearer(registration_id, request).await?;
        Ok(request)
    }

    async fn with_bearer(
        &self,
        registration_id: &str,
        mut request: reqwest::Request,
    ) -> Result<(reqwest::Request, AccessToken), ResourceRequestError> {
        let token = self.manager.authorize(registration_id).await?;
        let bearer = Authorization::bearer(token.secret().expose())
            .map_err(|_| ResourceRequestError::InvalidBearerToken)?;
        request.headers_mut().typed_insert(bearer);
        Ok((request, token))
    }

    /// Authorizes and sends the request.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceRequestError::Authorization`] when no token can be obtained, in
    /// which case nothing is sent, or [`ResourceRequestError::Transport`] when the
    /// request fails. Non-2xx answers are returned as responses.
    pub async fn execute(
        &self,
        registration_id: &str,
        request: reqwest::Request,
    ) -> Result<reqwest::Response, ResourceRequestError> {
        let (request, token) = self.with_bearer(registration_id, request).await?;

        log_resource_request(registration_id, &request);
        let result = self.client.execute(request).await;
        log_resource_response(registration_id, &result);

        let response = result?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(
                registration_id,
                url = %response.url(),
                "resource server rejected the access token"
            );
            self.manager.invalidate_token(registration_id, &token).await;
        }
        Ok(response)
    }
}

fn log_resource_request(registration_id: &str, request: &reqwest::Request) {
    info!(
        registration_id,
        method = %request.method(),
        url = %request.url(),
        "sending OAuth2 protected resource request"
    );
}

fn log_resource_response(
    registration_id: &str,
    result: &Result<reqwest::Response, reqwest::Error>,
) {
    match result {
        Ok(response) => info!(
            registration_id,
            status = %response.status(),
            url = %response.url(),
            "OAuth2 protected resource response"
        ),
        Err(error) => warn!(
            registration_id,
            %error,
            "OAuth2 protected resource request failed"
        ),
    }
}

/// Client for one resource server, authorized through one registration.
pub struct ResourceClient<E = HttpTokenEndpoint> {
    base: Url,
    registration_id: String,
    authorizer: RequestAuthorizer<E>,
}

impl<E> Clone for ResourceClient<E> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            registration_id: self.registration_id.clone(),
            authorizer: self.authorizer.clone(),
        }
    }
}

impl<E> fmt::Debug for ResourceClient<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceClient")
            .field("base", &self.base.as_str())
            .field("registration_id", &self.registration_id)
            .finish_non_exhaustive()
    }
}

impl<E> ResourceClient<E>
where
    E: TokenEndpoint,
{
    /// Creates a client for the resource server at `base`.
    pub fn new(
        base: Url,
        registration_id: impl Into<String>,
        authorizer: RequestAuthorizer<E>,
    ) -> Self {
        Self {
            base,
            registration_id: registration_id.into(),
            authorizer,
        }
    }

    /// Returns the base URI.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Returns the registration id used for authorization.
    pub fn registration_id(&self) -> &str {
        &self.registration_id
    }

    /// Resolves `path` below the base URI.
    ///
    /// The path is appended to the base path: with a base of `http://host/api`,
    /// `/test` resolves to `http://host/api/test`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceRequestError::InvalidUrl`] if the result is not a valid URL, or
    /// [`ResourceRequestError::OutsideBase`] if it leaves the base URI, as an absolute
    /// URL or a `..` segment would.
    pub fn resolve(&self, path: &str) -> Result<Url, ResourceRequestError> {
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        let url = base.join(path.trim_start_matches('/'))?;
        if url.origin() != base.origin() || !url.path().starts_with(base.path()) {
            warn!(
                registration_id = self.registration_id.as_str(),
                %url,
                "refusing resource URL outside the base URI"
            );
            return Err(ResourceRequestError::OutsideBase {
                url: url.to_string(),
            });
        }
        Ok(url)
    }

    /// Sends an authorized request with an empty body.
    ///
    /// # Errors
    ///
    /// See [`RequestAuthorizer::execute`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
    ) -> Result<reqwest::Response, ResourceRequestError> {
        let request = reqwest::Request::new(method, self.resolve(path)?);
        self.authorizer.execute(&self.registration_id, request).await
    }

    /// Sends an authorized `GET`.
    ///
    /// # Errors
    ///
    /// See [`RequestAuthorizer::execute`].
    pub async fn get(&self, path: &str) -> Result<reqwest::Response, ResourceRequestError> {
        self.request(Method::GET, path).await
    }
}
