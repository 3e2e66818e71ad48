//! Error types for token acquisition and authorized resource requests.

/// Errors raised while obtaining an access token.
///
/// The token endpoint client and the [`AuthorizedClientManager`](crate::AuthorizedClientManager)
/// never swallow these: they reach the caller of
/// [`authorize`](crate::AuthorizedClientManager::authorize) unchanged.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Error, derive_more::Display)]
pub enum OAuth2Error {
    /// Transport failure or timeout while talking to the token endpoint.
    #[display("Network error during token request: {reason}")]
    NetworkError {
        /// Description of the network error.
        reason: String,
    },

    /// The token endpoint answered with a non-2xx status.
    #[display("Authorization server returned {status}: {body}")]
    AuthServerError {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
        /// OAuth2 `error` code, when the body is a JSON error response.
        error: Option<String>,
    },

    /// The token endpoint answered 2xx but the body is not a usable token response.
    #[display("Malformed token response: {reason}")]
    MalformedResponseError {
        /// Description of what was invalid.
        reason: String,
    },

    /// Token endpoint URL is invalid.
    #[display("Invalid token endpoint URL '{url}': {reason}")]
    InvalidTokenEndpoint {
        /// The invalid URL that was provided.
        url: String,
        /// Description of why the URL is invalid.
        reason: String,
    },

    /// No registration is configured under this id.
    #[display("Unknown client registration '{registration_id}'")]
    UnknownRegistration {
        /// The requested registration id.
        registration_id: String,
    },

    /// Configuration error.
    #[display("OAuth2 configuration error: {reason}")]
    ConfigurationError {
        /// Description of the configuration issue.
        reason: String,
    },
}

impl OAuth2Error {
    /// Returns `true` when retrying the same request may succeed.
    ///
    /// Network failures, `429` and `5xx` answers are retryable. Other `4xx` answers,
    /// malformed responses and configuration problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. } => true,
            Self::AuthServerError { status, .. } => *status == 429 || *status >= 500,
            Self::MalformedResponseError { .. }
            | Self::InvalidTokenEndpoint { .. }
            | Self::UnknownRegistration { .. }
            | Self::ConfigurationError { .. } => false,
        }
    }

    /// Returns `true` for errors caused by invalid configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidTokenEndpoint { .. }
                | Self::UnknownRegistration { .. }
                | Self::ConfigurationError { .. }
        )
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::ConfigurationError {
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponseError {
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for OAuth2Error {
    fn from(error: reqwest::Error) -> Self {
        let reason = if error.is_timeout() {
            format!("timed out: {error}")
        } else {
            error.to_string()
        };
        Self::NetworkError { reason }
    }
}

/// Errors raised by [`RequestAuthorizer`](crate::RequestAuthorizer) and
/// [`ResourceClient`](crate::ResourceClient).
#[derive(Debug, derive_more::Error, derive_more::Display, derive_more::From)]
pub enum ResourceRequestError {
    /// No token could be obtained; the resource request was not sent.
    #[display("Authorization failed: {_0}")]
    Authorization(OAuth2Error),

    /// The resource request itself failed.
    #[display("Resource request failed: {_0}")]
    Transport(reqwest::Error),

    /// The resource path could not be resolved against the base URI.
    #[display("Invalid resource URL: {_0}")]
    InvalidUrl(url::ParseError),

    /// The resource path resolves outside the base URI.
    #[display("Resource URL '{url}' is outside the base URI")]
    #[from(skip)]
    OutsideBase {
        /// The rejected URL.
        url: String,
    },

    /// The access token cannot be carried in an `Authorization` header.
    #[display("Access token is not a valid bearer credential")]
    #[from(skip)]
    InvalidBearerToken,
}

impl ResourceRequestError {
    /// Returns the token acquisition error, if that is what failed.
    pub fn as_authorization(&self) -> Option<&OAuth2Error> {
        match self {
            Self::Authorization(error) => Some(error),
            _ => None,
        }
    }
}
