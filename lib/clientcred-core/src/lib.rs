//! # Clientcred Core
//!
//! OAuth2 client-credentials token manager for service-to-service calls.
//!
//! The crate obtains access tokens from an authorization server, caches them per
//! client registration, refreshes them shortly before they expire and attaches them as
//! bearer tokens to outgoing requests:
//! - **[`AuthorizedClientManager`]** - returns a valid token per registration id, with
//!   one token request in flight per registration
//! - **[`RequestAuthorizer`]** / **[`ResourceClient`]** - send `reqwest` requests with
//!   `Authorization: Bearer`
//! - **[`ClientConfig`]** - YAML configuration of registrations and timeouts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clientcred_core::ClientConfig;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_yaml(
//!     r"
//! registrations:
//!   orders:
//!     token-uri: https://auth.example.com/oauth2/token
//!     client-id: orders-client
//!     client-secret: orders-secret
//!     scopes: [orders.read]
//! resource:
//!   base: https://orders.example.com/api
//!   registration-id: orders
//! ",
//! )?;
//!
//! let manager = config.build_manager()?;
//! let orders = config.build_resource_client(manager, reqwest::Client::new())?;
//!
//! // GET https://orders.example.com/api/orders/42 with a bearer token
//! let response = orders.get("/orders/42").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Token lifecycle
//!
//! A cached token is handed out while `now + margin < expires_at`, with a default
//! margin of 60 seconds. Past that point the next caller requests a new token and
//! concurrent callers wait for the same request. When that request fails and the cached
//! token has not actually expired, the cached token is still returned. Tokens without
//! `expires_in` never expire by clock; a `401` from the resource server drops them.
//!
//! ## Errors
//!
//! [`OAuth2Error::is_retryable`] tells network failures, `429` and `5xx` answers apart
//! from errors that will not go away. Nothing is retried inside the crate.

mod authorizer;
mod clock;
mod config;
mod endpoint;
mod error;
mod manager;
mod registration;
mod secure;
mod token;

pub use self::authorizer::{RequestAuthorizer, ResourceClient};
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::config::{
    ClientConfig, ConfigError, RegistrationConfig, ResourceConfig, TokenEndpointConfig,
};
pub use self::endpoint::{DEFAULT_TOKEN_ENDPOINT_TIMEOUT, HttpTokenEndpoint, TokenEndpoint};
pub use self::error::{OAuth2Error, ResourceRequestError};
pub use self::manager::{AuthorizedClientManager, AuthorizedClientManagerBuilder};
pub use self::registration::{
    ClientAuthenticationMethod, ClientRegistration, ClientRegistrationBuilder,
    ClientRegistrations,
};
pub use self::secure::SecureString;
pub use self::token::{
    AccessToken, DEFAULT_EXPIRY_SAFETY_MARGIN, TokenCache, TokenResponse, TokenType,
};
