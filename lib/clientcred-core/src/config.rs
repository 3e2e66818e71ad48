//! YAML configuration.
//!
//! ```yaml
//! registrations:
//!   test:
//!     token-uri: http://localhost:9000/oauth2/token
//!     client-id: test-client
//!     client-secret: test-secret
//!     scopes: [read, write]
//!     client-authentication-method: client_secret_basic
//! token-endpoint:
//!   timeout: 5s
//! expiry-safety-margin: 60s
//! resource:
//!   base: http://localhost:8081
//!   registration-id: test
//! ```
//!
//! Everything is validated when the file is loaded: a configuration that loads builds
//! a manager.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use jiff::SignedDuration;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::authorizer::{RequestAuthorizer, ResourceClient};
use crate::clock::Clock;
use crate::endpoint::{DEFAULT_TOKEN_ENDPOINT_TIMEOUT, HttpTokenEndpoint};
use crate::error::OAuth2Error;
use crate::manager::AuthorizedClientManager;
use crate::registration::{ClientAuthenticationMethod, ClientRegistration, ClientRegistrations};
use crate::secure::SecureString;
use crate::token::DEFAULT_EXPIRY_SAFETY_MARGIN;

/// Errors raised while loading the configuration.
#[derive(Debug, derive_more::Error, derive_more::Display, derive_more::From)]
pub enum ConfigError {
    /// The configuration file cannot be read.
    #[display("Cannot read configuration file '{}': {source}", path.display())]
    #[from(skip)]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid YAML for this configuration.
    #[display("Invalid YAML configuration: {reason}")]
    #[from(skip)]
    Yaml {
        /// Parser message.
        reason: String,
    },

    /// A duration is negative or out of range.
    #[display("Invalid duration for '{field}': {reason}")]
    #[from(skip)]
    Duration {
        /// Configuration key.
        field: &'static str,
        /// Why the duration was rejected.
        reason: String,
    },

    /// A value is missing.
    #[display("Missing configuration value '{field}'")]
    #[from(skip)]
    Missing {
        /// Configuration key.
        field: &'static str,
    },

    /// The values do not form a valid registration set.
    #[display("{_0}")]
    Invalid(OAuth2Error),
}

/// Root of the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ClientConfig {
    /// Registrations keyed by registration id.
    pub registrations: IndexMap<String, RegistrationConfig>,

    /// Token endpoint settings.
    #[serde(default)]
    pub token_endpoint: TokenEndpointConfig,

    /// How long before its expiry a token stops being handed out.
    #[serde(default = "default_expiry_safety_margin")]
    pub expiry_safety_margin: SignedDuration,

    /// Protected resource server.
    #[serde(default)]
    pub resource: Option<ResourceConfig>,
}

/// One client registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RegistrationConfig {
    /// Token endpoint URL.
    pub token_uri: String,
    /// Client id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: SecureString,
    /// Requested scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Client authentication method.
    #[serde(default)]
    pub client_authentication_method: ClientAuthenticationMethod,
}

/// Token endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TokenEndpointConfig {
    /// Network timeout of one token request.
    #[serde(default = "default_timeout")]
    pub timeout: SignedDuration,
}

impl Default for TokenEndpointConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

/// Protected resource server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ResourceConfig {
    /// Base URI of the resource server.
    pub base: Url,
    /// Registration used to authorize resource requests.
    pub registration_id: String,
}

fn default_timeout() -> SignedDuration {
    SignedDuration::try_from(DEFAULT_TOKEN_ENDPOINT_TIMEOUT).unwrap_or(SignedDuration::from_secs(5))
}

fn default_expiry_safety_margin() -> SignedDuration {
    SignedDuration::try_from(DEFAULT_EXPIRY_SAFETY_MARGIN).unwrap_or(SignedDuration::from_secs(60))
}

impl ClientConfig {
    /// Parses and validates a YAML configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the YAML does not match the format or a value is
    /// invalid.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_saphyr::from_str(yaml).map_err(|err| ConfigError::Yaml {
            reason: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise see
    /// [`ClientConfig::from_yaml`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading client configuration");
        Self::from_yaml(&yaml)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let registrations = self.registrations()?;
        if registrations.is_empty() {
            return Err(ConfigError::Missing {
                field: "registrations",
            });
        }
        self.token_endpoint_timeout()?;
        self.expiry_safety_margin()?;
        if let Some(resource) = &self.resource {
            registrations.get(&resource.registration_id)?;
        }
        Ok(())
    }

    /// Builds the client registrations.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a registration is invalid.
    pub fn registrations(&self) -> Result<ClientRegistrations, ConfigError> {
        let registrations = self
            .registrations
            .iter()
            .map(|(id, registration)| registration.to_registration(id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ClientRegistrations::new(registrations)?)
    }

    /// Returns the token request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Duration`] if the timeout is negative or zero.
    pub fn token_endpoint_timeout(&self) -> Result<Duration, ConfigError> {
        let timeout = to_duration("token-endpoint.timeout", self.token_endpoint.timeout)?;
        if timeout.is_zero() {
            return Err(ConfigError::Duration {
                field: "token-endpoint.timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(timeout)
    }

    /// Returns the expiry safety margin.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Duration`] if the margin is negative.
    pub fn expiry_safety_margin(&self) -> Result<Duration, ConfigError> {
        to_duration("expiry-safety-margin", self.expiry_safety_margin)
    }

    /// Builds a manager backed by an [`HttpTokenEndpoint`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for invalid values or if the HTTP client cannot be built.
    pub fn build_manager(&self) -> Result<AuthorizedClientManager, ConfigError> {
        let endpoint = HttpTokenEndpoint::new()?.with_timeout(self.token_endpoint_timeout()?);
        Ok(
            AuthorizedClientManager::builder(self.registrations()?, endpoint)
                .with_expiry_safety_margin(self.expiry_safety_margin()?)
                .build(),
        )
    }

    /// Same as [`ClientConfig::build_manager`], with a custom clock for the manager and
    /// the token endpoint.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::build_manager`].
    pub fn build_manager_with_clock(
        &self,
        clock: Arc<dyn Clock>,
    ) -> Result<AuthorizedClientManager, ConfigError> {
        let endpoint = HttpTokenEndpoint::new()?
            .with_timeout(self.token_endpoint_timeout()?)
            .with_clock(Arc::clone(&clock));
        Ok(
            AuthorizedClientManager::builder(self.registrations()?, endpoint)
                .with_expiry_safety_margin(self.expiry_safety_margin()?)
                .with_clock(clock)
                .build(),
        )
    }

    /// Builds a [`ResourceClient`] for the `resource` section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] without a `resource` section.
    pub fn build_resource_client(
        &self,
        manager: AuthorizedClientManager,
        client: reqwest::Client,
    ) -> Result<ResourceClient, ConfigError> {
        let resource = self
            .resource
            .as_ref()
            .ok_or(ConfigError::Missing { field: "resource" })?;
        manager.registrations().get(&resource.registration_id)?;

        Ok(ResourceClient::new(
            resource.base.clone(),
            resource.registration_id.clone(),
            RequestAuthorizer::new(manager, client),
        ))
    }
}

impl RegistrationConfig {
    fn to_registration(&self, registration_id: &str) -> Result<ClientRegistration, OAuth2Error> {
        ClientRegistration::builder(
            registration_id,
            self.client_id.clone(),
            self.client_secret.clone(),
            &self.token_uri,
        )?
        .add_scopes(self.scopes.iter().cloned())
        .with_authentication_method(self.client_authentication_method)
        .build()
    }
}

fn to_duration(field: &'static str, value: SignedDuration) -> Result<Duration, ConfigError> {
    Duration::try_from(value).map_err(|err| ConfigError::Duration {
        field,
        reason: err.to_string(),
    })
}
