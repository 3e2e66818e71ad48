//! Client registrations and the registration repository.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use url::Url;

use crate::error::OAuth2Error;
use crate::secure::SecureString;

/// How the client authenticates itself at the token endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthenticationMethod {
    /// Client id and secret in an `Authorization: Basic` header.
    #[default]
    ClientSecretBasic,
    /// Client id and secret in the form body.
    ClientSecretPost,
}

/// One OAuth2 client registered at one authorization server.
///
/// Immutable once built. Use [`ClientRegistration::builder`] to create instances.
#[derive(Clone)]
pub struct ClientRegistration {
    registration_id: String,
    client_id: String,
    client_secret: SecureString,
    token_uri: Url,
    scopes: Vec<String>,
    authentication_method: ClientAuthenticationMethod,
}

impl ClientRegistration {
    /// Creates a builder with the required values.
    ///
    /// # Errors
    ///
    /// Returns [`OAuth2Error::InvalidTokenEndpoint`] if `token_uri` is not an absolute
    /// `http` or `https` URL.
    pub fn builder(
        registration_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<SecureString>,
        token_uri: impl AsRef<str>,
    ) -> Result<ClientRegistrationBuilder, OAuth2Error> {
        let token_uri = parse_token_uri(token_uri.as_ref())?;
        Ok(ClientRegistrationBuilder {
            registration_id: registration_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_uri,
            scopes: Vec::new(),
            authentication_method: ClientAuthenticationMethod::default(),
        })
    }

    /// Returns the registration id.
    pub fn registration_id(&self) -> &str {
        &self.registration_id
    }

    /// Returns the client id.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the client secret.
    pub fn client_secret(&self) -> &SecureString {
        &self.client_secret
    }

    /// Returns the token endpoint URL.
    pub fn token_uri(&self) -> &Url {
        &self.token_uri
    }

    /// Returns the requested scopes, in configuration order.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Returns the client authentication method.
    pub fn authentication_method(&self) -> ClientAuthenticationMethod {
        self.authentication_method
    }
}

impl fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("registration_id", &self.registration_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_uri", &self.token_uri.as_str())
            .field("scopes", &self.scopes)
            .field("authentication_method", &self.authentication_method)
            .finish()
    }
}

fn parse_token_uri(raw: &str) -> Result<Url, OAuth2Error> {
    let invalid = |reason: String| OAuth2Error::InvalidTokenEndpoint {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(invalid(format!("unsupported scheme '{scheme}'"))),
    }
}

/// Builder for [`ClientRegistration`].
#[derive(Clone)]
pub struct ClientRegistrationBuilder {
    registration_id: String,
    client_id: String,
    client_secret: SecureString,
    token_uri: Url,
    scopes: Vec<String>,
    authentication_method: ClientAuthenticationMethod,
}

impl ClientRegistrationBuilder {
    /// Adds a scope.
    #[must_use]
    pub fn add_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    /// Adds multiple scopes.
    #[must_use]
    pub fn add_scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Sets the client authentication method.
    #[must_use]
    pub fn with_authentication_method(mut self, method: ClientAuthenticationMethod) -> Self {
        self.authentication_method = method;
        self
    }

    /// Validates and builds the registration.
    ///
    /// Duplicate scopes are dropped, keeping the first occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`OAuth2Error::ConfigurationError`] if the registration id, client id or
    /// secret is empty, or if a scope is empty or contains whitespace.
    pub fn build(self) -> Result<ClientRegistration, OAuth2Error> {
        if self.registration_id.trim().is_empty() {
            return Err(OAuth2Error::configuration(
                "registration id must not be empty",
            ));
        }
        if self.client_id.trim().is_empty() {
            return Err(OAuth2Error::configuration(format!(
                "registration '{}' has an empty client id",
                self.registration_id
            )));
        }
        if self.client_secret.is_empty() {
            return Err(OAuth2Error::configuration(format!(
                "registration '{}': client credentials flow requires a client secret",
                self.registration_id
            )));
        }

        let mut scopes: Vec<String> = Vec::with_capacity(self.scopes.len());
        for scope in self.scopes {
            if scope.is_empty() || scope.chars().any(char::is_whitespace) {
                return Err(OAuth2Error::configuration(format!(
                    "registration '{}' has an invalid scope '{scope}'",
                    self.registration_id
                )));
            }
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }

        Ok(ClientRegistration {
            registration_id: self.registration_id,
            client_id: self.client_id,
            client_secret: self.client_secret,
            token_uri: self.token_uri,
            scopes,
            authentication_method: self.authentication_method,
        })
    }
}

impl fmt::Debug for ClientRegistrationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistrationBuilder")
            .field("registration_id", &self.registration_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_uri", &self.token_uri.as_str())
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// Read-only set of registrations keyed by registration id, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistrations {
    registrations: IndexMap<String, Arc<ClientRegistration>>,
}

impl ClientRegistrations {
    /// Collects registrations.
    ///
    /// # Errors
    ///
    /// Returns [`OAuth2Error::ConfigurationError`] when two registrations share an id.
    pub fn new(
        registrations: impl IntoIterator<Item = ClientRegistration>,
    ) -> Result<Self, OAuth2Error> {
        let mut result = IndexMap::new();
        for registration in registrations {
            let id = registration.registration_id().to_string();
            if result.contains_key(&id) {
                return Err(OAuth2Error::configuration(format!(
                    "duplicate registration id '{id}'"
                )));
            }
            result.insert(id, Arc::new(registration));
        }
        Ok(Self {
            registrations: result,
        })
    }

    /// Looks up a registration.
    ///
    /// # Errors
    ///
    /// Returns [`OAuth2Error::UnknownRegistration`] if no registration has this id.
    pub fn get(&self, registration_id: &str) -> Result<&Arc<ClientRegistration>, OAuth2Error> {
        self.registrations
            .get(registration_id)
            .ok_or_else(|| OAuth2Error::UnknownRegistration {
                registration_id: registration_id.to_string(),
            })
    }

    /// Returns the registration ids, in configuration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.registrations.keys().map(String::as_str)
    }

    /// Iterates over the registrations.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ClientRegistration>> {
        self.registrations.values()
    }

    /// Returns the number of registrations.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Returns `true` if there is no registration.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl From<ClientRegistration> for ClientRegistrations {
    fn from(registration: ClientRegistration) -> Self {
        let mut registrations = IndexMap::new();
        registrations.insert(
            registration.registration_id().to_string(),
            Arc::new(registration),
        );
        Self { registrations }
    }
}
