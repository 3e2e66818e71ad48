use std::time::Duration;

use anyhow::Context;
use backon::{ExponentialBuilder, Retryable};
use clientcred_core::{ClientConfig, OAuth2Error, ResourceClient, ResourceRequestError};
use tracing::{debug, warn};

const MAX_AUTHORIZATION_RETRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct AppState {
    resource: ResourceClient,
    backoff: ExponentialBuilder,
}

impl AppState {
    /// Builds the OAuth2 client from the configuration.
    ///
    /// # Errors
    ///
    /// fail if the configuration has no `resource` section or the HTTP client cannot be
    /// created
    pub fn from_config(config: &ClientConfig) -> anyhow::Result<Self> {
        let manager = config.build_manager().context("create OAuth2 client manager")?;
        let client = reqwest::Client::builder()
            .build()
            .context("create resource HTTP client")?;
        let resource = config
            .build_resource_client(manager, client)
            .context("create resource client")?;
        debug!(?resource, "resource client ready");

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(MAX_AUTHORIZATION_RETRIES)
            .with_jitter();

        Ok(Self { resource, backoff })
    }

    /// Calls the protected resource, retrying token acquisition failures that may go
    /// away.
    pub async fn call_resource(
        &self,
        path: &str,
    ) -> Result<reqwest::Response, ResourceRequestError> {
        let call = || self.resource.get(path);

        call.retry(&self.backoff)
            .when(is_retryable_authorization)
            .notify(|error, delay| {
                warn!(%error, ?delay, "token request failed, retrying with exponential backoff");
            })
            .await
    }
}

fn is_retryable_authorization(error: &ResourceRequestError) -> bool {
    error
        .as_authorization()
        .is_some_and(OAuth2Error::is_retryable)
}
