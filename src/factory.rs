//! Client construction.
//!
//! [`create_client`] resolves a model's settings and credential and builds a
//! [`ChatClient`] for it. A missing credential fails here, before any
//! request is made. [`ClientInitializer`] wraps it with a small fixed retry
//! budget for start-up.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::ConfigLoader;
use crate::credentials::CredentialSource;
use crate::error::{ClientError, InitError};
use crate::llm::{ChatClient, Liveness};

/// Retries after the first failed initialization attempt.
pub const MAX_RETRIES: u32 = 3;

/// Delay between initialization attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Build a client for `model_id`, or for the configured default.
pub async fn create_client(
    loader: &ConfigLoader,
    credentials: &dyn CredentialSource,
    model_id: Option<&str>,
) -> Result<ChatClient, ClientError> {
    let config = loader.load_config().await;
    let id = model_id.unwrap_or(config.default_model_id.as_str());
    let settings = config.get(Some(id))?.clone();

    let api_key = credentials
        .get(&settings.api_key_env_name)
        .ok_or_else(|| ClientError::MissingCredential {
            name: settings.api_key_env_name.clone(),
        })?;

    let client = ChatClient::new(id, settings, api_key)?;
    info!(
        model = client.model_id(),
        provider = client.provider().name(),
        endpoint = %client.settings().base_url,
        "created chat client"
    );
    Ok(client)
}

/// Builds the start-up client, retrying a bounded number of times.
#[derive(Debug, Clone)]
pub struct ClientInitializer {
    max_retries: u32,
    retry_delay: Duration,
}

impl Default for ClientInitializer {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
        }
    }
}

impl ClientInitializer {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Create a client for `model_id` (or the configured default).
    ///
    /// Makes at most `1 + max_retries` attempts. Gives up early with
    /// [`InitError::Abandoned`] once `liveness` has ended.
    pub async fn initialize(
        &self,
        loader: &ConfigLoader,
        credentials: &dyn CredentialSource,
        model_id: Option<&str>,
        liveness: &Liveness,
    ) -> Result<ChatClient, InitError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match model_id {
                Some(id) => create_client(loader, credentials, Some(id)).await,
                None => {
                    let id = loader.default_model_id().await;
                    create_client(loader, credentials, Some(&id)).await
                }
            };

            if !liveness.is_alive() {
                return Err(InitError::Abandoned { attempts });
            }

            let err = match result {
                Ok(client) => return Ok(client),
                Err(err) => err,
            };

            if attempts > self.max_retries {
                error!(attempts, error = %err, "giving up on API client initialization");
                return Err(InitError::Exhausted { attempts, last: err });
            }

            warn!(attempt = attempts, error = %err, "API client initialization failed, retrying");
            tokio::time::sleep(self.retry_delay).await;

            if !liveness.is_alive() {
                return Err(InitError::Abandoned { attempts });
            }
        }
    }
}
