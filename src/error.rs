//! Error types.
//!
//! Each boundary gets its own enum. Configuration problems degrade to the
//! built-in default inside the loader, so only `ModelNotFound` ever escapes
//! it. Transport errors never cross `stream_chat`; they are rendered to text
//! and handed to the sink instead.

use thiserror::Error;

/// Errors produced while loading or querying the models configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration resource could not be read at all.
    #[error("failed to fetch models config from {location}: {reason}")]
    Fetch { location: String, reason: String },

    /// The configuration resource answered with a non-success HTTP status.
    #[error("models config request to {location} returned HTTP {status}")]
    Status { location: String, status: u16 },

    /// The document is not valid YAML/TOML for the expected shape.
    #[error("failed to parse models config: {reason}")]
    Parse { reason: String },

    /// The document parsed but is structurally unusable.
    #[error("invalid models config: {reason}")]
    Invalid { reason: String },

    /// The caller asked for a model id that is not configured.
    #[error("model configuration not found for: {id}")]
    ModelNotFound { id: String },
}

/// Errors produced while building a [`crate::llm::ChatClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The credential named by `apiKeyEnvName` is not set.
    #[error("API key {name} is not set in environment variables")]
    MissingCredential { name: String },

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures of a single streaming request.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("API error: {status}{}", status_suffix(.body))]
    Status { status: u16, body: String },

    #[error("response body is empty")]
    MissingBody,

    #[error("stream read error: {0}")]
    Read(String),
}

fn status_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(" {body}")
    }
}

/// Terminal failures of the bounded-retry client initializer.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to initialize API client after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ClientError },

    /// The owner went away while initialization was still retrying.
    #[error("client initialization abandoned after {attempts} attempts")]
    Abandoned { attempts: u32 },
}
