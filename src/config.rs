//! Models configuration for modelchat.
//!
//! The set of usable models is declared in an external document (YAML by
//! default, TOML when the location ends in `.toml`):
//!
//! ```yaml
//! models:
//!   default: cerebras-llama4
//!   available:
//!     cerebras-llama4:
//!       name: llama-4-scout-17b-16e-instruct
//!       baseUrl: https://api.cerebras.ai/v1/chat/completions
//!       apiKeyEnvName: CEREBRAS_API_KEY
//!       defaultParams:
//!         temperature: 0.7
//!         max_tokens: 1000
//! ```
//!
//! Loading never fails: a missing, unreachable, malformed or inconsistent
//! document degrades to the built-in single-model default. Looking up an
//! unknown model id, on the other hand, is the caller's mistake and is
//! reported as [`ConfigError::ModelNotFound`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ConfigError;

/// How long a successfully loaded document is reused before re-fetching.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Environment variable naming the models document (path or http(s) URL).
pub const CONFIG_ENV: &str = "MODELCHAT_CONFIG";

/// Environment variable selecting the initial model id.
pub const MODEL_ENV: &str = "MODELCHAT_MODEL";

const DEFAULT_MODEL_ID: &str = "cerebras-llama4";

// --- Document Types ---

/// Settings for one configured model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// The provider's model identifier (sent as `model`)
    pub name: String,
    /// Full chat completions endpoint
    pub base_url: String,
    /// Name of the credential holding the API key
    pub api_key_env_name: String,
    /// Provider-specific generation parameters merged into every request
    #[serde(default)]
    pub default_params: serde_json::Map<String, serde_json::Value>,
}

/// The resolved set of models and the default among them.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelsConfig {
    pub default_model_id: String,
    pub available: BTreeMap<String, ModelConfig>,
}

#[derive(Deserialize)]
struct ModelsDocument {
    models: Option<ModelsSection>,
}

#[derive(Deserialize)]
struct ModelsSection {
    default: Option<String>,
    available: Option<BTreeMap<String, ModelConfig>>,
}

/// Serialization format of the models document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Toml,
}

impl DocumentFormat {
    /// Pick the format from a path or URL. Anything but `.toml` is YAML.
    pub fn from_location(location: &str) -> Self {
        let path = location.split(['?', '#']).next().unwrap_or(location);
        if path.to_ascii_lowercase().ends_with(".toml") {
            DocumentFormat::Toml
        } else {
            DocumentFormat::Yaml
        }
    }
}

impl ModelsConfig {
    /// The built-in configuration used whenever the document is unusable.
    pub fn builtin() -> Self {
        let mut default_params = serde_json::Map::new();
        default_params.insert("temperature".to_string(), serde_json::json!(0.7));
        default_params.insert("max_tokens".to_string(), serde_json::json!(1000));

        let mut available = BTreeMap::new();
        available.insert(
            DEFAULT_MODEL_ID.to_string(),
            ModelConfig {
                name: "llama-4-scout-17b-16e-instruct".to_string(),
                base_url: "https://api.cerebras.ai/v1/chat/completions".to_string(),
                api_key_env_name: "CEREBRAS_API_KEY".to_string(),
                default_params,
            },
        );

        Self {
            default_model_id: DEFAULT_MODEL_ID.to_string(),
            available,
        }
    }

    /// Parse and validate a models document.
    pub fn parse(text: &str, format: DocumentFormat) -> Result<Self, ConfigError> {
        let document: ModelsDocument = match format {
            DocumentFormat::Yaml => serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
                reason: e.to_string(),
            })?,
            DocumentFormat::Toml => toml::from_str(text).map_err(|e| ConfigError::Parse {
                reason: e.to_string(),
            })?,
        };

        let section = document.models.ok_or_else(|| ConfigError::Invalid {
            reason: "missing `models` section".to_string(),
        })?;
        let default_model_id = section
            .default
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ConfigError::Invalid {
                reason: "missing `models.default`".to_string(),
            })?;
        let available = section.available.ok_or_else(|| ConfigError::Invalid {
            reason: "missing `models.available`".to_string(),
        })?;

        if !available.contains_key(&default_model_id) {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "default model \"{}\" not found in available models",
                    default_model_id
                ),
            });
        }

        Ok(Self {
            default_model_id,
            available,
        })
    }

    /// Resolve `model_id` (or the default when `None`) to its settings.
    pub fn get(&self, model_id: Option<&str>) -> Result<&ModelConfig, ConfigError> {
        let id = model_id.unwrap_or(&self.default_model_id);
        self.available
            .get(id)
            .ok_or_else(|| ConfigError::ModelNotFound { id: id.to_string() })
    }

    /// All configured model ids, sorted.
    pub fn model_ids(&self) -> Vec<String> {
        self.available.keys().cloned().collect()
    }
}

// --- Sources ---

/// Where the models document comes from.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Fetch the raw document text.
    async fn fetch(&self) -> Result<String, ConfigError>;

    /// Human-readable location, used for logging and format detection.
    fn location(&self) -> &str;

    fn format(&self) -> DocumentFormat {
        DocumentFormat::from_location(self.location())
    }
}

/// A models document on the local filesystem.
pub struct FileSource {
    path: PathBuf,
    location: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let location = path.display().to_string();
        Self { path, location }
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    async fn fetch(&self) -> Result<String, ConfigError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ConfigError::Fetch {
                location: self.location.clone(),
                reason: e.to_string(),
            })
    }

    fn location(&self) -> &str {
        &self.location
    }
}

/// A models document served over HTTP.
pub struct HttpSource {
    url: String,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ConfigSource for HttpSource {
    async fn fetch(&self) -> Result<String, ConfigError> {
        let fetch_err = |e: reqwest::Error| ConfigError::Fetch {
            location: self.url.clone(),
            reason: e.to_string(),
        };

        let response = self.client.get(&self.url).send().await.map_err(fetch_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConfigError::Status {
                location: self.url.clone(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(fetch_err)
    }

    fn location(&self) -> &str {
        &self.url
    }
}

/// Build a source for `location`: http(s) URLs are fetched, anything else
/// is read as a file path.
pub fn source_for(location: &str) -> Box<dyn ConfigSource> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(HttpSource::new(location))
    } else {
        Box::new(FileSource::new(location))
    }
}

/// Default models document location: `~/.modelchat/models.yaml`.
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".modelchat").join("models.yaml"))
}

// --- Loader ---

struct CachedConfig {
    config: Arc<ModelsConfig>,
    loaded_at: Instant,
}

/// Loads the models document and caches successful loads for a fixed window.
///
/// The cache belongs to the loader; share the loader (by reference or `Arc`)
/// to share the cache.
pub struct ConfigLoader {
    source: Box<dyn ConfigSource>,
    ttl: Duration,
    cache: Mutex<Option<CachedConfig>>,
}

impl ConfigLoader {
    pub fn new(source: Box<dyn ConfigSource>) -> Self {
        Self {
            source,
            ttl: CACHE_TTL,
            cache: Mutex::new(None),
        }
    }

    /// Override the cache window. A zero TTL disables caching.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Build a loader from `MODELCHAT_CONFIG`, or the default path.
    pub fn from_env() -> Result<Self> {
        let location = match std::env::var(CONFIG_ENV) {
            Ok(location) if !location.trim().is_empty() => location,
            _ => default_config_path()?.display().to_string(),
        };
        Ok(Self::new(source_for(&location)))
    }

    pub fn location(&self) -> &str {
        self.source.location()
    }

    /// Return the models configuration. Never fails.
    pub async fn load_config(&self) -> Arc<ModelsConfig> {
        if let Some(config) = self.cached() {
            debug!(location = self.location(), "models config cache hit");
            return config;
        }

        match self.fetch_config().await {
            Ok(config) => {
                info!(
                    location = self.location(),
                    models = config.available.len(),
                    default = %config.default_model_id,
                    "loaded models config"
                );
                let config = Arc::new(config);
                self.store(Arc::clone(&config));
                config
            }
            Err(err) => {
                warn!(
                    location = self.location(),
                    error = %err,
                    "falling back to built-in models config"
                );
                Arc::new(ModelsConfig::builtin())
            }
        }
    }

    /// Settings for `model_id`, or for the configured default when `None`.
    pub async fn model_settings(&self, model_id: Option<&str>) -> Result<ModelConfig, ConfigError> {
        let config = self.load_config().await;
        config.get(model_id).cloned()
    }

    pub async fn available_model_ids(&self) -> Vec<String> {
        self.load_config().await.model_ids()
    }

    pub async fn default_model_id(&self) -> String {
        self.load_config().await.default_model_id.clone()
    }

    /// Drop the cached document so the next call re-fetches.
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    async fn fetch_config(&self) -> Result<ModelsConfig, ConfigError> {
        let text = self.source.fetch().await?;
        ModelsConfig::parse(&text, self.source.format())
    }

    fn cached(&self) -> Option<Arc<ModelsConfig>> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .as_ref()
            .filter(|entry| entry.loaded_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.config))
    }

    fn store(&self, config: Arc<ModelsConfig>) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedConfig {
            config,
            loaded_at: Instant::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_MODELS: &str = r#"
models:
  default: gpt
  available:
    gpt:
      name: gpt-4o-mini
      baseUrl: https://api.openai.com/v1/chat/completions
      apiKeyEnvName: OPENAI_API_KEY
      defaultParams:
        temperature: 0.2
        max_tokens: 256
    claude:
      name: claude-3-5-haiku-latest
      baseUrl: https://api.anthropic.com/v1/messages
      apiKeyEnvName: ANTHROPIC_API_KEY
"#;

    fn write_config(dir: &tempfile::TempDir, file: &str, content: &str) -> PathBuf {
        let path = dir.path().join(file);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_yaml() {
        let config = ModelsConfig::parse(TWO_MODELS, DocumentFormat::Yaml).unwrap();
        assert_eq!(config.default_model_id, "gpt");
        assert_eq!(config.model_ids(), vec!["claude", "gpt"]);
        let gpt = config.get(None).unwrap();
        assert_eq!(gpt.name, "gpt-4o-mini");
        assert_eq!(gpt.default_params["max_tokens"], 256);
        assert!(config.get(Some("claude")).unwrap().default_params.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let text = r#"
[models]
default = "local"

[models.available.local]
name = "llama3"
baseUrl = "http://localhost:11434/v1/chat/completions"
apiKeyEnvName = "LOCAL_KEY"

[models.available.local.defaultParams]
temperature = 0.5
"#;
        let config = ModelsConfig::parse(text, DocumentFormat::Toml).unwrap();
        assert_eq!(config.get(None).unwrap().default_params["temperature"], 0.5);
    }

    #[test]
    fn test_parse_rejects_missing_default() {
        let text = "models:\n  available: {}\n";
        let err = ModelsConfig::parse(text, DocumentFormat::Yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_parse_rejects_unknown_default() {
        let text = TWO_MODELS.replace("default: gpt", "default: nope");
        let err = ModelsConfig::parse(&text, DocumentFormat::Yaml).unwrap_err();
        assert!(err.to_string().contains("\"nope\""));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = ModelsConfig::parse("models: [1, 2", DocumentFormat::Yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_get_unknown_id_is_not_found() {
        let config = ModelsConfig::builtin();
        let err = config.get(Some("missing-id")).unwrap_err();
        assert!(matches!(err, ConfigError::ModelNotFound { ref id } if id == "missing-id"));
    }

    #[test]
    fn test_builtin_has_exactly_one_model() {
        let config = ModelsConfig::builtin();
        assert_eq!(config.available.len(), 1);
        let settings = config.get(None).unwrap();
        assert!(settings.base_url.contains("cerebras.ai"));
        assert_eq!(settings.default_params["max_tokens"], 1000);
    }

    #[test]
    fn test_format_from_location() {
        assert_eq!(DocumentFormat::from_location("/etc/models.toml"), DocumentFormat::Toml);
        assert_eq!(
            DocumentFormat::from_location("https://host/models.TOML?v=2"),
            DocumentFormat::Toml
        );
        assert_eq!(DocumentFormat::from_location("models.yaml"), DocumentFormat::Yaml);
        assert_eq!(DocumentFormat::from_location("models"), DocumentFormat::Yaml);
    }

    #[tokio::test]
    async fn test_loader_falls_back_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(Box::new(FileSource::new(dir.path().join("absent.yaml"))));
        let config = loader.load_config().await;
        assert_eq!(*config, ModelsConfig::builtin());
    }

    #[tokio::test]
    async fn test_loader_falls_back_on_invalid_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "models.yaml", "models:\n  default: x\n");
        let loader = ConfigLoader::new(Box::new(FileSource::new(path)));
        assert_eq!(loader.default_model_id().await, DEFAULT_MODEL_ID);
    }

    #[tokio::test]
    async fn test_model_settings_default_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "models.yaml", TWO_MODELS);
        let loader = ConfigLoader::new(Box::new(FileSource::new(path)));

        let settings = loader.model_settings(None).await.unwrap();
        assert_eq!(settings.name, "gpt-4o-mini");
        let settings = loader.model_settings(Some("claude")).await.unwrap();
        assert_eq!(settings.api_key_env_name, "ANTHROPIC_API_KEY");

        let err = loader.model_settings(Some("missing-id")).await.unwrap_err();
        assert!(matches!(err, ConfigError::ModelNotFound { .. }));
        assert_eq!(loader.available_model_ids().await, vec!["claude", "gpt"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loader_caches_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "models.yaml", TWO_MODELS);
        let loader = ConfigLoader::new(Box::new(FileSource::new(&path)));

        assert_eq!(loader.default_model_id().await, "gpt");

        std::fs::write(&path, TWO_MODELS.replace("default: gpt", "default: claude")).unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(loader.default_model_id().await, "gpt");

        tokio::time::advance(CACHE_TTL).await;
        assert_eq!(loader.default_model_id().await, "claude");
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "models.yaml", TWO_MODELS);
        let loader = ConfigLoader::new(Box::new(FileSource::new(&path)));

        assert_eq!(loader.default_model_id().await, "gpt");
        std::fs::write(&path, TWO_MODELS.replace("default: gpt", "default: claude")).unwrap();
        loader.invalidate();
        assert_eq!(loader.default_model_id().await, "claude");
    }

    #[tokio::test]
    async fn test_fallback_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.yaml");
        let loader = ConfigLoader::new(Box::new(FileSource::new(&path)));

        assert_eq!(loader.default_model_id().await, DEFAULT_MODEL_ID);
        std::fs::write(&path, TWO_MODELS).unwrap();
        assert_eq!(loader.default_model_id().await, "gpt");
    }
}
