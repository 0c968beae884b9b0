//! Credential lookup.
//!
//! A model's `apiKeyEnvName` names a key in a flat key-value source. The
//! process environment is the usual source; an in-memory map is handy when
//! embedding the client or in tests.

use std::collections::HashMap;

/// A flat key-value credential store. Empty values count as absent.
pub trait CredentialSource: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads credentials from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|value| !value.is_empty())
    }
}

/// Credentials held in memory.
#[derive(Debug, Clone, Default)]
pub struct MapCredentials {
    values: HashMap<String, String>,
}

impl MapCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl CredentialSource for MapCredentials {
    fn get(&self, name: &str) -> Option<String> {
        self.values
            .get(name)
            .filter(|value| !value.is_empty())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_credentials() {
        let creds = MapCredentials::new().with("KEY", "secret").with("EMPTY", "");
        assert_eq!(creds.get("KEY").as_deref(), Some("secret"));
        assert_eq!(creds.get("EMPTY"), None);
        assert_eq!(creds.get("OTHER"), None);
    }

    #[test]
    fn test_env_credentials_missing() {
        assert_eq!(EnvCredentials.get("MODELCHAT_TEST_SURELY_UNSET_KEY"), None);
    }
}
