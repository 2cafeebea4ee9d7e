use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use tracing::warn;

use crate::error::StoreError;

/// Development-only fallback secret. Used only when `allow_default_secret`
/// is explicitly enabled.
const DEFAULT_SECRET: &str = "tokenstore-development-secret";

/// Complete token store configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenStoreConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
}

/// Location and write behaviour of the backing JSON document
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Application data directory (created on demand)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// Serialize read-modify-write cycles within the process
    #[serde(default = "default_serialize_writes")]
    pub serialize_writes: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_file_name() -> String {
    "tokens.json".to_string()
}

fn default_serialize_writes() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            file_name: default_file_name(),
            serialize_writes: default_serialize_writes(),
        }
    }
}

impl StoreConfig {
    pub fn file_path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }
}

/// Encryption secret settings. The secret itself only comes from the
/// environment, never from the TOML file.
#[derive(Clone, Default, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub allow_default_secret: bool,
    #[serde(skip)]
    pub secret: Option<String>,
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("allow_default_secret", &self.allow_default_secret)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl EncryptionConfig {
    /// Returns the secret used for key derivation.
    ///
    /// Without a configured secret this fails unless the development default
    /// has been explicitly allowed.
    pub fn resolve_secret(&self) -> crate::error::Result<String> {
        match self.secret.as_deref() {
            Some(secret) if !secret.is_empty() => Ok(secret.to_string()),
            _ if self.allow_default_secret => {
                warn!("No encryption secret configured, using the development default");
                Ok(DEFAULT_SECRET.to_string())
            }
            _ => Err(StoreError::Config(
                "TOKENSTORE_ENCRYPTION_SECRET is not set and allow_default_secret is false"
                    .to_string(),
            )),
        }
    }
}

impl TokenStoreConfig {
    /// Apply environment overrides on top of file/default values.
    pub fn apply_env(self) -> Self {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TOKENSTORE_DATA_DIR") {
            self.store.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TOKENSTORE_FILE_NAME") {
            self.store.file_name = v;
        }
        if let Some(v) = lookup("TOKENSTORE_SERIALIZE_WRITES") {
            if let Ok(b) = v.parse::<bool>() {
                self.store.serialize_writes = b;
            }
        }
        if let Some(v) = lookup("TOKENSTORE_ALLOW_DEFAULT_SECRET") {
            if let Ok(b) = v.parse::<bool>() {
                self.encryption.allow_default_secret = b;
            }
        }
        if let Some(v) = lookup("TOKENSTORE_ENCRYPTION_SECRET") {
            self.encryption.secret = Some(v);
        }
        self
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<TokenStoreConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: TokenStoreConfig =
        toml::from_str(&contents).context("Failed to parse config file")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = TokenStoreConfig::default();
        assert_eq!(config.store.data_dir, PathBuf::from("data"));
        assert_eq!(config.store.file_name, "tokens.json");
        assert_eq!(config.store.file_path(), PathBuf::from("data/tokens.json"));
        assert!(config.store.serialize_writes);
        assert!(!config.encryption.allow_default_secret);
        assert!(config.encryption.secret.is_none());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [store]
            data_dir = "/var/lib/tokenstore"
            file_name = "oauth.json"
            serialize_writes = false

            [encryption]
            allow_default_secret = true
        "#;

        let config: TokenStoreConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.store.file_path(), PathBuf::from("/var/lib/tokenstore/oauth.json"));
        assert!(!config.store.serialize_writes);
        assert!(config.encryption.allow_default_secret);
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [store]
            file_name = "other.json"
        "#;

        let config: TokenStoreConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.store.file_name, "other.json");
        assert_eq!(config.store.data_dir, PathBuf::from("data")); // Default
        assert!(config.store.serialize_writes); // Default
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TOKENSTORE_DATA_DIR", "/tmp/ts"),
            ("TOKENSTORE_SERIALIZE_WRITES", "false"),
            ("TOKENSTORE_ALLOW_DEFAULT_SECRET", "not-a-bool"),
            ("TOKENSTORE_ENCRYPTION_SECRET", "s3cret"),
        ]
        .into_iter()
        .collect();

        let config = TokenStoreConfig::default()
            .apply_vars(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.store.data_dir, PathBuf::from("/tmp/ts"));
        assert_eq!(config.store.file_name, "tokens.json");
        assert!(!config.store.serialize_writes);
        // Unparseable values are ignored
        assert!(!config.encryption.allow_default_secret);
        assert_eq!(config.encryption.resolve_secret().unwrap(), "s3cret");
    }

    #[test]
    fn test_missing_secret_fails_fast() {
        let encryption = EncryptionConfig::default();
        let err = encryption.resolve_secret().unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));

        let encryption = EncryptionConfig {
            allow_default_secret: false,
            secret: Some(String::new()),
        };
        assert!(encryption.resolve_secret().is_err());
    }

    #[test]
    fn test_default_secret_when_allowed() {
        let encryption = EncryptionConfig {
            allow_default_secret: true,
            secret: None,
        };
        assert_eq!(encryption.resolve_secret().unwrap(), DEFAULT_SECRET);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let encryption = EncryptionConfig {
            allow_default_secret: false,
            secret: Some("hunter2".to_string()),
        };
        let rendered = format!("{:?}", encryption);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
