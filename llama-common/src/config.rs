//! Validated configuration and YAML loading shared by the workspace crates

use crate::error::{ErrorCategory, LlamaError};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;
use thiserror::Error;

/// Configuration that can check itself after deserialization.
pub trait ValidatedConfig:
    Send + Sync + Clone + Debug + Serialize + for<'de> Deserialize<'de>
{
    type Error: std::error::Error + Send + Sync + 'static;

    /// Validate the configuration, returning an error if invalid
    fn validate(&self) -> Result<(), Self::Error>;

    /// Merge this configuration with defaults, preferring this config's values
    fn merge_with_defaults(self, defaults: Self) -> Self;

    /// Get a description of what this configuration controls
    fn description() -> &'static str;
}

/// Errors raised while reading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl LlamaError for ConfigError {
    fn category(&self) -> ErrorCategory {
        match self {
            ConfigError::Io { .. } => ErrorCategory::System,
            ConfigError::Parse(_) | ConfigError::Invalid(_) => ErrorCategory::User,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "CONFIG_IO",
            ConfigError::Parse(_) => "CONFIG_PARSE",
            ConfigError::Invalid(_) => "CONFIG_INVALID",
        }
    }
}

/// Parse a configuration from YAML and validate it.
pub fn from_yaml_str<T: ValidatedConfig>(yaml: &str) -> Result<T, ConfigError> {
    let config: T = serde_yaml_ng::from_str(yaml)?;
    config
        .validate()
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(config)
}

/// Load a configuration from a YAML file and validate it.
pub fn load_yaml_config<T: ValidatedConfig>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    tracing::debug!("Loading {} from {}", T::description(), path.display());
    from_yaml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::io::Write;
    use thiserror::Error;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct PoolConfig {
        contexts: u32,
        model: String,
    }

    #[derive(Error, Debug)]
    enum PoolConfigError {
        #[error("contexts must be greater than 0")]
        NoContexts,
        #[error("model path cannot be empty")]
        NoModel,
    }

    impl ValidatedConfig for PoolConfig {
        type Error = PoolConfigError;

        fn validate(&self) -> Result<(), Self::Error> {
            if self.contexts == 0 {
                return Err(PoolConfigError::NoContexts);
            }
            if self.model.is_empty() {
                return Err(PoolConfigError::NoModel);
            }
            Ok(())
        }

        fn merge_with_defaults(self, defaults: Self) -> Self {
            Self {
                contexts: if self.contexts != 0 {
                    self.contexts
                } else {
                    defaults.contexts
                },
                model: if !self.model.is_empty() {
                    self.model
                } else {
                    defaults.model
                },
            }
        }

        fn description() -> &'static str {
            "Context pool settings"
        }
    }

    #[test]
    fn test_merge_prefers_explicit_values() {
        let partial = PoolConfig {
            contexts: 0,
            model: "/models/7b.gguf".to_string(),
        };
        let merged = partial.merge_with_defaults(PoolConfig {
            contexts: 4,
            model: "/models/default.gguf".to_string(),
        });
        assert_eq!(merged.contexts, 4);
        assert_eq!(merged.model, "/models/7b.gguf");
    }

    #[test]
    fn test_from_yaml_str_validates() {
        let ok: PoolConfig = from_yaml_str("contexts: 3\nmodel: m.gguf\n").unwrap();
        assert_eq!(ok.contexts, 3);

        let err = from_yaml_str::<PoolConfig>("contexts: 0\nmodel: m.gguf\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(err.error_code(), "CONFIG_INVALID");
        assert!(err.to_string().contains("contexts must be greater than 0"));

        let err = from_yaml_str::<PoolConfig>("contexts: [nope]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_yaml_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "contexts: 2").unwrap();
        writeln!(file, "model: /models/chat.gguf").unwrap();

        let config: PoolConfig = load_yaml_config(file.path()).unwrap();
        assert_eq!(config.contexts, 2);
        assert_eq!(config.model, "/models/chat.gguf");
    }

    #[test]
    fn test_load_yaml_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_yaml_config::<PoolConfig>(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert_eq!(err.category(), ErrorCategory::System);
    }
}
