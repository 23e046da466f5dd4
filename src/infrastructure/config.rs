//! Configuration management
//!
//! Settings come from defaults, then an optional YAML file, then
//! `STAGELINE_*` environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `STAGELINE_LOG_LEVEL` | `log_level` |
//! | `STAGELINE_WORKSPACE` | `workspace` |
//! | `STAGELINE_SECRETS_FILE` | `secrets_file` |
//! | `STAGELINE_SECRET_ENV_PREFIX` | `secret_env_prefix` |
//! | `STAGELINE_WEBHOOK_URL` | `webhook_url` |
//! | `STAGELINE_NOTIFY_TIMEOUT_SECS` | `notify_timeout_secs` |
//! | `STAGELINE_MAX_OUTPUT_BYTES` | `max_output_bytes` |
//! | `STAGELINE_KILL_GRACE_MS` | `kill_grace_ms` |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "STAGELINE_";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration YAML
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A value is out of range or malformed
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Description of the problem.
        reason: String,
    },
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level
    pub log_level: String,

    /// Directory stages run in
    pub workspace: PathBuf,

    /// YAML file holding secret values
    pub secrets_file: Option<PathBuf>,

    /// Prefix of environment variables holding secret values
    pub secret_env_prefix: String,

    /// Webhook receiving the final report; reports are logged when unset
    pub webhook_url: Option<String>,

    /// Webhook request timeout
    pub notify_timeout_secs: u64,

    /// Bytes kept per captured output stream
    pub max_output_bytes: usize,

    /// Grace period for draining output after a kill
    pub kill_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            workspace: PathBuf::from("."),
            secrets_file: None,
            secret_env_prefix: "STAGELINE_SECRET_".to_string(),
            webhook_url: None,
            notify_timeout_secs: 10,
            max_output_bytes: 1024 * 1024,
            kill_grace_ms: 500,
        }
    }
}

impl Config {
    /// Loads a YAML file over the defaults
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, or
    /// holds an invalid value.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if given, then applies process environment overrides
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on any load or validation failure.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies `STAGELINE_*` overrides read through `lookup`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unparsable numbers or an invalid
    /// webhook URL.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(workspace) = var("WORKSPACE") {
            self.workspace = PathBuf::from(workspace);
        }
        if let Some(file) = var("SECRETS_FILE") {
            self.secrets_file = Some(PathBuf::from(file));
        }
        if let Some(prefix) = var("SECRET_ENV_PREFIX") {
            self.secret_env_prefix = prefix;
        }
        if let Some(url) = var("WEBHOOK_URL") {
            self.webhook_url = Some(url);
        }
        if let Some(secs) = var("NOTIFY_TIMEOUT_SECS") {
            self.notify_timeout_secs = parse_number("notify_timeout_secs", &secs)?;
        }
        if let Some(bytes) = var("MAX_OUTPUT_BYTES") {
            self.max_output_bytes = parse_number("max_output_bytes", &bytes)?;
        }
        if let Some(ms) = var("KILL_GRACE_MS") {
            self.kill_grace_ms = parse_number("kill_grace_ms", &ms)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Checks value ranges and the webhook URL
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notify_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "notify_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_output_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_output_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.secret_env_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                field: "secret_env_prefix",
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(ref raw) = self.webhook_url {
            let url = url::Url::parse(raw).map_err(|e| ConfigError::Invalid {
                field: "webhook_url",
                reason: e.to_string(),
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid {
                    field: "webhook_url",
                    reason: format!("unsupported scheme '{}'", url.scheme()),
                });
            }
        }
        Ok(())
    }

    /// Webhook request timeout
    #[must_use]
    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    /// Output drain grace period
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        field,
        reason: format!("'{raw}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.secret_env_prefix, "STAGELINE_SECRET_");
        assert_eq!(config.notify_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_file_keeps_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stageline.yaml");
        std::fs::write(&path, "log_level: debug\nwebhook_url: https://hooks.example.com/ci\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.webhook_url.as_deref(), Some("https://hooks.example.com/ci"));
        assert_eq!(config.kill_grace_ms, 500);
    }

    #[test]
    fn test_config_from_missing_file() {
        let result = Config::from_file(Path::new("/nonexistent/stageline.yaml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default()
            .with_overrides(lookup(&[
                ("STAGELINE_LOG_LEVEL", "warn"),
                ("STAGELINE_WORKSPACE", "/var/lib/stageline"),
                ("STAGELINE_MAX_OUTPUT_BYTES", "4096"),
                ("STAGELINE_SECRETS_FILE", ""),
            ]))
            .unwrap();

        assert_eq!(config.log_level, "warn");
        assert_eq!(config.workspace, PathBuf::from("/var/lib/stageline"));
        assert_eq!(config.max_output_bytes, 4096);
        assert!(config.secrets_file.is_none());
    }

    #[test]
    fn test_invalid_overrides() {
        let bad_number =
            Config::default().with_overrides(lookup(&[("STAGELINE_KILL_GRACE_MS", "soon")]));
        assert!(matches!(
            bad_number,
            Err(ConfigError::Invalid {
                field: "kill_grace_ms",
                ..
            })
        ));

        let no_prefix = Config {
            secret_env_prefix: String::new(),
            ..Config::default()
        };
        assert!(matches!(
            no_prefix.validate(),
            Err(ConfigError::Invalid {
                field: "secret_env_prefix",
                ..
            })
        ));

        let bad_url =
            Config::default().with_overrides(lookup(&[("STAGELINE_WEBHOOK_URL", "ftp://example.com")]));
        assert!(matches!(
            bad_url,
            Err(ConfigError::Invalid {
                field: "webhook_url",
                ..
            })
        ));
    }
}
