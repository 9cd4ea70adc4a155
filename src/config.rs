//! Configuration for the loyalty ledger.

use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming a TOML config file.
pub const CONFIG_PATH_ENV: &str = "LOYALTY_CONFIG";

/// Environment variable overriding the provider timeout, in milliseconds.
pub const PROVIDER_TIMEOUT_ENV: &str = "LOYALTY_PROVIDER_TIMEOUT_MS";

/// Ledger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name, used in log lines
    pub service_name: String,

    /// Provider call configuration
    pub provider: ProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "loyalty-ledger".to_string(),
            provider: ProviderConfig::default(),
        }
    }
}

/// Provider call configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Upper bound for a single provider call (milliseconds)
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| LedgerError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    ///
    /// Starts from `LOYALTY_CONFIG` if set, otherwise from defaults, then
    /// applies `LOYALTY_PROVIDER_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Config::from_file(path)?,
            Err(_) => Config::default(),
        };

        if let Ok(timeout) = std::env::var(PROVIDER_TIMEOUT_ENV) {
            config.provider.timeout_ms = timeout.trim().parse().map_err(|_| {
                LedgerError::Config(format!(
                    "{} must be a number of milliseconds, got '{}'",
                    PROVIDER_TIMEOUT_ENV, timeout
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.provider.timeout_ms == 0 {
            return Err(LedgerError::Config(
                "provider.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "loyalty-ledger");
        assert_eq!(config.provider.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml("[provider]\ntimeout_ms = 250\n").unwrap();
        assert_eq!(config.provider.timeout_ms, 250);
        assert_eq!(config.service_name, "loyalty-ledger");
    }

    #[test]
    fn test_rejects_zero_timeout() {
        assert!(matches!(
            Config::from_toml("[provider]\ntimeout_ms = 0\n"),
            Err(LedgerError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(Config::from_toml("provider = 3").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "service_name = \"points\"").unwrap();
        writeln!(file, "[provider]").unwrap();
        writeln!(file, "timeout_ms = 100").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.service_name, "points");
        assert_eq!(config.provider.timeout_ms, 100);
    }
}
