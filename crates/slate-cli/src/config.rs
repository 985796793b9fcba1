//! Daemon configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use slate_gateway::SessionConfig;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Per-session tunables.
    pub session: SessionConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Listen address for peer connections.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:4822".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Parse the listen address as a `SocketAddr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.network.listen_addr.parse()?)
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_listen_addr()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.session.instruction_timeout_us == 0 {
            anyhow::bail!("instruction timeout must be non-zero");
        }
        if self.session.idle_timeout_us < self.session.instruction_timeout_us {
            anyhow::bail!("idle timeout must be at least the instruction timeout");
        }
        if self.session.clipboard_cap == 0 || self.session.clipboard_cap > 16 * 1024 * 1024 {
            anyhow::bail!("clipboard cap must be between 1 byte and 16MB");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.listen_addr, "0.0.0.0:4822");
        assert_eq!(config.session.clipboard_cap, 262_144);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.logging.level = "noisy".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        config.session.clipboard_cap = 0;
        assert!(config.validate().is_err());

        config.session.clipboard_cap = 4096;
        config.session.idle_timeout_us = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(
            config.network.listen_addr,
            deserialized.network.listen_addr
        );
        assert_eq!(
            config.session.clipboard_cap,
            deserialized.session.clipboard_cap
        );
    }
}
