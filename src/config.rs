//! Configuration management for the gas ledger

use crate::anomaly::DetectorConfig;
use crate::error::ChainError;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Environment variable that overrides `server.api_token`.
pub const API_TOKEN_ENV: &str = "API_TOKEN";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_api_token")]
    pub api_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            api_token: default_api_token(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ChainError> {
        toml::from_str(s).map_err(|e| ChainError::Config(format!("Invalid config: {}", e)))
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        if self.database.path.is_empty() {
            return Err(ChainError::Config("database.path must be set in config.toml".to_string()));
        }

        if self.server.api_token.is_empty() {
            return Err(ChainError::Config("server.api_token must not be empty".to_string()));
        }

        self.detector.validate()
    }
}

/// Load `path`, falling back to defaults when the file does not exist, then
/// apply environment overrides and validate.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ChainError> {
    let path = path.as_ref();
    let mut config = if path.exists() {
        let config_str = fs::read_to_string(path)
            .map_err(|e| ChainError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Config::from_toml_str(&config_str)?
    } else {
        // Provide sane defaults when config.toml is absent
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    if let Ok(token) = std::env::var(API_TOKEN_ENV) {
        if !token.is_empty() {
            config.server.api_token = token;
        }
    }

    config.validate()?;
    Ok(config)
}

fn default_api_port() -> u16 {
    8000
}

fn default_api_token() -> String {
    "securetoken".to_string()
}

fn default_db_path() -> String {
    "./data/gasledger.db".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.server.api_port, 8000);
        assert_eq!(config.database.path, "./data/gasledger.db");
        assert_eq!(config.detector, DetectorConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml_str(
            r#"
            [server]
            api_port = 9100

            [detector]
            threshold = 4.5
            update_on_anomaly = false
            "#,
        )
        .unwrap();
        assert_eq!(config.server.api_port, 9100);
        assert_eq!(config.server.api_token, "securetoken");
        assert_eq!(config.detector.threshold, 4.5);
        assert_eq!(config.detector.warmup, 5);
        assert!(!config.detector.update_on_anomaly);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = Config::from_toml_str("[database]\npath = \"\"").unwrap();
        assert!(matches!(config.validate(), Err(ChainError::Config(_))));

        let config = Config::from_toml_str("[detector]\nthreshold = -1.0").unwrap();
        assert!(config.validate().is_err());

        assert!(Config::from_toml_str("[server]\napi_port = \"x\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[database]\npath = \"/tmp/ledger.db\"\n[detector]\nwarmup = 10\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.database.path, "/tmp/ledger.db");
        assert_eq!(config.detector.warmup, 10);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.database.path, "./data/gasledger.db");
    }
}
