// Configuration Management
//
// This crate handles all configuration loading for the OIDC demo. It
// provides:
// - Configuration structs and deserialization
// - File loading logic with environment overrides for secrets
// - Default values for everything that is not deployment-specific
//
// This keeps configuration concerns separate from the auth core.

use std::path::Path;
use thiserror::Error;

pub mod types;

// Re-export all configuration types
pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found. Tried paths: {paths}")]
    FileNotFound { paths: String },

    #[error("Failed to read configuration file: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {source}")]
    ParseError {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration loading interface
impl AppConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides for secrets.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = serde_yaml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        // Try different config locations in order
        let config_paths = ["config/config.yaml", "config.yaml", "config/default.yaml"];

        for path in &config_paths {
            if std::path::Path::new(path).exists() {
                return Self::load_from_file(path);
            }
        }

        Err(ConfigError::FileNotFound {
            paths: config_paths.join(", "),
        })
    }

    /// Secrets may be supplied via the environment instead of the file.
    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("OIDC_CLIENT_SECRET") {
            self.oidc.client_secret = secret;
        }
        if let Ok(secret) = std::env::var("TOKEN_SIGNING_SECRET") {
            self.token.signing_secret = secret;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.oidc.issuer_url.is_empty() {
            return Err(ConfigError::Invalid("oidc.issuer_url must be set".into()));
        }
        if self.oidc.client_id.is_empty() {
            return Err(ConfigError::Invalid("oidc.client_id must be set".into()));
        }
        if self.token.signing_secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "token.signing_secret must be at least 32 bytes".into(),
            ));
        }
        Ok(())
    }
}
