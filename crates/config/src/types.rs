use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub oidc: OidcConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub token: TokenConfig,
    #[serde(default)]
    pub jwks: JwksConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::host")]
    pub host: String,
    #[serde(default = "defaults::port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: defaults::port(),
        }
    }
}

/// Logging Configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
    /// One of "pretty", "compact", "json".
    #[serde(default = "defaults::log_format")]
    pub format: String,
    /// Per-module level overrides, appended to the env filter.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            format: defaults::log_format(),
            modules: HashMap::new(),
        }
    }
}

/// Identity-provider settings. Endpoints are derived from the issuer URL
/// following Keycloak's layout: `{issuer}/protocol/openid-connect/...`.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcConfig {
    pub issuer_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default = "defaults::scopes")]
    pub scopes: Vec<String>,
}

impl OidcConfig {
    pub fn authorization_endpoint(&self) -> String {
        format!("{}/protocol/openid-connect/auth", self.issuer_url)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/protocol/openid-connect/token", self.issuer_url)
    }

    pub fn jwks_endpoint(&self) -> String {
        format!("{}/protocol/openid-connect/certs", self.issuer_url)
    }

    pub fn userinfo_endpoint(&self) -> String {
        format!("{}/protocol/openid-connect/userinfo", self.issuer_url)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Hard cap on session lifetime, regardless of activity.
    #[serde(default = "defaults::session_absolute_ttl")]
    pub absolute_ttl_secs: u64,
    /// Sliding window renewed on each access.
    #[serde(default = "defaults::session_idle_ttl")]
    pub idle_ttl_secs: u64,
    /// Set the `Secure` cookie attribute (enable in production).
    #[serde(default)]
    pub cookie_secure: bool,
    #[serde(default = "defaults::session_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            absolute_ttl_secs: defaults::session_absolute_ttl(),
            idle_ttl_secs: defaults::session_idle_ttl(),
            cookie_secure: false,
            sweep_interval_secs: defaults::session_sweep_interval(),
        }
    }
}

/// Locally-issued token settings (the service's own short-lived HS256
/// tokens handed to API clients).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub signing_secret: String,
    #[serde(default = "defaults::token_issuer")]
    pub issuer: String,
    #[serde(default = "defaults::token_audience")]
    pub audience: String,
    #[serde(default = "defaults::token_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwksConfig {
    #[serde(default = "defaults::jwks_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "defaults::http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: defaults::jwks_refresh_interval(),
            http_timeout_secs: defaults::http_timeout(),
        }
    }
}

mod defaults {
    pub fn host() -> String {
        "0.0.0.0".to_string()
    }

    pub fn port() -> u16 {
        8080
    }

    pub fn log_level() -> String {
        "info".to_string()
    }

    pub fn log_format() -> String {
        "pretty".to_string()
    }

    pub fn scopes() -> Vec<String> {
        vec![
            "openid".to_string(),
            "profile".to_string(),
            "email".to_string(),
        ]
    }

    pub fn session_absolute_ttl() -> u64 {
        86_400
    }

    pub fn session_idle_ttl() -> u64 {
        3_600
    }

    pub fn session_sweep_interval() -> u64 {
        300
    }

    pub fn token_issuer() -> String {
        "oidc-demo".to_string()
    }

    pub fn token_audience() -> String {
        "oidc-demo-api".to_string()
    }

    pub fn token_ttl() -> u64 {
        3_600
    }

    pub fn jwks_refresh_interval() -> u64 {
        600
    }

    pub fn http_timeout() -> u64 {
        5
    }
}
