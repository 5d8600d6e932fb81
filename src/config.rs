use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// M-Pesa (Daraja) gateway settings. All values are externally injected;
/// nothing here is hardcoded into the payment service.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct MpesaConfig {
    /// OAuth consumer key for the client-credentials exchange
    pub consumer_key: String,

    /// OAuth consumer secret
    pub consumer_secret: String,

    /// Business short code (till/paybill number)
    pub short_code: String,

    /// Passkey used to derive the time-stamped STK password
    pub passkey: String,

    /// Gateway base URL (sandbox or production)
    #[serde(default = "default_mpesa_base_url")]
    pub base_url: String,

    /// Publicly reachable URL the gateway posts STK callbacks to
    pub callback_url: String,

    /// Shared secret for HMAC verification of callback bodies.
    /// When unset, callbacks are accepted on payload shape alone.
    #[serde(default)]
    pub callback_secret: Option<String>,
}

fn default_mpesa_base_url() -> String {
    "https://sandbox.safaricom.co.ke".to_string()
}

/// Application configuration, loaded from config files and `APP__`-prefixed
/// environment variables and validated before the server starts.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT signing secret (minimum 32 characters)
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// JWT expiration time in seconds
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration: u64,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment ("development", "production", ...)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Mobile-money gateway settings
    pub mpesa: MpesaConfig,
}

fn default_jwt_expiration() -> u64 {
    86_400
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_connect_timeout_secs() -> u64 {
    10
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Load configuration from `config/default.toml`, an environment-specific
/// overlay, and `APP__` environment variables (highest precedence).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = std::env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder();

    let default_path = Path::new(CONFIG_DIR).join("default");
    builder = builder.add_source(File::from(default_path).required(false));

    let env_path = Path::new(CONFIG_DIR).join(&environment);
    builder = builder.add_source(File::from(env_path).required(false));

    builder = builder.add_source(Environment::with_prefix("APP").separator("__"));

    let cfg: AppConfig = builder.build()?.try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    info!(environment = %cfg.environment, "Configuration loaded");
    Ok(cfg)
}

/// Initialize the global tracing subscriber. Safe to call once at startup.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            jwt_secret: "0123456789abcdef0123456789abcdef".into(),
            jwt_expiration: default_jwt_expiration(),
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            mpesa: MpesaConfig {
                consumer_key: "key".into(),
                consumer_secret: "secret".into(),
                short_code: "174379".into(),
                passkey: "passkey".into(),
                base_url: default_mpesa_base_url(),
                callback_url: "https://example.com/api/v1/payments/mpesa/callback".into(),
                callback_secret: None,
            },
        }
    }

    #[test]
    fn short_jwt_secret_is_rejected() {
        let mut cfg = minimal_config();
        cfg.jwt_secret = "short".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn minimal_config_validates() {
        assert!(minimal_config().validate().is_ok());
    }

    #[test]
    fn development_detection_is_case_insensitive() {
        let mut cfg = minimal_config();
        cfg.environment = "Development".into();
        assert!(cfg.is_development());
        cfg.environment = "production".into();
        assert!(!cfg.is_development());
    }
}
