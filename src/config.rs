use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::rate_limiter::{Endpoint, RateLimitPolicy};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_RATE_LIMIT_BACKEND: &str = "in-memory";
const DEFAULT_RATE_LIMIT_NAMESPACE: &str = "checkout:rl";
const DEFAULT_CURRENCY: &str = "INR";
const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.razorpay.com/v1";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Redis connection URL (rate limiter backend)
    pub redis_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// HS256 secret shared with the identity provider that issues bearer tokens
    #[validate(length(min = 32, message = "jwt_secret must be at least 32 characters"))]
    pub jwt_secret: String,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,
    /// Upper bound for any single query or write
    #[serde(default = "default_db_statement_timeout_secs")]
    #[validate(range(min = 1, message = "db_statement_timeout_secs must be at least 1"))]
    pub db_statement_timeout_secs: u64,

    /// Rate limiter backend: "in-memory", "redis" or "database"
    #[serde(default = "default_rate_limit_backend")]
    #[validate(custom = "validate_rate_limit_backend")]
    pub rate_limit_backend: String,

    /// Namespace for rate limiter keys
    #[serde(default = "default_rate_limit_namespace")]
    pub rate_limit_namespace: String,

    /// Order creation budget per window
    #[serde(default = "default_create_order_limit")]
    pub rate_limit_create_order_requests: u32,
    #[serde(default = "default_short_window_secs")]
    pub rate_limit_create_order_window_secs: u64,

    /// Payment verification budget per window
    #[serde(default = "default_verify_payment_limit")]
    pub rate_limit_verify_payment_requests: u32,
    #[serde(default = "default_short_window_secs")]
    pub rate_limit_verify_payment_window_secs: u64,

    /// Budget for every other endpoint
    #[serde(default = "default_default_limit")]
    pub rate_limit_default_requests: u32,
    #[serde(default = "default_long_window_secs")]
    pub rate_limit_default_window_secs: u64,

    /// Payment gateway API base url
    #[serde(default = "default_gateway_base_url")]
    pub gateway_base_url: String,

    /// Gateway key id (public, handed to the client checkout)
    pub gateway_key_id: String,

    /// Gateway key secret (basic-auth password toward the gateway)
    #[validate(length(min = 8, message = "gateway_key_secret must be at least 8 characters"))]
    pub gateway_key_secret: String,

    /// Secret used to verify payment callback signatures; defaults to the key secret
    #[serde(default)]
    pub payment_signature_secret: Option<String>,

    /// Gateway request timeout (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Currency used for every order
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3, message = "currency must be a 3-letter code"))]
    pub currency: String,

    /// Smallest accepted order amount in minor units
    #[serde(default = "default_min_amount_minor_units")]
    pub min_amount_minor_units: i64,

    /// Largest accepted order amount in minor units
    #[serde(default = "default_max_amount_minor_units")]
    pub max_amount_minor_units: i64,

    /// Loyalty price multiplier applied to renewal orders
    #[serde(default = "default_renewal_price_multiplier")]
    pub renewal_price_multiplier: Decimal,

    /// Shared secret the external scheduler sends as `x-cron-secret`
    #[serde(default)]
    pub renewal_cron_secret: Option<String>,

    /// When set, the server also runs the renewal batch on this interval
    #[serde(default)]
    pub renewal_interval_secs: Option<u64>,

    /// Where order confirmation payloads are posted; logging only when unset
    #[serde(default)]
    pub confirmation_webhook_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn signature_secret(&self) -> &str {
        self.payment_signature_secret
            .as_deref()
            .unwrap_or(&self.gateway_key_secret)
    }

    pub fn db_statement_timeout(&self) -> Duration {
        Duration::from_secs(self.db_statement_timeout_secs.max(1))
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs.max(1))
    }

    pub fn rate_limit_policy(&self, endpoint: Endpoint) -> RateLimitPolicy {
        let (requests, window_secs) = match endpoint {
            Endpoint::CreateOrder | Endpoint::CreateCodOrder => (
                self.rate_limit_create_order_requests,
                self.rate_limit_create_order_window_secs,
            ),
            Endpoint::VerifyPayment => (
                self.rate_limit_verify_payment_requests,
                self.rate_limit_verify_payment_window_secs,
            ),
            Endpoint::Default => (
                self.rate_limit_default_requests,
                self.rate_limit_default_window_secs,
            ),
        };
        RateLimitPolicy::new(requests, Duration::from_secs(window_secs.max(1)))
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.min_amount_minor_units < 1
            || self.min_amount_minor_units > self.max_amount_minor_units
        {
            errors.add(
                "min_amount_minor_units",
                ValidationError::new("amount bounds must satisfy 1 <= min <= max"),
            );
        }

        if self.renewal_price_multiplier <= Decimal::ZERO
            || self.renewal_price_multiplier > Decimal::ONE
        {
            errors.add(
                "renewal_price_multiplier",
                ValidationError::new("renewal multiplier must be in (0, 1]"),
            );
        }

        if self.is_production() && self.renewal_cron_secret.is_none() {
            errors.add(
                "renewal_cron_secret",
                ValidationError::new("renewal_cron_secret is required in production"),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    10
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    5
}
fn default_db_statement_timeout_secs() -> u64 {
    5
}

fn default_rate_limit_backend() -> String {
    DEFAULT_RATE_LIMIT_BACKEND.to_string()
}
fn default_rate_limit_namespace() -> String {
    DEFAULT_RATE_LIMIT_NAMESPACE.to_string()
}
fn default_create_order_limit() -> u32 {
    10
}
fn default_verify_payment_limit() -> u32 {
    20
}
fn default_default_limit() -> u32 {
    100
}
fn default_short_window_secs() -> u64 {
    60
}
fn default_long_window_secs() -> u64 {
    3600
}

fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    10
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_min_amount_minor_units() -> i64 {
    100
}
fn default_max_amount_minor_units() -> i64 {
    50_000_000
}
fn default_renewal_price_multiplier() -> Decimal {
    dec!(0.90)
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("invalid_log_level")),
    }
}

fn validate_rate_limit_backend(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "in-memory" | "redis" | "database" => Ok(()),
        _ => Err(ValidationError::new("invalid_rate_limit_backend")),
    }
}

pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("checkout_api={},tower_http=info,sea_orm=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);
    let filter = EnvFilter::new(filter_directive);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    if let Err(err) = result {
        // Already initialised (tests, repeated calls).
        eprintln!("tracing already initialised: {}", err);
    }
}

/// Loads configuration from defaults, optional files and `APP__*` environment variables.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://checkout.db?mode=rwc")?
        .set_default("redis_url", "redis://localhost:6379")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.finish()
}

impl AppConfig {
    /// Runs field and cross-field validation.
    pub fn finish(self) -> Result<AppConfig, AppConfigError> {
        self.validate().map_err(|e| {
            error!("Configuration validation failed: {:?}", e);
            AppConfigError::Validation(e)
        })?;

        self.validate_additional_constraints().map_err(|e| {
            error!("Configuration constraint validation failed: {:?}", e);
            AppConfigError::Validation(e)
        })?;

        Ok(self)
    }

    /// A fully-populated configuration for tests and local tooling.
    pub fn for_tests(database_url: impl Into<String>) -> AppConfig {
        AppConfig {
            database_url: database_url.into(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            host: "127.0.0.1".to_string(),
            port: 18_080,
            environment: "test".to_string(),
            log_level: "debug".to_string(),
            log_json: false,
            jwt_secret: "test_secret_key_for_testing_purposes_only_32chars".to_string(),
            auto_migrate: true,
            db_max_connections: 1,
            db_min_connections: 1,
            db_connect_timeout_secs: 5,
            db_idle_timeout_secs: 600,
            db_acquire_timeout_secs: 5,
            db_statement_timeout_secs: 5,
            rate_limit_backend: "in-memory".to_string(),
            rate_limit_namespace: "test:rl".to_string(),
            rate_limit_create_order_requests: default_create_order_limit(),
            rate_limit_create_order_window_secs: default_short_window_secs(),
            rate_limit_verify_payment_requests: default_verify_payment_limit(),
            rate_limit_verify_payment_window_secs: default_short_window_secs(),
            rate_limit_default_requests: default_default_limit(),
            rate_limit_default_window_secs: default_long_window_secs(),
            gateway_base_url: "http://127.0.0.1:9".to_string(),
            gateway_key_id: "rzp_test_key".to_string(),
            gateway_key_secret: "gateway_test_secret".to_string(),
            payment_signature_secret: None,
            gateway_timeout_secs: 2,
            currency: default_currency(),
            min_amount_minor_units: default_min_amount_minor_units(),
            max_amount_minor_units: default_max_amount_minor_units(),
            renewal_price_multiplier: default_renewal_price_multiplier(),
            renewal_cron_secret: Some("cron-secret".to_string()),
            renewal_interval_secs: None,
            confirmation_webhook_url: None,
        }
    }
}
