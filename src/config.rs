use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::services::payment_gateway::GatewayKind;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "EGP";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 15;
const DEFAULT_INVOICE_DUE_DAYS: i64 = 7;
const DEFAULT_OTP_TTL_SECS: i64 = 300;
const DEFAULT_OTP_COOLDOWN_SECS: i64 = 60;
const DEFAULT_OTP_MAX_ATTEMPTS: i32 = 5;
const DEFAULT_OTP_LOCKOUT_SECS: i64 = 900;
const DEFAULT_SYNTHETIC_EMAIL_DOMAIN: &str = "phone.servicehub.local";
const DEFAULT_NOTIFICATION_TIMEOUT_SECS: u64 = 10;

/// Payment gateway configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentConfig {
    /// Gateway type selecting session shape, signature strategy and payload mapping
    #[serde(default)]
    pub gateway: GatewayKind,

    /// Secret API key used for session creation
    #[serde(default)]
    pub api_key: Option<String>,

    /// Publishable key (Paymob unified checkout URL)
    #[serde(default)]
    pub public_key: Option<String>,

    /// Gateway integration / payment method id (Paymob)
    #[serde(default)]
    pub integration_id: Option<String>,

    /// Override for the gateway API base URL (tests, sandboxes)
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Shared secret for verifying gateway callbacks
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,

    /// Force placeholder sessions even when credentials are present
    #[serde(default)]
    pub placeholder: bool,

    /// Bounded timeout for gateway HTTP calls
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub request_timeout_secs: u64,

    /// Days until a freshly issued invoice is due
    #[serde(default = "default_invoice_due_days")]
    #[validate(range(min = 0, max = 365))]
    pub invoice_due_days: i64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayKind::default(),
            api_key: None,
            public_key: None,
            integration_id: None,
            api_base_url: None,
            webhook_secret: None,
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
            placeholder: false,
            request_timeout_secs: default_gateway_timeout_secs(),
            invoice_due_days: default_invoice_due_days(),
        }
    }
}

impl PaymentConfig {
    /// Non-empty webhook secret, if configured.
    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Whether sessions must be synthesized locally.
    pub fn uses_placeholder(&self) -> bool {
        self.placeholder
            || !self.gateway.supports_sessions()
            || self
                .api_key
                .as_deref()
                .map(|k| k.trim().is_empty())
                .unwrap_or(true)
    }
}

/// Phone verification policy
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct OtpConfig {
    #[serde(default = "default_otp_ttl_secs")]
    #[validate(range(min = 30, max = 3600))]
    pub ttl_secs: i64,

    #[serde(default = "default_otp_cooldown_secs")]
    #[validate(range(min = 0, max = 3600))]
    pub cooldown_secs: i64,

    /// Wrong verification attempts before the phone is blocked
    #[serde(default = "default_otp_max_attempts")]
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: i32,

    #[serde(default = "default_otp_lockout_secs")]
    #[validate(range(min = 60, max = 86400))]
    pub lockout_secs: i64,

    /// Domain used for synthetic emails of phone-only accounts
    #[serde(default = "default_synthetic_email_domain")]
    pub synthetic_email_domain: String,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_otp_ttl_secs(),
            cooldown_secs: default_otp_cooldown_secs(),
            max_attempts: default_otp_max_attempts(),
            lockout_secs: default_otp_lockout_secs(),
            synthetic_email_domain: default_synthetic_email_domain(),
        }
    }
}

/// Outbound notification relay endpoints
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationConfig {
    #[serde(default)]
    pub email_endpoint: Option<String>,
    #[serde(default)]
    pub whatsapp_endpoint: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_notification_timeout_secs")]
    pub timeout_secs: u64,
}

/// Shipping rate table, per parcel, in the platform currency
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShippingRates {
    #[serde(default = "default_local_rate")]
    pub local: Decimal,
    #[serde(default = "default_domestic_rate")]
    pub domestic: Decimal,
    #[serde(default = "default_international_rate")]
    pub international: Decimal,
    /// Flat surcharge added once for express delivery
    #[serde(default = "default_express_surcharge")]
    pub express_surcharge: Decimal,
}

impl Default for ShippingRates {
    fn default() -> Self {
        Self {
            local: default_local_rate(),
            domestic: default_domestic_rate(),
            international: default_international_rate(),
            express_surcharge: default_express_surcharge(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Public base URL used to build placeholder success links
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

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

    /// Currency code for invoices (ISO 4217)
    #[serde(default = "default_currency")]
    #[validate(custom = "validate_currency")]
    pub default_currency: String,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default)]
    #[validate]
    pub payment: PaymentConfig,

    #[serde(default)]
    #[validate]
    pub otp: OtpConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub shipping: ShippingRates,
}

impl AppConfig {
    /// Creates a new configuration with built-in defaults for everything else
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            public_base_url: None,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            default_currency: default_currency(),
            event_channel_capacity: default_event_channel_capacity(),
            payment: PaymentConfig::default(),
            otp: OtpConfig::default(),
            notifications: NotificationConfig::default(),
            shipping: ShippingRates::default(),
        }
    }

    /// Checks if running in the hardened production mode
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Base URL for links handed back to the customer
    pub fn public_base_url(&self) -> String {
        self.public_base_url
            .clone()
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production()
            && self.payment.webhook_secret().is_none()
            && !self.payment.uses_placeholder()
        {
            let mut err = ValidationError::new("payment_webhook_secret_required");
            err.message = Some(
                "Set APP__PAYMENT__WEBHOOK_SECRET when a live payment gateway is configured in production"
                    .into(),
            );
            errors.add("payment", err);
        }

        if self.is_production() && self.payment.uses_placeholder() {
            warn!("Payment gateway runs in placeholder mode in production; sessions will not reach a real gateway");
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_invoice_due_days() -> i64 {
    DEFAULT_INVOICE_DUE_DAYS
}

fn default_otp_ttl_secs() -> i64 {
    DEFAULT_OTP_TTL_SECS
}

fn default_otp_cooldown_secs() -> i64 {
    DEFAULT_OTP_COOLDOWN_SECS
}

fn default_otp_max_attempts() -> i32 {
    DEFAULT_OTP_MAX_ATTEMPTS
}

fn default_otp_lockout_secs() -> i64 {
    DEFAULT_OTP_LOCKOUT_SECS
}

fn default_synthetic_email_domain() -> String {
    DEFAULT_SYNTHETIC_EMAIL_DOMAIN.to_string()
}

fn default_notification_timeout_secs() -> u64 {
    DEFAULT_NOTIFICATION_TIMEOUT_SECS
}

fn default_local_rate() -> Decimal {
    dec!(50)
}

fn default_domestic_rate() -> Decimal {
    dec!(75)
}

fn default_international_rate() -> Decimal {
    dec!(500)
}

fn default_express_surcharge() -> Decimal {
    dec!(100)
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_currency(code: &str) -> Result<(), ValidationError> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("default_currency");
        err.message = Some("Currency must be a 3-letter uppercase ISO 4217 code".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("servicehub_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
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
        .set_default("database_url", "sqlite://servicehub.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(environment: &str) -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            environment.into(),
        )
    }

    #[test]
    fn production_with_live_gateway_requires_webhook_secret() {
        let mut cfg = base_config("production");
        cfg.payment.gateway = GatewayKind::Stripe;
        cfg.payment.api_key = Some("sk_live_123".into());
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.payment.webhook_secret = Some("whsec_abc".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn placeholder_mode_needs_no_secret() {
        let cfg = base_config("production");
        assert!(cfg.payment.uses_placeholder());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn blank_webhook_secret_counts_as_absent() {
        let mut cfg = base_config("development");
        cfg.payment.webhook_secret = Some("   ".into());
        assert!(cfg.payment.webhook_secret().is_none());
    }

    #[test]
    fn currency_validation() {
        assert!(validate_currency("EGP").is_ok());
        assert!(validate_currency("egp").is_err());
        assert!(validate_currency("EURO").is_err());
    }

    #[test]
    fn public_base_url_defaults_to_host_and_port() {
        let mut cfg = base_config("development");
        assert_eq!(cfg.public_base_url(), "http://127.0.0.1:8080");
        cfg.public_base_url = Some("https://portal.example.com/".into());
        assert_eq!(cfg.public_base_url(), "https://portal.example.com");
    }
}
