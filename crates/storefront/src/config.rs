//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront
//! - `MERCADOPAGO_ACCESS_TOKEN` - Mercado Pago private access token
//! - `MERCADOPAGO_PUBLIC_KEY` - Mercado Pago public key (card tokenization)
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `MERCADOPAGO_API_BASE` - API base URL (default: <https://api.mercadopago.com>)
//! - `MERCADOPAGO_NOTIFICATION_URL` - Webhook URL sent with each payment
//! - `MERCADOPAGO_STATEMENT_DESCRIPTOR` - Card statement text (default: VERSOS)
//! - `MERCADOPAGO_TIMEOUT_SECS` - HTTP timeout (default: 15)
//! - `CHECKOUT_POLL_INTERVAL_SECS` - Payment status poll interval (default: 3)
//! - `CHECKOUT_POLL_TIMEOUT_SECS` - Give up polling after (default: 600)
//! - `CHECKOUT_INSTALLMENT_DEBOUNCE_MS` - BIN lookup debounce (default: 400)
//! - `CHECKOUT_UTC_OFFSET_HOURS` - Timezone for coupon expiry dates (default: -3)
//! - `CHECKOUT_SHOPPER_IDLE_SECS` - Drop idle carts after (default: 7200)
//! - `CATALOG_PAGE_SIZE` - Verses per catalog page (default: 12)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` / `SENTRY_TRACES_SAMPLE_RATE` - Sampling (default: 1.0 / 0.0)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "put-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: String,
    /// Mercado Pago API configuration
    pub mercado_pago: MercadoPagoConfig,
    /// Checkout timing and coupon rules
    pub checkout: CheckoutConfig,
    /// Catalog paging
    pub catalog: CatalogConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name (e.g. "production")
    pub sentry_environment: Option<String>,
    /// Fraction of errors sent to Sentry
    pub sentry_sample_rate: f32,
    /// Fraction of transactions traced
    pub sentry_traces_sample_rate: f32,
}

/// Mercado Pago API configuration.
///
/// Implements `Debug` manually to redact the access token.
#[derive(Clone)]
pub struct MercadoPagoConfig {
    /// API base URL
    pub api_base: Url,
    /// Private access token (server-side only)
    pub access_token: SecretString,
    /// Public key used for card tokenization
    pub public_key: String,
    /// Webhook URL passed with each payment
    pub notification_url: Option<String>,
    /// Text shown on the buyer's card statement
    pub statement_descriptor: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for MercadoPagoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MercadoPagoConfig")
            .field("api_base", &self.api_base.as_str())
            .field("access_token", &"[REDACTED]")
            .field("public_key", &self.public_key)
            .field("notification_url", &self.notification_url)
            .field("statement_descriptor", &self.statement_descriptor)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Checkout timing and coupon rules.
#[derive(Debug, Clone, Copy)]
pub struct CheckoutConfig {
    /// Interval between payment status checks
    pub poll_interval: Duration,
    /// Stop polling a pending payment after this long
    pub poll_timeout: Duration,
    /// Wait this long after the last BIN change before looking up installments
    pub installment_debounce: Duration,
    /// Fixed timezone in which coupon expiry dates are compared
    pub coupon_utc_offset: FixedOffset,
    /// Idle time after which a shopper's cart and checkout are dropped
    pub shopper_idle_ttl: Duration,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            poll_timeout: Duration::from_secs(600),
            installment_debounce: Duration::from_millis(400),
            coupon_utc_offset: BRASILIA_OFFSET,
            shopper_idle_ttl: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Catalog paging configuration.
#[derive(Debug, Clone, Copy)]
pub struct CatalogConfig {
    /// Verses per page
    pub page_size: u32,
    /// How long loaded pages are cached
    pub cache_ttl: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            page_size: 12,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let host = get_parsed_or_default::<IpAddr>("STOREFRONT_HOST", "127.0.0.1")?;
        let port = get_parsed_or_default::<u16>("STOREFRONT_PORT", "3000")?;
        let base_url = get_required_env("STOREFRONT_BASE_URL")?;
        Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("STOREFRONT_BASE_URL".to_string(), e.to_string())
        })?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            mercado_pago: MercadoPagoConfig::from_env()?,
            checkout: CheckoutConfig::from_env()?,
            catalog: CatalogConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: get_parsed_or_default("SENTRY_SAMPLE_RATE", "1.0")?,
            sentry_traces_sample_rate: get_parsed_or_default("SENTRY_TRACES_SAMPLE_RATE", "0.0")?,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl MercadoPagoConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let api_base = get_parsed_or_default::<Url>(
            "MERCADOPAGO_API_BASE",
            "https://api.mercadopago.com",
        )?;

        Ok(Self {
            api_base,
            access_token: get_validated_secret("MERCADOPAGO_ACCESS_TOKEN")?,
            public_key: get_required_env("MERCADOPAGO_PUBLIC_KEY")?,
            notification_url: get_optional_env("MERCADOPAGO_NOTIFICATION_URL"),
            statement_descriptor: get_env_or_default("MERCADOPAGO_STATEMENT_DESCRIPTOR", "VERSOS"),
            timeout: Duration::from_secs(get_parsed_or_default("MERCADOPAGO_TIMEOUT_SECS", "15")?),
        })
    }
}

impl CheckoutConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let offset_hours: i32 = get_parsed_or_default("CHECKOUT_UTC_OFFSET_HOURS", "-3")?;
        let coupon_utc_offset = FixedOffset::east_opt(offset_hours * 3600).ok_or_else(|| {
            ConfigError::InvalidEnvVar(
                "CHECKOUT_UTC_OFFSET_HOURS".to_string(),
                format!("offset out of range: {offset_hours}"),
            )
        })?;

        Ok(Self {
            poll_interval: Duration::from_secs(get_parsed_or_default(
                "CHECKOUT_POLL_INTERVAL_SECS",
                "3",
            )?),
            poll_timeout: Duration::from_secs(get_parsed_or_default(
                "CHECKOUT_POLL_TIMEOUT_SECS",
                "600",
            )?),
            installment_debounce: Duration::from_millis(get_parsed_or_default(
                "CHECKOUT_INSTALLMENT_DEBOUNCE_MS",
                "400",
            )?),
            coupon_utc_offset,
            shopper_idle_ttl: Duration::from_secs(get_parsed_or_default(
                "CHECKOUT_SHOPPER_IDLE_SECS",
                "7200",
            )?),
        })
    }
}

impl CatalogConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let page_size: u32 = get_parsed_or_default("CATALOG_PAGE_SIZE", "12")?;
        if page_size == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "CATALOG_PAGE_SIZE".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            page_size,
            ..Self::default()
        })
    }
}

/// UTC-03:00, the Brasília offset (no daylight saving since 2019).
pub const BRASILIA_OFFSET: FixedOffset = match FixedOffset::west_opt(3 * 3600) {
    Some(offset) => offset,
    None => panic!("UTC-03:00 is a valid offset"),
};

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn get_parsed_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, &get_env_or_default(key, default))
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1})"
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
