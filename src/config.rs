//! Environment-driven configuration.
//!
//! `.env` is loaded first (if present) and then individual variables are read
//! and parsed into a typed [`Config`].

use std::{env, str::FromStr, time::Duration};

use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::value_objects::Currency;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentMode {
    Test,
    Live,
}

impl FromStr for PaymentMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "test" | "sandbox" => Ok(Self::Test),
            "live" | "production" => Ok(Self::Live),
            _ => Err(()),
        }
    }
}

/// Store-level fallbacks used when a tenant has no row in `stores`.
#[derive(Clone, Debug)]
pub struct StoreDefaults {
    pub currency: Currency,
    pub default_tax_rate: Decimal,
    pub apply_tax_to_shipping: bool,
    pub cart_ttl: chrono::Duration,
}

impl Default for StoreDefaults {
    fn default() -> Self {
        Self {
            currency: Currency::eur(),
            default_tax_rate: Decimal::ZERO,
            apply_tax_to_shipping: true,
            cart_ttl: chrono::Duration::hours(72),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StripeConfig {
    pub api_key: String,
    pub api_base: String,
    pub webhook_secret: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub port: u16,
    pub nats_url: Option<String>,
    pub notify_subject_prefix: String,
    pub notify_queue_capacity: usize,
    pub payment_mode: PaymentMode,
    pub stripe: Option<StripeConfig>,
    pub gateway_timeout: Duration,
    pub sweep_interval: Duration,
    pub store_defaults: StoreDefaults,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;
        let currency_code = optional("STORE_CURRENCY").unwrap_or_else(|| "EUR".to_string());
        let currency = Currency::new(&currency_code).map_err(|_| ConfigError::Invalid {
            key: "STORE_CURRENCY",
            value: currency_code.clone(),
        })?;

        let stripe = optional("STRIPE_API_KEY").map(|api_key| StripeConfig {
            api_key,
            api_base: optional("STRIPE_API_BASE").unwrap_or_else(|| "https://api.stripe.com".to_string()),
            webhook_secret: optional("STRIPE_WEBHOOK_SECRET"),
        });

        let timeout_secs: u64 = parsed("GATEWAY_TIMEOUT_SECS", 20)?;
        let cart_ttl_hours: i64 = parsed("CART_TTL_HOURS", 72)?;

        Ok(Self {
            database_url,
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            port: parsed("PORT", 8083)?,
            nats_url: optional("NATS_URL"),
            notify_subject_prefix: optional("NOTIFY_SUBJECT_PREFIX").unwrap_or_else(|| "commerce".to_string()),
            notify_queue_capacity: parsed("NOTIFY_QUEUE_CAPACITY", 1024)?,
            payment_mode: parsed("PAYMENT_MODE", PaymentMode::Test)?,
            stripe,
            gateway_timeout: Duration::from_secs(timeout_secs.clamp(10, 30)),
            sweep_interval: Duration::from_secs(parsed("SWEEP_INTERVAL_SECS", 300)?),
            store_defaults: StoreDefaults {
                currency,
                default_tax_rate: parsed("DEFAULT_TAX_RATE", Decimal::ZERO)?,
                apply_tax_to_shipping: parsed("APPLY_TAX_TO_SHIPPING", true)?,
                cart_ttl: chrono::Duration::hours(cart_ttl_hours.max(1)),
            },
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
