use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::StoreDefaults;
use crate::domain::value_objects::Currency;
use crate::error::CommerceError;

/// Per-tenant pricing policy; falls back to [`StoreDefaults`] when a store
/// has no row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoreSettings {
    pub store_id: Uuid,
    pub currency: String,
    pub apply_tax_to_shipping: bool,
    pub default_tax_rate: Decimal,
}

impl StoreSettings {
    pub fn from_defaults(store_id: Uuid, defaults: &StoreDefaults) -> Self {
        Self {
            store_id,
            currency: defaults.currency.code().to_string(),
            apply_tax_to_shipping: defaults.apply_tax_to_shipping,
            default_tax_rate: defaults.default_tax_rate,
        }
    }

    pub fn currency(&self) -> Result<Currency, CommerceError> {
        Currency::new(&self.currency).map_err(|e| CommerceError::internal(format!("store {}: {e}", self.store_id)))
    }
}

/// A row of the configured shipping-rate table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ShippingMethod {
    pub id: Uuid,
    pub store_id: Uuid,
    pub code: String,
    pub name: String,
    pub base_rate: Decimal,
    /// Added per kilogram of total cart weight.
    pub per_kg_rate: Decimal,
    /// Merchandise total (after discount) at which shipping becomes free.
    pub free_shipping_threshold: Option<Decimal>,
    /// ISO country codes served; empty means everywhere.
    pub countries: Vec<String>,
    pub min_delivery_days: Option<i32>,
    pub max_delivery_days: Option<i32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ShippingMethod {
    /// Flat-rate method serving every destination.
    pub fn flat(code: &str, rate: Decimal) -> Self {
        Self {
            id: Uuid::now_v7(),
            store_id: Uuid::nil(),
            code: code.to_string(),
            name: code.to_string(),
            base_rate: rate,
            per_kg_rate: Decimal::ZERO,
            free_shipping_threshold: None,
            countries: Vec::new(),
            min_delivery_days: None,
            max_delivery_days: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn serves(&self, country: &str) -> bool {
        self.countries.is_empty() || self.countries.iter().any(|c| c.eq_ignore_ascii_case(country))
    }

    pub fn rate_for(&self, country: &str, weight: Decimal, merchandise: Decimal) -> Result<Decimal, CommerceError> {
        if !self.is_active {
            return Err(CommerceError::invalid("shipping_method", format!("shipping method {} is not available", self.code)));
        }
        if !self.serves(country) {
            return Err(CommerceError::invalid(
                "shipping_method",
                format!("shipping method {} does not deliver to {country}", self.code),
            ));
        }
        if self.free_shipping_threshold.map_or(false, |t| merchandise >= t) {
            return Ok(Decimal::ZERO);
        }
        Ok(self.base_rate + self.per_kg_rate * weight)
    }
}
