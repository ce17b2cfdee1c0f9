//! Value Objects for the commerce core

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// ISO-4217 currency code value object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, MoneyError> {
        let code = code.trim().to_ascii_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(MoneyError::InvalidCurrency(code));
        }
        Ok(Self(code))
    }
    pub fn eur() -> Self { Self("EUR".to_string()) }
    pub fn usd() -> Self { Self("USD".to_string()) }
    pub fn code(&self) -> &str { &self.0 }

    /// Digits after the decimal point in the currency's minor unit.
    pub fn minor_units(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "HUF" => 0,
            "BHD" | "KWD" | "OMR" | "JOD" | "TND" => 3,
            _ => 2,
        }
    }

    /// Banker's rounding to the minor unit.
    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.minor_units(), RoundingStrategy::MidpointNearestEven)
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(&value) }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self { value.0 }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Money value object. Amounts are always held at the currency's minor unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: Currency }

impl Money {
    pub fn new(amount: Decimal, currency: &Currency) -> Self {
        Self { amount: currency.round(amount), currency: currency.clone() }
    }
    pub fn zero(currency: &Currency) -> Self { Self::new(Decimal::ZERO, currency) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &Currency { &self.currency }
    pub fn is_zero(&self) -> bool { self.amount.is_zero() }

    /// Integer amount in the minor unit (cents for EUR), as card gateways expect.
    pub fn to_minor_units(&self) -> Option<i64> {
        (self.amount * Decimal::from(10i64.pow(self.currency.minor_units()))).to_i64()
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        Ok(Money::new(self.amount + other.amount, &self.currency))
    }
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        Ok(Money::new(self.amount - other.amount, &self.currency))
    }
    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.amount * Decimal::from(qty), &self.currency) }

    /// `self × rate`, rounded to the minor unit.
    pub fn scale(&self, rate: Decimal) -> Money { Money::new(self.amount * rate, &self.currency) }

    pub fn min(self, other: Money) -> Money { if other.amount < self.amount { other } else { self } }

    fn same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch { expected: self.currency.clone(), got: other.currency.clone() });
        }
        Ok(())
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, other: Money) -> Money {
        debug_assert_eq!(self.currency, other.currency);
        Money::new(self.amount + other.amount, &self.currency)
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, other: Money) -> Money {
        debug_assert_eq!(self.currency, other.currency);
        Money::new(self.amount - other.amount, &self.currency)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{} {}", self.amount, self.currency) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoneyError { CurrencyMismatch { expected: Currency, got: Currency }, InvalidCurrency(String) }
impl std::error::Error for MoneyError {}
impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CurrencyMismatch { expected, got } => write!(f, "Currency mismatch: expected {expected}, got {got}"),
            Self::InvalidCurrency(code) => write!(f, "Invalid currency code {code:?}"),
        }
    }
}
