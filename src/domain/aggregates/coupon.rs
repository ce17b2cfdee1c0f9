//! Coupon Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    Percentage,
    FixedAmount,
    FreeShipping,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Coupon {
    pub id: Uuid,
    pub store_id: Uuid,
    pub code: String,
    pub kind: DiscountKind,
    /// Percent (0-100) for percentage coupons, currency amount for fixed ones.
    pub value: Decimal,
    pub minimum_purchase: Option<Decimal>,
    pub maximum_discount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub per_user_limit: Option<i32>,
    pub current_usage: i32,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub allowed_product_ids: Vec<Uuid>,
    pub excluded_product_ids: Vec<Uuid>,
    pub allowed_category_ids: Vec<Uuid>,
    pub excluded_category_ids: Vec<Uuid>,
    pub first_order_only: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    /// Codes are matched case-insensitively and stored upper-case.
    pub fn normalize_code(code: &str) -> String { code.trim().to_uppercase() }

    pub fn is_exhausted(&self) -> bool {
        self.usage_limit.map_or(false, |limit| self.current_usage >= limit)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CouponUsage {
    pub id: Uuid,
    pub coupon_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    pub discount_amount: Decimal,
    pub created_at: DateTime<Utc>,
}
