//! Coupon validator.
//!
//! Evaluation is pure: the caller loads the coupon, the user's usage count and
//! prior-order count inside its transaction and hands them in.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{Coupon, DiscountKind};
use crate::error::CommerceError;
use crate::pricing::PricingLine;

pub const USAGE_LIMIT_REACHED: &str = "usage limit reached";

/// Everything outside the coupon row that eligibility depends on.
#[derive(Clone, Debug)]
pub struct CouponContext<'a> {
    pub user_id: Option<Uuid>,
    pub subtotal: Decimal,
    pub lines: &'a [PricingLine],
    /// Usages of this coupon already recorded for `user_id`.
    pub user_usage: i64,
    /// Completed (non-cancelled) orders previously placed by `user_id`.
    pub prior_orders: i64,
    pub now: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CouponVerdict {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub discount: Decimal,
}

impl CouponVerdict {
    fn rejected(reason: impl Into<String>) -> Self {
        Self { valid: false, reason: Some(reason.into()), discount: Decimal::ZERO }
    }

    /// Turns a rejection into a coupon error carrying the reason.
    pub fn into_result(self) -> Result<Decimal, CommerceError> {
        match self.reason {
            Some(reason) if !self.valid => Err(CommerceError::Coupon(reason)),
            _ => Ok(self.discount),
        }
    }
}

/// Raw discount before rounding. Free-shipping coupons discount nothing at
/// the line level; the pricing engine zeroes shipping instead.
pub fn discount_for(coupon: &Coupon, subtotal: Decimal) -> Decimal {
    let raw = match coupon.kind {
        DiscountKind::Percentage => {
            let pct = subtotal * coupon.value / Decimal::ONE_HUNDRED;
            coupon.maximum_discount.map_or(pct, |cap| pct.min(cap))
        }
        DiscountKind::FixedAmount => coupon.value.min(subtotal),
        DiscountKind::FreeShipping => Decimal::ZERO,
    };
    raw.max(Decimal::ZERO)
}

fn line_eligible(coupon: &Coupon, line: &PricingLine) -> bool {
    if coupon.excluded_product_ids.contains(&line.product_id) {
        return false;
    }
    if let Some(category) = line.category_id {
        if coupon.excluded_category_ids.contains(&category) {
            return false;
        }
    }
    if coupon.allowed_product_ids.is_empty() && coupon.allowed_category_ids.is_empty() {
        return true;
    }
    coupon.allowed_product_ids.contains(&line.product_id)
        || line.category_id.map_or(false, |c| coupon.allowed_category_ids.contains(&c))
}

pub fn evaluate(coupon: &Coupon, ctx: &CouponContext<'_>) -> CouponVerdict {
    if !coupon.is_active {
        return CouponVerdict::rejected("coupon is not active");
    }
    if coupon.valid_from.map_or(false, |from| ctx.now < from) {
        return CouponVerdict::rejected("coupon is not valid yet");
    }
    if coupon.valid_until.map_or(false, |until| ctx.now > until) {
        return CouponVerdict::rejected("coupon has expired");
    }
    if coupon.is_exhausted() {
        return CouponVerdict::rejected(USAGE_LIMIT_REACHED);
    }
    // Per-user limits only bind signed-in users; guests have no usage trail.
    if let (Some(limit), Some(_)) = (coupon.per_user_limit, ctx.user_id) {
        if ctx.user_usage >= i64::from(limit) {
            return CouponVerdict::rejected("per-user usage limit reached");
        }
    }
    if let Some(minimum) = coupon.minimum_purchase {
        if ctx.subtotal < minimum {
            return CouponVerdict::rejected(format!("minimum purchase of {minimum} not met"));
        }
    }
    if let Some(line) = ctx.lines.iter().find(|l| !line_eligible(coupon, l)) {
        return CouponVerdict::rejected(format!("{} is not eligible for this coupon", line.sku));
    }
    if coupon.first_order_only {
        match ctx.user_id {
            None => return CouponVerdict::rejected("sign in to use a first-order coupon"),
            Some(_) if ctx.prior_orders > 0 => {
                return CouponVerdict::rejected("coupon is only valid on a first order")
            }
            Some(_) => {}
        }
    }

    CouponVerdict { valid: true, reason: None, discount: discount_for(coupon, ctx.subtotal) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::coupon::fixtures::coupon;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn line(product_id: Uuid, category_id: Option<Uuid>) -> PricingLine {
        PricingLine {
            product_id, variant_id: None, category_id, name: "Widget".into(), sku: "SKU-1".into(),
            quantity: 1, unit_price: dec!(20.00), unit_weight: dec!(0),
        }
    }

    fn ctx<'a>(lines: &'a [PricingLine]) -> CouponContext<'a> {
        CouponContext { user_id: Some(Uuid::new_v4()), subtotal: dec!(20.00), lines, user_usage: 0, prior_orders: 0, now: Utc::now() }
    }

    #[test]
    fn percentage_is_capped() {
        let mut c = coupon("SAVE50", DiscountKind::Percentage, dec!(50));
        assert_eq!(discount_for(&c, dec!(20.00)), dec!(10.00));
        c.maximum_discount = Some(dec!(3.00));
        assert_eq!(discount_for(&c, dec!(20.00)), dec!(3.00));
    }

    #[test]
    fn fixed_amount_never_exceeds_subtotal() {
        let c = coupon("TENOFF", DiscountKind::FixedAmount, dec!(10));
        assert_eq!(discount_for(&c, dec!(4.50)), dec!(4.50));
        assert_eq!(discount_for(&coupon("SHIP", DiscountKind::FreeShipping, dec!(0)), dec!(50)), dec!(0));
    }

    #[test]
    fn exhausted_coupon_reports_usage_limit() {
        let lines = [line(Uuid::new_v4(), None)];
        let mut c = coupon("ONCE", DiscountKind::FixedAmount, dec!(5));
        c.usage_limit = Some(1);
        c.current_usage = 1;
        let verdict = evaluate(&c, &ctx(&lines));
        assert!(!verdict.valid);
        assert_eq!(verdict.reason.as_deref(), Some(USAGE_LIMIT_REACHED));
        assert!(matches!(verdict.into_result(), Err(CommerceError::Coupon(r)) if r == USAGE_LIMIT_REACHED));
    }

    #[test]
    fn validity_window_and_minimum() {
        let lines = [line(Uuid::new_v4(), None)];
        let mut c = coupon("LATER", DiscountKind::Percentage, dec!(10));
        c.valid_from = Some(Utc::now() + Duration::days(1));
        assert_eq!(evaluate(&c, &ctx(&lines)).reason.as_deref(), Some("coupon is not valid yet"));

        c.valid_from = None;
        c.valid_until = Some(Utc::now() - Duration::days(1));
        assert_eq!(evaluate(&c, &ctx(&lines)).reason.as_deref(), Some("coupon has expired"));

        c.valid_until = None;
        c.minimum_purchase = Some(dec!(50));
        assert!(!evaluate(&c, &ctx(&lines)).valid);
    }

    #[test]
    fn per_user_limit_ignores_guests() {
        let lines = [line(Uuid::new_v4(), None)];
        let mut c = coupon("PERUSER", DiscountKind::FixedAmount, dec!(5));
        c.per_user_limit = Some(1);
        let mut context = ctx(&lines);
        context.user_usage = 1;
        assert!(!evaluate(&c, &context).valid);
        context.user_id = None;
        assert!(evaluate(&c, &context).valid);
    }

    #[test]
    fn product_and_category_lists() {
        let allowed_category = Uuid::new_v4();
        let mut c = coupon("SHOES", DiscountKind::Percentage, dec!(10));
        c.allowed_category_ids = vec![allowed_category];

        let ok = [line(Uuid::new_v4(), Some(allowed_category))];
        assert_eq!(evaluate(&c, &ctx(&ok)).discount, dec!(2.00));

        let mixed = [line(Uuid::new_v4(), Some(allowed_category)), line(Uuid::new_v4(), None)];
        assert!(!evaluate(&c, &ctx(&mixed)).valid);

        let banned = Uuid::new_v4();
        c.allowed_category_ids.clear();
        c.excluded_product_ids = vec![banned];
        assert!(!evaluate(&c, &ctx(&[line(banned, None)])).valid);
    }

    #[test]
    fn first_order_only() {
        let lines = [line(Uuid::new_v4(), None)];
        let mut c = coupon("WELCOME", DiscountKind::FixedAmount, dec!(5));
        c.first_order_only = true;
        let mut context = ctx(&lines);
        assert!(evaluate(&c, &context).valid);
        context.prior_orders = 1;
        assert!(!evaluate(&c, &context).valid);
        context.user_id = None;
        assert!(!evaluate(&c, &context).valid);
    }
}
