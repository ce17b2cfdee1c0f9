//! Pricing engine.
//!
//! Pure functions from cart lines, a shipping method, a destination, an
//! optional (already validated) coupon and a tax rate to a priced [`Quote`].
//! Every component is rounded to the currency's minor unit with banker's
//! rounding and the grand total is the exact sum of the rounded components.

mod shipping;

pub use shipping::{ShippingMethod, StoreSettings};

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::coupons;
use crate::domain::aggregates::{CatalogItem, Coupon, DiscountKind};
use crate::domain::value_objects::Currency;
use crate::error::CommerceError;

/// One priced line, built from current catalog data.
#[derive(Clone, Debug, PartialEq)]
pub struct PricingLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub sku: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub unit_weight: Decimal,
}

impl PricingLine {
    pub fn from_catalog(item: &CatalogItem, quantity: i32) -> Self {
        Self {
            product_id: item.product.id,
            variant_id: item.variant.as_ref().map(|v| v.id),
            category_id: item.product.category_id,
            name: item.display_name(),
            sku: item.sku().to_string(),
            quantity,
            unit_price: item.unit_price(),
            unit_weight: item.unit_weight(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QuoteLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub sku: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Quote {
    pub currency: Currency,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub tax_rate: Decimal,
    pub total_weight: Decimal,
    pub lines: Vec<QuoteLine>,
}

pub struct QuoteRequest<'a> {
    pub lines: &'a [PricingLine],
    pub shipping_method: &'a ShippingMethod,
    pub destination_country: &'a str,
    pub coupon: Option<&'a Coupon>,
    pub tax_rate: Decimal,
    pub apply_tax_to_shipping: bool,
    pub currency: &'a Currency,
}

fn priced_lines(lines: &[PricingLine], currency: &Currency) -> Vec<QuoteLine> {
    lines
        .iter()
        .map(|l| {
            let unit_price = currency.round(l.unit_price);
            QuoteLine {
                product_id: l.product_id,
                variant_id: l.variant_id,
                name: l.name.clone(),
                sku: l.sku.clone(),
                quantity: l.quantity,
                unit_price,
                line_total: currency.round(unit_price * Decimal::from(l.quantity)),
            }
        })
        .collect()
}

/// Σ rounded line totals at current prices.
pub fn subtotal(lines: &[PricingLine], currency: &Currency) -> Decimal {
    priced_lines(lines, currency).iter().map(|l| l.line_total).sum()
}

pub fn quote(req: QuoteRequest<'_>) -> Result<Quote, CommerceError> {
    let currency = req.currency;
    if req.lines.is_empty() {
        return Err(CommerceError::invalid("cart", "cart is empty"));
    }
    if let Some(bad) = req.lines.iter().find(|l| l.quantity < 1) {
        return Err(CommerceError::invalid("quantity", format!("{}: quantity must be at least 1", bad.sku)));
    }
    if req.tax_rate < Decimal::ZERO {
        return Err(CommerceError::internal("negative tax rate configured"));
    }

    let lines = priced_lines(req.lines, currency);
    let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();
    let total_weight: Decimal = req.lines.iter().map(|l| l.unit_weight * Decimal::from(l.quantity)).sum();

    let discount = match req.coupon {
        Some(coupon) => currency.round(coupons::discount_for(coupon, subtotal)).min(subtotal),
        None => Decimal::ZERO,
    };
    let free_shipping = req.coupon.map_or(false, |c| c.kind == DiscountKind::FreeShipping);

    let merchandise = subtotal - discount;
    let shipping = if free_shipping {
        Decimal::ZERO
    } else {
        currency.round(req.shipping_method.rate_for(req.destination_country, total_weight, merchandise)?)
    };

    let taxable = if req.apply_tax_to_shipping { merchandise + shipping } else { merchandise };
    let tax = currency.round(taxable * req.tax_rate);
    let total = subtotal + shipping + tax - discount;
    if total < Decimal::ZERO {
        return Err(CommerceError::internal(format!("negative order total {total}")));
    }

    Ok(Quote {
        currency: currency.clone(),
        subtotal,
        discount,
        shipping,
        tax,
        total,
        tax_rate: req.tax_rate,
        total_weight,
        lines,
    })
}
