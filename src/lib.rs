//! Commerce transaction core
//!
//! Turns shopping carts into paid, fulfilled orders under concurrent access.
//!
//! ## Features
//! - Carts for signed-in users and guest sessions
//! - Pricing with coupons, shipping methods and tax
//! - Atomic checkout with row-locked inventory
//! - Order and payment state machines with an audit history
//! - Payment gateways (Stripe, offline, sandbox) with webhook reconciliation
//! - Returns, refunds and restocking
//! - Fire-and-forget notifications over NATS

pub mod auth;
pub mod clock;
pub mod config;
pub mod coupons;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod http;
pub mod notify;
pub mod pricing;
pub mod services;
pub mod store;

pub use error::{CommerceError, Result};
