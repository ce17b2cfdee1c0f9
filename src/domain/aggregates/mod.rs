//! Aggregates module
pub mod product;
pub mod cart;
pub mod coupon;
pub mod order;
pub mod payment;
pub mod returns;

pub use product::{CatalogItem, InventoryReason, InventoryTransaction, Product, StockTarget, Variant};
pub use cart::{Cart, CartItem, CartOwner, CartView, LineOptions};
pub use coupon::{Coupon, CouponUsage, DiscountKind};
pub use order::{Address, Order, OrderItem, OrderStatus, OrderStatusHistory, PaymentStatus, TransitionFacts};
pub use payment::{Payment, PaymentMethod, PaymentRefund};
pub use returns::{Return, ReturnLine, ReturnReason, ReturnStatus, ReturnStatusHistory};
