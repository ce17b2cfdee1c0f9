//! Caller identity.
//!
//! Authentication happens upstream; the core trusts the principal it is
//! handed and only decides what that principal may touch.

use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{CartOwner, Order};
use crate::error::{CommerceError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Principal {
    Customer { user_id: Uuid },
    Admin { user_id: Uuid },
    Guest { session_id: String },
    /// Background work: sweeps and gateway webhooks.
    System,
}

impl Principal {
    pub fn guest(session_id: impl Into<String>) -> Self {
        Self::Guest { session_id: session_id.into() }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::Customer { user_id } | Self::Admin { user_id } => Some(*user_id),
            Self::Guest { .. } | Self::System => None,
        }
    }

    /// Recorded on history rows; `None` for guests and the system.
    pub fn actor_id(&self) -> Option<Uuid> {
        self.user_id()
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin { .. } | Self::System)
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(CommerceError::forbidden("admin role required"))
        }
    }

    pub fn cart_owner(&self) -> Result<CartOwner> {
        match self {
            Self::Customer { user_id } | Self::Admin { user_id } => Ok(CartOwner::User(*user_id)),
            Self::Guest { session_id } => Ok(CartOwner::Guest(session_id.clone())),
            Self::System => Err(CommerceError::forbidden("the system principal has no cart")),
        }
    }

    /// The user or guest session that placed the order.
    pub fn owns(&self, order: &Order) -> bool {
        match self {
            Self::Customer { user_id } | Self::Admin { user_id } => order.user_id == Some(*user_id),
            Self::Guest { session_id } => order.guest_session_id.as_deref() == Some(session_id.as_str()),
            Self::System => false,
        }
    }

    pub fn can_view(&self, order: &Order) -> bool {
        self.is_admin() || self.owns(order)
    }

    /// Orders outside the caller's reach are reported as absent.
    pub fn ensure_visible(&self, order: &Order) -> Result<()> {
        if self.can_view(order) {
            Ok(())
        } else {
            Err(CommerceError::not_found("order", order.id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::fixtures::order;
    use crate::domain::aggregates::OrderStatus;

    #[test]
    fn owners_and_admins_see_orders() {
        let user = Uuid::new_v4();
        let mut o = order(OrderStatus::Pending);
        o.user_id = Some(user);

        assert!(Principal::Customer { user_id: user }.can_view(&o));
        assert!(Principal::Admin { user_id: Uuid::new_v4() }.can_view(&o));
        let stranger = Principal::Customer { user_id: Uuid::new_v4() };
        assert!(matches!(stranger.ensure_visible(&o), Err(CommerceError::NotFound { .. })));
    }

    #[test]
    fn guests_match_on_session() {
        let mut o = order(OrderStatus::Pending);
        o.user_id = None;
        o.guest_session_id = Some("sess-1".into());
        assert!(Principal::guest("sess-1").owns(&o));
        assert!(!Principal::guest("sess-2").owns(&o));
        assert_eq!(Principal::guest("sess-1").cart_owner().unwrap(), CartOwner::Guest("sess-1".into()));
        assert!(Principal::System.cart_owner().is_err());
    }
}
