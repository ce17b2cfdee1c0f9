//! Caller context resolved from trusted upstream headers.

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::auth::Principal;
use crate::error::CommerceError;

pub const STORE_HEADER: HeaderName = HeaderName::from_static("x-store-id");
pub const USER_HEADER: HeaderName = HeaderName::from_static("x-user-id");
pub const ROLE_HEADER: HeaderName = HeaderName::from_static("x-user-role");
pub const SESSION_HEADER: HeaderName = HeaderName::from_static("x-session-id");

#[derive(Clone, Debug)]
pub struct RequestContext {
    pub store_id: Uuid,
    pub principal: Principal,
    /// Guest session minted for this request because none was sent.
    pub minted_session: Option<String>,
}

impl RequestContext {
    /// Attaches a freshly minted guest session to the response.
    pub fn respond(&self, body: impl IntoResponse) -> Response {
        let mut response = body.into_response();
        if let Some(session) = &self.minted_session {
            if let Ok(value) = HeaderValue::from_str(session) {
                response.headers_mut().insert(SESSION_HEADER, value);
            }
        }
        response
    }
}

fn header<'a>(parts: &'a Parts, name: &HeaderName) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = CommerceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let store_id = header(parts, &STORE_HEADER)
            .ok_or_else(|| CommerceError::invalid("x-store-id", "store header is required"))?
            .parse::<Uuid>()
            .map_err(|_| CommerceError::invalid("x-store-id", "store id must be a UUID"))?;

        if let Some(user) = header(parts, &USER_HEADER) {
            let user_id = user
                .parse::<Uuid>()
                .map_err(|_| CommerceError::invalid("x-user-id", "user id must be a UUID"))?;
            let principal = match header(parts, &ROLE_HEADER) {
                Some(role) if role.eq_ignore_ascii_case("admin") => Principal::Admin { user_id },
                _ => Principal::Customer { user_id },
            };
            return Ok(Self { store_id, principal, minted_session: None });
        }

        match header(parts, &SESSION_HEADER) {
            Some(session) if session.len() <= 128 => Ok(Self {
                store_id,
                principal: Principal::guest(session),
                minted_session: None,
            }),
            Some(_) => Err(CommerceError::invalid("x-session-id", "session id is too long")),
            None => {
                let session = Uuid::new_v4().simple().to_string();
                tracing::debug!("guest session minted");
                Ok(Self {
                    store_id,
                    principal: Principal::guest(session.clone()),
                    minted_session: Some(session),
                })
            }
        }
    }
}
