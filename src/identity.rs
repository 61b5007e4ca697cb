//! Caller identity extraction.
//!
//! Authentication happens upstream; the gateway forwards the resolved
//! identity as `x-user-id` (registered user) or `x-guest-id` (anonymous
//! browser session). Extraction itself never fails; handlers decide how
//! much identity they require.

use axum::{extract::FromRequestParts, http::request::Parts, http::HeaderMap};

use crate::error::{AppError, Result};

/// Identity of the caller as asserted by the gateway.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub user_id: Option<String>,
    pub guest_id: Option<String>,
}

impl Caller {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        Self {
            user_id: header("x-user-id"),
            guest_id: header("x-guest-id"),
        }
    }

    /// Require any identity. User identity wins when both are present.
    pub fn require(&self) -> Result<&str> {
        self.user_id
            .as_deref()
            .or(self.guest_id.as_deref())
            .ok_or(AppError::Unauthorized)
    }

    /// Require a registered user (claiming an order needs an account).
    pub fn require_user(&self) -> Result<&str> {
        self.user_id.as_deref().ok_or(AppError::Unauthorized)
    }

    /// Owner columns for scoped queries: `(user_id, guest_id)` with the
    /// user identity taking precedence.
    pub fn owner_parts(&self) -> (Option<&str>, Option<&str>) {
        match self.user_id.as_deref() {
            Some(user) => (Some(user), None),
            None => (None, self.guest_id.as_deref()),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        Ok(Caller::from_headers(&parts.headers))
    }
}
