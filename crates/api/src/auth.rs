//! Caller identity
//!
//! Credentials are verified by the upstream gateway, which forwards the
//! caller's user id in a trusted header. This module only lifts that id into
//! a request extension.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName},
    middleware::Next,
    response::Response,
};
use gigdesk_shared::UserId;

use crate::config::ConfigError;
use crate::error::ApiError;

/// Authenticated caller, available to handlers as `Extension<AuthUser>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
}

/// State for the auth middleware
#[derive(Debug, Clone)]
pub struct AuthState {
    pub identity_header: HeaderName,
}

impl AuthState {
    pub fn new(identity_header: &str) -> Result<Self, ConfigError> {
        let identity_header = HeaderName::try_from(identity_header)
            .map_err(|_| ConfigError::Invalid("IDENTITY_HEADER", identity_header.to_string()))?;
        Ok(Self { identity_header })
    }

    /// Read the caller from request headers
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
        let raw = headers
            .get(&self.identity_header)
            .ok_or(ApiError::Unauthorized)?
            .to_str()
            .map_err(|_| ApiError::Unauthorized)?;

        let user_id = raw.trim().parse::<UserId>().map_err(|_| {
            tracing::warn!(header = %self.identity_header, "Malformed caller identity");
            ApiError::Unauthorized
        })?;

        Ok(AuthUser { user_id })
    }
}

/// Reject requests without a caller identity
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_user = auth_state.authenticate(req.headers())?;
    req.extensions_mut().insert(auth_user);
    Ok(next.run(req).await)
}
