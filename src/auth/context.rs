//! Per-request authorization.
//!
//! [`authorize`] walks one request through: bearer extraction, signature
//! and expiry check, user and role load, revocation check, activation and
//! approval gate, role presence. The result is an immutable
//! [`RequestContext`] handed to the handler as an extractor.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::claims::Claims;
use super::repo_types::{User, UserField};
use crate::error::{AppError, AppResult};
use crate::roles::permissions::{Permission, PermissionSet};
use crate::roles::repo_types::{Role, RoleField};
use crate::state::AppState;
use crate::store::Filter;

/// Path segments that skip the activation/approval gate.
const GATE_EXEMPT: [&str; 3] = ["otp-verify", "reset-otp", "logout"];

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub access_token: String,
    pub user: User,
    pub role: Role,
    pub permissions: PermissionSet,
    pub role_name: String,
    pub claims: Claims,
}

impl RequestContext {
    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(permission)
    }

    /// Forbidden with `msg` unless the caller's role grants `permission`.
    pub fn require(&self, permission: Permission, msg: &str) -> AppResult<()> {
        if self.can(permission) {
            Ok(())
        } else {
            warn!(user_id = %self.user_id, %permission, "permission denied");
            Err(AppError::forbidden(msg))
        }
    }
}

pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let header = header?.trim();
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn is_gate_exempt(path: &str) -> bool {
    path.split('/').any(|seg| GATE_EXEMPT.contains(&seg))
}

pub async fn authorize(state: &AppState, path: &str, authorization: Option<&str>) -> AppResult<RequestContext> {
    let token = bearer_token(authorization).ok_or_else(|| AppError::unauthorized("Invalid access token"))?;

    // Signature and expiry first: a dead token never costs a store read.
    let claims = state.tokens.verify(token).map_err(|e| {
        debug!(error = %e, "bearer token rejected");
        AppError::from(e)
    })?;

    let user = state
        .users
        .find_one(Filter::eq(UserField::Id, claims.sub).into())
        .await?
        .ok_or_else(|| AppError::unauthorized("User Not Found. Please create a new account."))?;

    // Soft-deleted roles are skipped by the live scope and count as absent.
    let role = match user.role_id {
        Some(role_id) => state.roles.find_one(Filter::eq(RoleField::Id, role_id).into()).await?,
        None => None,
    };

    if !user.holds_token(token) {
        warn!(user_id = %user.id, "revoked token presented");
        return Err(AppError::unauthorized(
            "Expired Authentication Token. Please log in again to obtain a new token",
        ));
    }

    if !is_gate_exempt(path) {
        if !user.is_activated {
            return Err(AppError::validation(
                "Account Verification Required. Please verify your account to continue",
            ));
        }
        if !user.is_approved {
            return Err(AppError::validation("Account approval Required"));
        }
    }

    let role = role.ok_or_else(|| AppError::forbidden("Role not found."))?;

    Ok(RequestContext {
        user_id: user.id,
        access_token: token.to_string(),
        permissions: role.permissions,
        role_name: role.name.clone(),
        role,
        user,
        claims,
    })
}

#[async_trait]
impl FromRequestParts<AppState> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok());
        authorize(state, parts.uri.path(), header).await
    }
}
