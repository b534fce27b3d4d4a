//! One-shot provisioning of the platform's super admin.

use axum::{extract::rejection::JsonRejection, extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::auth::dto::RoleView;
use crate::auth::password::hash_password;
use crate::auth::repo_types::{NewUser, UserField};
use crate::auth::services::find_duplicates;
use crate::auth::validation::{check_contact, check_password, normalize_email, required};
use crate::error::{ApiResponse, AppError, AppResult};
use crate::roles::permissions::PermissionSet;
use crate::roles::repo_types::{NewRole, Role, RoleField, SUPER_ADMIN};
use crate::state::AppState;
use crate::store::Filter;

#[derive(Debug, Deserialize)]
pub struct SuperAdminRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SuperAdminView {
    pub name: String,
    pub email: String,
    pub role: RoleView,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/super-admin", post(create_super_admin))
}

async fn find_super_role(state: &AppState) -> AppResult<Option<Role>> {
    Ok(state
        .roles
        .find_one(Filter::eq(RoleField::Name, SUPER_ADMIN).into())
        .await?)
}

/// The `super_admin` role, created with every permission on first use.
async fn super_role(state: &AppState) -> AppResult<Role> {
    if let Some(role) = find_super_role(state).await? {
        return Ok(role);
    }
    let created = state
        .roles
        .create(NewRole {
            name: SUPER_ADMIN.to_string(),
            permissions: PermissionSet::all(),
            created_by: None,
        })
        .await;
    match created {
        Ok(role) => Ok(role),
        // A concurrent bootstrap won the unique index.
        Err(e) => {
            warn!(error = %e, "super admin role insert failed; re-reading");
            find_super_role(state).await?.ok_or(AppError::Internal(e))
        }
    }
}

#[instrument(skip_all)]
pub async fn provision(state: &AppState, req: SuperAdminRequest) -> AppResult<SuperAdminView> {
    let name = required("name", req.name)?;
    let password = required("password", req.password)?;
    let email = normalize_email(&required("email", req.email)?);
    let phone = required("phone", req.phone)?;

    let role = super_role(state).await?;
    let holder = state
        .users
        .find_one(Filter::eq(UserField::Role, role.id).into())
        .await?;
    if holder.is_some() {
        return Err(AppError::validation("Super admin Exists"));
    }

    check_contact(Some(&email), Some(&phone))?;
    check_password(&password)?;
    if let Some(msg) = find_duplicates(state, Some(&phone), Some(&email)).await? {
        return Err(AppError::validation(msg));
    }

    let user = state
        .users
        .create(NewUser {
            name: Some(name.clone()),
            email: Some(email.clone()),
            phone: Some(phone),
            password_hash: hash_password(&password)?,
            role_id: Some(role.id),
            is_activated: true,
            is_approved: true,
            ..NewUser::default()
        })
        .await?;
    info!(user_id = %user.id, "super admin provisioned");

    Ok(SuperAdminView {
        name,
        email,
        role: RoleView::from(&role),
    })
}

#[instrument(skip(state, payload))]
pub async fn create_super_admin(
    State(state): State<AppState>,
    payload: Result<Json<SuperAdminRequest>, JsonRejection>,
) -> AppResult<ApiResponse<SuperAdminView>> {
    let Json(req) = payload?;
    let admin = provision(&state, req).await?;
    Ok(ApiResponse::created("Admin signup completed successfully", admin))
}
