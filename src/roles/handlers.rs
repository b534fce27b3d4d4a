use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    routing::get,
    Json, Router,
};
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use super::dto::{CreateRoleRequest, ListRolesQuery, UpdateRoleRequest};
use super::repo_types::Role;
use super::services;
use crate::auth::context::RequestContext;
use crate::auth::dto::RoleView;
use crate::error::{ApiResponse, AppResult};
use crate::state::AppState;

pub fn role_routes() -> Router<AppState> {
    Router::new()
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/permissions", get(list_permissions))
        .route("/roles/:id", get(get_role).put(update_role))
}

#[instrument(skip(state, ctx, payload), fields(user_id = %ctx.user_id))]
pub async fn create_role(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<CreateRoleRequest>, JsonRejection>,
) -> AppResult<ApiResponse<Role>> {
    let Json(req) = payload?;
    let role = services::create_role(&state, &ctx, req).await?;
    Ok(ApiResponse::created("Role inserted successfully", role))
}

#[instrument(skip(state, query))]
pub async fn list_roles(
    State(state): State<AppState>,
    query: Result<Query<ListRolesQuery>, QueryRejection>,
) -> AppResult<ApiResponse<Vec<RoleView>>> {
    let Query(q) = query?;
    let (roles, meta) = services::list_roles(&state, q).await?;
    Ok(ApiResponse::ok("Roles loaded successfully", roles).with_meta(json!(meta)))
}

pub async fn list_permissions() -> ApiResponse<Vec<&'static str>> {
    ApiResponse::ok("Permissions loaded successfully", services::permission_keys())
}

#[instrument(skip(state, ctx), fields(user_id = %ctx.user_id))]
pub async fn get_role(
    State(state): State<AppState>,
    ctx: RequestContext,
    id: Result<Path<Uuid>, PathRejection>,
) -> AppResult<ApiResponse<RoleView>> {
    let Path(id) = id?;
    let role = services::get_role(&state, &ctx, id).await?;
    Ok(ApiResponse::ok("Role loaded successfully", role))
}

#[instrument(skip(state, ctx, payload), fields(user_id = %ctx.user_id))]
pub async fn update_role(
    State(state): State<AppState>,
    ctx: RequestContext,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> AppResult<ApiResponse<Role>> {
    let Path(id) = id?;
    let Json(req) = payload?;
    let role = services::update_role(&state, &ctx, id, req).await?;
    Ok(ApiResponse::ok("Role updated successfully", role))
}
