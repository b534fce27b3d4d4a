use tracing::{info, instrument};
use uuid::Uuid;

use super::dto::{CreateRoleRequest, ListMeta, ListRolesQuery, UpdateRoleRequest};
use super::permissions::{Permission, PermissionSet};
use super::repo_types::{NewRole, Role, RoleField, RolePatch, SUPER_ADMIN};
use crate::auth::context::RequestContext;
use crate::auth::dto::RoleView;
use crate::auth::validation::present;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::store::{Filter, Order, Page, Query};

const NOT_FOUND: &str = "Role not found";

fn default_permissions() -> PermissionSet {
    PermissionSet::empty()
        .with(Permission::ReadRole)
        .with(Permission::ReadOrganization)
}

/// Rejects the reserved name and names already taken by another live role.
async fn check_name(state: &AppState, name: &str, except: Option<Uuid>) -> AppResult<()> {
    if name == SUPER_ADMIN {
        return Err(AppError::validation("Role name is reserved"));
    }
    let mut filter = Filter::eq(RoleField::Name, name);
    if let Some(id) = except {
        filter = filter.and(Filter::ne(RoleField::Id, id));
    }
    if state.roles.find_one(filter.into()).await?.is_some() {
        return Err(AppError::validation("Role already exists"));
    }
    Ok(())
}

#[instrument(skip_all, fields(user_id = %ctx.user_id))]
pub async fn create_role(state: &AppState, ctx: &RequestContext, req: CreateRoleRequest) -> AppResult<Role> {
    ctx.require(Permission::CreateRole, "You do not have permission to create the role")?;
    let name = present(req.name).ok_or_else(|| AppError::validation("name field is required"))?;
    check_name(state, &name, None).await?;

    let role = state
        .roles
        .create(NewRole {
            name,
            permissions: default_permissions().overlay(&req.permissions),
            created_by: Some(ctx.user_id),
        })
        .await?;
    info!(role_id = %role.id, name = %role.name, "role created");
    Ok(role)
}

#[instrument(skip(state))]
pub async fn list_roles(state: &AppState, q: ListRolesQuery) -> AppResult<(Vec<RoleView>, ListMeta)> {
    let mut filter = Filter::eq(RoleField::Status, q.status.unwrap_or(true))
        .and(Filter::ne(RoleField::Name, SUPER_ADMIN));
    if let Some(search) = present(q.search) {
        filter = filter.and(Filter::contains(RoleField::Name, search));
    }
    let limit = q.limit.filter(|l| *l > 0);
    let page = q.page.unwrap_or(1).max(1);
    let window = Page::numbered(Some(page), limit)
        .ok_or_else(|| AppError::validation("Invalid page or limit"))?;

    let total_count = state.roles.count(filter.clone().into()).await?;
    let roles = state
        .roles
        .find_many(
            Query::new(filter).sort_by(RoleField::CreatedAt, Order::Asc),
            window,
        )
        .await?;
    let views: Vec<RoleView> = roles.iter().map(RoleView::from).collect();
    let meta = ListMeta {
        count: views.len(),
        total_count,
        page,
        limit,
    };
    Ok((views, meta))
}

pub fn permission_keys() -> Vec<&'static str> {
    Permission::ALL.iter().map(|p| p.key()).collect()
}

#[instrument(skip(state, ctx))]
pub async fn get_role(state: &AppState, ctx: &RequestContext, id: Uuid) -> AppResult<RoleView> {
    ctx.require(Permission::ReadRole, "You do not have permission to read the role")?;
    let role = state
        .roles
        .find_one(Filter::eq(RoleField::Id, id).into())
        .await?
        .ok_or_else(|| AppError::not_found(NOT_FOUND))?;
    Ok(RoleView::from(&role))
}

#[instrument(skip(state, ctx, req))]
pub async fn update_role(
    state: &AppState,
    ctx: &RequestContext,
    id: Uuid,
    req: UpdateRoleRequest,
) -> AppResult<Role> {
    if req.existence.is_some() {
        ctx.require(Permission::DeleteRole, "You do not have permission to delete the role")?;
    }
    if req.permissions.is_some() {
        ctx.require(
            Permission::UpdateRolePermissions,
            "You do not have permission to update the role permissions",
        )?;
    }
    let plain_edit = req.name.is_some() || req.status.is_some();
    if plain_edit || (req.permissions.is_none() && req.existence.is_none()) {
        ctx.require(Permission::UpdateRole, "You do not have permission to update the role")?;
    }

    let name = present(req.name);
    if let Some(name) = &name {
        check_name(state, name, Some(id)).await?;
    }

    // Soft-deleted roles stay reachable so they can be restored.
    let role = state
        .roles
        .update_one(
            Query::new(Filter::eq(RoleField::Id, id).and(Filter::ne(RoleField::Name, SUPER_ADMIN)))
                .including_deleted(),
            RolePatch {
                name,
                permissions: req.permissions,
                status: req.status,
                existence: req.existence,
                updated_by: Some(ctx.user_id),
            },
        )
        .await?
        .ok_or_else(|| AppError::not_found(NOT_FOUND))?;
    info!(role_id = %role.id, "role updated");
    Ok(role)
}
