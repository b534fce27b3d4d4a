use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::permissions::{Permission, PermissionSet};

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: Option<String>,
    /// Overlaid on the defaults (`read_role`, `read_organization`).
    #[serde(default)]
    pub permissions: BTreeMap<Permission, bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    /// Replaces the whole set; omitted keys become false.
    pub permissions: Option<PermissionSet>,
    pub status: Option<bool>,
    pub existence: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListRolesQuery {
    pub status: Option<bool>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    pub count: usize,
    pub total_count: i64,
    pub page: i64,
    pub limit: Option<i64>,
}
