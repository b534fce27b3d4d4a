use serde::Serialize;
use sqlx::{postgres::PgRow, query_builder::Separated, FromRow, Postgres, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use super::permissions::PermissionSet;
use crate::store::{Document, Field, Value};

/// Reserved name of the single all-powerful role.
pub const SUPER_ADMIN: &str = "super_admin";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub permissions: PermissionSet,
    pub status: bool,
    pub existence: bool,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleField {
    Id,
    Name,
    Status,
    Existence,
    CreatedAt,
}

impl Field for RoleField {
    fn column(self) -> &'static str {
        match self {
            RoleField::Id => "id",
            RoleField::Name => "name",
            RoleField::Status => "status",
            RoleField::Existence => "existence",
            RoleField::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewRole {
    pub name: String,
    pub permissions: PermissionSet,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct RolePatch {
    pub name: Option<String>,
    pub permissions: Option<PermissionSet>,
    pub status: Option<bool>,
    pub existence: Option<bool>,
    pub updated_by: Option<Uuid>,
}

impl<'r> FromRow<'r, PgRow> for Role {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            permissions: PermissionSet::from_bits(row.try_get("permissions")?),
            status: row.try_get("status")?,
            existence: row.try_get("existence")?,
            created_by: row.try_get("created_by")?,
            updated_by: row.try_get("updated_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Document for Role {
    type Field = RoleField;
    type New = NewRole;
    type Patch = RolePatch;

    const TABLE: &'static str = "roles";
    const COLUMNS: &'static str =
        "id, name, permissions, status, existence, created_by, updated_by, created_at, updated_at";
    const EXISTENCE: RoleField = RoleField::Existence;

    fn id(&self) -> Uuid {
        self.id
    }

    fn value(&self, field: RoleField) -> Value {
        match field {
            RoleField::Id => self.id.into(),
            RoleField::Name => self.name.clone().into(),
            RoleField::Status => self.status.into(),
            RoleField::Existence => self.existence.into(),
            RoleField::CreatedAt => self.created_at.into(),
        }
    }

    fn build(id: Uuid, new: NewRole, now: OffsetDateTime) -> Self {
        Self {
            id,
            name: new.name,
            permissions: new.permissions,
            status: true,
            existence: true,
            created_by: new.created_by,
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, patch: &RolePatch, now: OffsetDateTime) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(p) = patch.permissions {
            self.permissions = p;
        }
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = patch.existence {
            self.existence = v;
        }
        if patch.updated_by.is_some() {
            self.updated_by = patch.updated_by;
        }
        self.updated_at = now;
    }

    fn bind_row(&self, row: &mut Separated<'_, '_, Postgres, &'static str>) {
        row.push_bind(self.id)
            .push_bind(self.name.clone())
            .push_bind(self.permissions.bits())
            .push_bind(self.status)
            .push_bind(self.existence)
            .push_bind(self.created_by)
            .push_bind(self.updated_by)
            .push_bind(self.created_at)
            .push_bind(self.updated_at);
    }

    fn bind_patch(patch: &RolePatch, set: &mut Separated<'_, '_, Postgres, &'static str>) {
        if let Some(name) = &patch.name {
            set.push("name = ").push_bind_unseparated(name.clone());
        }
        if let Some(p) = patch.permissions {
            set.push("permissions = ").push_bind_unseparated(p.bits());
        }
        if let Some(v) = patch.status {
            set.push("status = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.existence {
            set.push("existence = ").push_bind_unseparated(v);
        }
        if let Some(by) = patch.updated_by {
            set.push("updated_by = ").push_bind_unseparated(by);
        }
    }
}
