//! Tenants users may belong to. Read-only from this service: signup only
//! checks that the referenced organization exists.

use serde::Serialize;
use sqlx::{query_builder::Separated, FromRow, Postgres};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::store::{Document, Field, Value};

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub country: Option<String>,
    pub region: Option<String>,
    pub existence: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrganizationField {
    Id,
    Name,
    Existence,
}

impl Field for OrganizationField {
    fn column(self) -> &'static str {
        match self {
            OrganizationField::Id => "id",
            OrganizationField::Name => "name",
            OrganizationField::Existence => "existence",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub name: String,
    pub country: Option<String>,
    pub region: Option<String>,
}

impl Document for Organization {
    type Field = OrganizationField;
    type New = NewOrganization;
    type Patch = std::convert::Infallible;

    const TABLE: &'static str = "organizations";
    const COLUMNS: &'static str = "id, name, country, region, existence, created_at, updated_at";
    const EXISTENCE: OrganizationField = OrganizationField::Existence;

    fn id(&self) -> Uuid {
        self.id
    }

    fn value(&self, field: OrganizationField) -> Value {
        match field {
            OrganizationField::Id => self.id.into(),
            OrganizationField::Name => self.name.clone().into(),
            OrganizationField::Existence => self.existence.into(),
        }
    }

    fn build(id: Uuid, new: NewOrganization, now: OffsetDateTime) -> Self {
        Self {
            id,
            name: new.name,
            country: new.country,
            region: new.region,
            existence: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, patch: &std::convert::Infallible, _now: OffsetDateTime) {
        match *patch {}
    }

    fn bind_row(&self, row: &mut Separated<'_, '_, Postgres, &'static str>) {
        row.push_bind(self.id)
            .push_bind(self.name.clone())
            .push_bind(self.country.clone())
            .push_bind(self.region.clone())
            .push_bind(self.existence)
            .push_bind(self.created_at)
            .push_bind(self.updated_at);
    }

    fn bind_patch(patch: &std::convert::Infallible, _set: &mut Separated<'_, '_, Postgres, &'static str>) {
        match *patch {}
    }
}
