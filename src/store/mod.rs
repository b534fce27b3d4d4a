//! Document-store contract shared by the Postgres and in-memory backends.
//!
//! Reads are scoped to live records (`existence = true`) unless a query opts
//! out with [`Query::including_deleted`].

mod filter;
pub mod memory;
pub mod pg;

use async_trait::async_trait;
use sqlx::{postgres::PgRow, query_builder::Separated, FromRow, Postgres};
use time::OffsetDateTime;
use uuid::Uuid;

pub use filter::{Filter, Value};

/// A column of a document that filters and sorts may reference.
pub trait Field: Copy + Eq + std::fmt::Debug + Send + Sync + 'static {
    fn column(self) -> &'static str;
}

/// A record kind stored in one collection/table.
pub trait Document: for<'r> FromRow<'r, PgRow> + Clone + Send + Sync + Unpin + 'static {
    type Field: Field;
    type New: Send + Sync + 'static;
    type Patch: Send + Sync + 'static;

    const TABLE: &'static str;
    /// Comma-separated column list, in the order `bind_row` pushes values.
    const COLUMNS: &'static str;
    /// Soft-delete flag.
    const EXISTENCE: Self::Field;

    fn id(&self) -> Uuid;
    fn value(&self, field: Self::Field) -> Value;
    fn build(id: Uuid, new: Self::New, now: OffsetDateTime) -> Self;
    fn apply(&mut self, patch: &Self::Patch, now: OffsetDateTime);
    fn bind_row(&self, row: &mut Separated<'_, '_, Postgres, &'static str>);
    fn bind_patch(patch: &Self::Patch, set: &mut Separated<'_, '_, Postgres, &'static str>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Live,
    IncludingDeleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct Query<F> {
    pub filter: Filter<F>,
    pub scope: Scope,
    pub sort: Vec<(F, Order)>,
}

impl<F: Field> Query<F> {
    pub fn new(filter: Filter<F>) -> Self {
        Self {
            filter,
            scope: Scope::Live,
            sort: Vec::new(),
        }
    }

    pub fn including_deleted(mut self) -> Self {
        self.scope = Scope::IncludingDeleted;
        self
    }

    pub fn sort_by(mut self, field: F, order: Order) -> Self {
        self.sort.push((field, order));
        self
    }

    /// The filter with the soft-delete scope folded in.
    pub(crate) fn effective_filter(&self, existence: F) -> Filter<F> {
        match self.scope {
            Scope::IncludingDeleted => self.filter.clone(),
            Scope::Live => self.filter.clone().and(Filter::eq(existence, true)),
        }
    }
}

impl<F: Field> From<Filter<F>> for Query<F> {
    fn from(filter: Filter<F>) -> Self {
        Query::new(filter)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: i64,
    pub limit: Option<i64>,
}

impl Page {
    pub fn all() -> Self {
        Self::default()
    }

    /// 1-based page number; `None` page means the first one. `None` when
    /// the offset does not fit in an `i64`.
    pub fn numbered(page: Option<i64>, limit: Option<i64>) -> Option<Self> {
        let page = page.unwrap_or(1).max(1);
        let offset = match limit {
            Some(limit) => (page - 1).checked_mul(limit.max(0))?,
            None => 0,
        };
        Some(Self { offset, limit })
    }
}

/// Add-if-absent / remove-if-present / clear on a string set column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOp {
    Add(String),
    Remove(String),
    Clear,
}

impl SetOp {
    pub(crate) fn apply(&self, set: &mut Vec<String>) {
        match self {
            SetOp::Add(v) => {
                if !set.contains(v) {
                    set.push(v.clone());
                }
            }
            SetOp::Remove(v) => set.retain(|x| x != v),
            SetOp::Clear => set.clear(),
        }
    }

    pub(crate) fn bind(&self, column: &'static str, set: &mut Separated<'_, '_, Postgres, &'static str>) {
        match self {
            SetOp::Add(v) => {
                set.push(format!("{column} = CASE WHEN "));
                set.push_bind_unseparated(v.clone());
                set.push_unseparated(format!(
                    " = ANY({column}) THEN {column} ELSE array_append({column}, "
                ));
                set.push_bind_unseparated(v.clone());
                set.push_unseparated(") END");
            }
            SetOp::Remove(v) => {
                set.push(format!("{column} = array_remove({column}, "));
                set.push_bind_unseparated(v.clone());
                set.push_unseparated(")");
            }
            SetOp::Clear => {
                set.push(format!("{column} = '{{}}'"));
            }
        }
    }
}

#[async_trait]
pub trait Collection<T: Document>: Send + Sync {
    async fn find_one(&self, query: Query<T::Field>) -> anyhow::Result<Option<T>>;
    async fn find_many(&self, query: Query<T::Field>, page: Page) -> anyhow::Result<Vec<T>>;
    async fn count(&self, query: Query<T::Field>) -> anyhow::Result<i64>;
    async fn create(&self, new: T::New) -> anyhow::Result<T>;
    /// Applies `patch` to the first match and returns the updated record.
    async fn update_one(&self, query: Query<T::Field>, patch: T::Patch) -> anyhow::Result<Option<T>>;
    async fn delete_many(&self, query: Query<T::Field>) -> anyhow::Result<u64>;
}
