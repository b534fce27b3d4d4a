use std::marker::PhantomData;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::{Collection, Document, Field, Filter, Order, Page, Query, Value};

/// Postgres-backed collection; one table per document kind.
pub struct PgCollection<T> {
    db: PgPool,
    _doc: PhantomData<fn() -> T>,
}

impl<T: Document> PgCollection<T> {
    pub fn new(db: PgPool) -> Self {
        Self {
            db,
            _doc: PhantomData,
        }
    }
}

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: &Value) {
    match value {
        Value::Text(v) => {
            qb.push_bind(v.clone());
        }
        Value::Uuid(v) => {
            qb.push_bind(*v);
        }
        Value::Bool(v) => {
            qb.push_bind(*v);
        }
        Value::Timestamp(v) => {
            qb.push_bind(*v);
        }
        Value::Null => {
            qb.push("NULL");
        }
    }
}

pub(crate) fn push_filter<F: Field>(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter<F>) {
    match filter {
        Filter::Eq(f, Value::Null) => {
            qb.push(f.column()).push(" IS NULL");
        }
        Filter::Eq(f, v) => {
            qb.push(f.column()).push(" = ");
            push_value(qb, v);
        }
        Filter::Ne(f, Value::Null) => {
            qb.push(f.column()).push(" IS NOT NULL");
        }
        Filter::Ne(f, v) => {
            qb.push(f.column()).push(" IS DISTINCT FROM ");
            push_value(qb, v);
        }
        Filter::Lt(f, v) => {
            qb.push(f.column()).push(" < ");
            push_value(qb, v);
        }
        Filter::Contains(f, needle) => {
            qb.push("strpos(lower(").push(f.column()).push("), lower(");
            qb.push_bind(needle.clone());
            qb.push(")) > 0");
        }
        Filter::Present(f) => {
            qb.push(f.column()).push(" IS NOT NULL");
        }
        Filter::And(parts) | Filter::Or(parts) if parts.is_empty() => {
            qb.push(if matches!(filter, Filter::And(_)) { "TRUE" } else { "FALSE" });
        }
        Filter::And(parts) | Filter::Or(parts) => {
            let joiner = if matches!(filter, Filter::And(_)) { " AND " } else { " OR " };
            qb.push("(");
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    qb.push(joiner);
                }
                push_filter(qb, part);
            }
            qb.push(")");
        }
    }
}

fn push_where<T: Document>(qb: &mut QueryBuilder<'_, Postgres>, query: &Query<T::Field>) {
    qb.push(" WHERE ");
    push_filter(qb, &query.effective_filter(T::EXISTENCE));
}

fn push_order<F: Field>(qb: &mut QueryBuilder<'_, Postgres>, sort: &[(F, Order)]) {
    for (i, (field, order)) in sort.iter().enumerate() {
        qb.push(if i == 0 { " ORDER BY " } else { ", " });
        qb.push(field.column());
        qb.push(match order {
            Order::Asc => " ASC NULLS LAST",
            Order::Desc => " DESC NULLS LAST",
        });
    }
}

pub(crate) fn select_sql<T: Document>(query: &Query<T::Field>, page: Page) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM {}", T::COLUMNS, T::TABLE));
    push_where::<T>(&mut qb, query);
    push_order(&mut qb, &query.sort);
    if let Some(limit) = page.limit {
        qb.push(" LIMIT ").push_bind(limit);
    }
    if page.offset > 0 {
        qb.push(" OFFSET ").push_bind(page.offset);
    }
    qb
}

pub(crate) fn update_sql<T: Document>(
    query: &Query<T::Field>,
    patch: &T::Patch,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", T::TABLE));
    {
        let mut set = qb.separated(", ");
        set.push("updated_at = NOW()");
        T::bind_patch(patch, &mut set);
    }
    qb.push(format!(" WHERE id = (SELECT id FROM {}", T::TABLE));
    push_where::<T>(&mut qb, query);
    push_order(&mut qb, &query.sort);
    qb.push(format!(" LIMIT 1 FOR UPDATE) RETURNING {}", T::COLUMNS));
    qb
}

#[async_trait]
impl<T: Document> Collection<T> for PgCollection<T> {
    async fn find_one(&self, query: Query<T::Field>) -> anyhow::Result<Option<T>> {
        let mut qb = select_sql::<T>(&query, Page { offset: 0, limit: Some(1) });
        let row = qb
            .build_query_as::<T>()
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("find_one in {}", T::TABLE))?;
        Ok(row)
    }

    async fn find_many(&self, query: Query<T::Field>, page: Page) -> anyhow::Result<Vec<T>> {
        let mut qb = select_sql::<T>(&query, page);
        let rows = qb
            .build_query_as::<T>()
            .fetch_all(&self.db)
            .await
            .with_context(|| format!("find_many in {}", T::TABLE))?;
        Ok(rows)
    }

    async fn count(&self, query: Query<T::Field>) -> anyhow::Result<i64> {
        let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", T::TABLE));
        push_where::<T>(&mut qb, &query);
        let (count,): (i64,) = qb
            .build_query_as()
            .fetch_one(&self.db)
            .await
            .with_context(|| format!("count in {}", T::TABLE))?;
        Ok(count)
    }

    async fn create(&self, new: T::New) -> anyhow::Result<T> {
        let doc = T::build(Uuid::new_v4(), new, OffsetDateTime::now_utc());
        let mut qb = QueryBuilder::new(format!("INSERT INTO {} ({}) VALUES (", T::TABLE, T::COLUMNS));
        {
            let mut row = qb.separated(", ");
            doc.bind_row(&mut row);
        }
        qb.push(format!(") RETURNING {}", T::COLUMNS));
        let created = qb
            .build_query_as::<T>()
            .fetch_one(&self.db)
            .await
            .with_context(|| format!("insert into {}", T::TABLE))?;
        debug!(table = T::TABLE, id = %created.id(), "record created");
        Ok(created)
    }

    async fn update_one(&self, query: Query<T::Field>, patch: T::Patch) -> anyhow::Result<Option<T>> {
        let mut qb = update_sql::<T>(&query, &patch);
        let row = qb
            .build_query_as::<T>()
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("update_one in {}", T::TABLE))?;
        Ok(row)
    }

    async fn delete_many(&self, query: Query<T::Field>) -> anyhow::Result<u64> {
        let mut qb = QueryBuilder::new(format!("DELETE FROM {}", T::TABLE));
        push_where::<T>(&mut qb, &query);
        let done = qb
            .build()
            .execute(&self.db)
            .await
            .with_context(|| format!("delete_many in {}", T::TABLE))?;
        Ok(done.rows_affected())
    }
}
