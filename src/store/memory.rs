use std::sync::{
    atomic::{AtomicUsize, Ordering as AtomicOrdering},
    Mutex, MutexGuard,
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{Collection, Document, Order, Page, Query};

/// In-process collection. Every operation runs under one lock, so set
/// updates are as atomic as their SQL counterparts.
pub struct MemoryCollection<T> {
    docs: Mutex<Vec<T>>,
    reads: AtomicUsize,
}

impl<T: Document> Default for MemoryCollection<T> {
    fn default() -> Self {
        Self {
            docs: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
        }
    }
}

impl<T: Document> MemoryCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read operations served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(AtomicOrdering::SeqCst)
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Vec<T>>> {
        self.docs
            .lock()
            .map_err(|_| anyhow::anyhow!("{} collection lock poisoned", T::TABLE))
    }

    fn matching(docs: &[T], query: &Query<T::Field>) -> Vec<usize> {
        let filter = query.effective_filter(T::EXISTENCE);
        let mut hits: Vec<usize> = docs
            .iter()
            .enumerate()
            .filter(|(_, d)| filter.matches(&|f| d.value(f)))
            .map(|(i, _)| i)
            .collect();
        if !query.sort.is_empty() {
            hits.sort_by(|&a, &b| {
                for (field, order) in &query.sort {
                    let ord = docs[a].value(*field).compare(&docs[b].value(*field));
                    let ord = match order {
                        Order::Asc => ord,
                        Order::Desc => ord.reverse(),
                    };
                    if ord.is_ne() {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }
        hits
    }
}

#[async_trait]
impl<T: Document> Collection<T> for MemoryCollection<T> {
    async fn find_one(&self, query: Query<T::Field>) -> anyhow::Result<Option<T>> {
        self.reads.fetch_add(1, AtomicOrdering::SeqCst);
        let docs = self.lock()?;
        Ok(Self::matching(&docs, &query).first().map(|&i| docs[i].clone()))
    }

    async fn find_many(&self, query: Query<T::Field>, page: Page) -> anyhow::Result<Vec<T>> {
        self.reads.fetch_add(1, AtomicOrdering::SeqCst);
        let docs = self.lock()?;
        let limit = page.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(Self::matching(&docs, &query)
            .into_iter()
            .skip(page.offset.max(0) as usize)
            .take(limit)
            .map(|i| docs[i].clone())
            .collect())
    }

    async fn count(&self, query: Query<T::Field>) -> anyhow::Result<i64> {
        self.reads.fetch_add(1, AtomicOrdering::SeqCst);
        let docs = self.lock()?;
        Ok(Self::matching(&docs, &query).len() as i64)
    }

    async fn create(&self, new: T::New) -> anyhow::Result<T> {
        let doc = T::build(Uuid::new_v4(), new, OffsetDateTime::now_utc());
        self.lock()?.push(doc.clone());
        Ok(doc)
    }

    async fn update_one(&self, query: Query<T::Field>, patch: T::Patch) -> anyhow::Result<Option<T>> {
        let mut docs = self.lock()?;
        let Some(&i) = Self::matching(&docs, &query).first() else {
            return Ok(None);
        };
        docs[i].apply(&patch, OffsetDateTime::now_utc());
        Ok(Some(docs[i].clone()))
    }

    async fn delete_many(&self, query: Query<T::Field>) -> anyhow::Result<u64> {
        let mut docs = self.lock()?;
        let doomed = Self::matching(&docs, &query);
        let before = docs.len();
        let mut index = 0;
        docs.retain(|_| {
            let keep = !doomed.contains(&index);
            index += 1;
            keep
        });
        Ok((before - docs.len()) as u64)
    }
}
