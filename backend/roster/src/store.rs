//! # Document Store
//!
//! Opaque key-value document storage the roster is persisted to.
//!
//! - `get`: whole record, or `None` when the document has never been written
//! - `set`: full overwrite, only used when a roster is first materialized
//! - `update`: merge of the named fields into an existing document
//!
//! No ordering is promised between concurrent calls. Every caller writes
//! disjoint fields or accepts last-writer-wins.
use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{document::Record, error::StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, doc: &DocRef) -> Result<Option<Record>, StoreError>;

    async fn set(&self, doc: &DocRef, record: Record) -> Result<(), StoreError>;

    /// Fails with [`StoreError::NotFound`] when the document does not exist.
    async fn update(&self, doc: &DocRef, patch: Record) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Get(DocRef),
    Set(DocRef, Record),
    Update(DocRef, Record),
}

#[derive(Default)]
struct MemoryInner {
    documents: HashMap<DocRef, Record>,
    log: Vec<StoreOp>,
    failing_writes: u32,
}

/// In-process store. Keeps a log of every call for inspection.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, doc: DocRef, record: Record) {
        self.inner.lock().documents.insert(doc, record);
    }

    pub fn document(&self, doc: &DocRef) -> Option<Record> {
        self.inner.lock().documents.get(doc).cloned()
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.inner.lock().log.clone()
    }

    pub fn gets(&self) -> usize {
        self.count(|op| matches!(op, StoreOp::Get(_)))
    }

    pub fn sets(&self) -> usize {
        self.count(|op| matches!(op, StoreOp::Set(..)))
    }

    pub fn updates(&self) -> Vec<Record> {
        self.inner
            .lock()
            .log
            .iter()
            .filter_map(|op| match op {
                StoreOp::Update(_, patch) => Some(patch.clone()),
                _ => None,
            })
            .collect()
    }

    /// The next `count` writes fail with a retryable backend error.
    pub fn fail_writes(&self, count: u32) {
        self.inner.lock().failing_writes = count;
    }

    fn count(&self, predicate: impl Fn(&StoreOp) -> bool) -> usize {
        self.inner.lock().log.iter().filter(|op| predicate(op)).count()
    }
}

impl MemoryInner {
    fn injected_failure(&mut self) -> Result<(), StoreError> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(StoreError::Backend("injected write failure".into()));
        }

        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, doc: &DocRef) -> Result<Option<Record>, StoreError> {
        let mut inner = self.inner.lock();
        inner.log.push(StoreOp::Get(doc.clone()));

        Ok(inner.documents.get(doc).cloned())
    }

    async fn set(&self, doc: &DocRef, record: Record) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.log.push(StoreOp::Set(doc.clone(), record.clone()));
        inner.injected_failure()?;

        inner.documents.insert(doc.clone(), record);
        Ok(())
    }

    async fn update(&self, doc: &DocRef, patch: Record) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.log.push(StoreOp::Update(doc.clone(), patch.clone()));
        inner.injected_failure()?;

        let document = inner
            .documents
            .get_mut(doc)
            .ok_or_else(|| StoreError::NotFound(doc.clone()))?;
        document.extend(patch);

        Ok(())
    }
}
