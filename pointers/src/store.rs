use crate::query::Query;
use crate::row::Row;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use ulid::Ulid;

/// Type rows: one per entity type the store knows (`id`, `table`).
pub const TABLES_TABLE: &str = "pointers_table";
/// Universal handle table: one row per pointable record (`id`, `table_id`).
pub const POINTERS_TABLE: &str = "pointers_pointer";

#[derive(Debug, Error)]
pub enum StoreError {

    #[error("table `{0}` does not exist")]
    MissingTable(String),

    #[error("row has no valid `id`")]
    InvalidRow,

    #[error("id {id} already belongs to table {owner}")]
    IdConflict { id: Ulid, owner: String },

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeouts, cancellations and lost connections reported by a driver.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// The relational backing store, reduced to what resolution needs.
pub trait Store: Send + Sync {
    /// Rows of `table` whose id is in `ids`, projected to `columns` (all when empty).
    fn fetch_by_ids(&self, table: &str, columns: &[String], ids: &[Ulid]) -> Result<Vec<Row>, StoreError>;

    /// Rows matching the query's predicate, ordered, paged and projected as it asks.
    fn fetch(&self, query: &Query) -> Result<Vec<Row>, StoreError>;

    /// Column names of a table, for tables without a compiled schema.
    fn columns(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// Bumped whenever any table gains a column. Cached column lists are keyed on it.
    fn columns_epoch(&self) -> u64 {
        0
    }
}

/// Counts every call that reaches the wrapped store, per table.
pub struct InstrumentedStore<S> {
    inner: S,
    total: AtomicUsize,
    by_table: Mutex<HashMap<String, usize>>,
}

impl<S: Store> InstrumentedStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, total: AtomicUsize::new(0), by_table: Mutex::new(HashMap::new()) }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn queries(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn queries_for(&self, table: &str) -> usize {
        self.by_table.lock().map(|m| m.get(table).copied().unwrap_or(0)).unwrap_or(0)
    }

    pub fn reset(&self) {
        self.total.store(0, Ordering::SeqCst);
        if let Ok(mut m) = self.by_table.lock() {
            m.clear();
        }
    }

    fn record(&self, table: &str) {
        self.total.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut m) = self.by_table.lock() {
            *m.entry(table.to_string()).or_insert(0) += 1;
        }
    }
}

impl<S: Store> Store for InstrumentedStore<S> {
    fn fetch_by_ids(&self, table: &str, columns: &[String], ids: &[Ulid]) -> Result<Vec<Row>, StoreError> {
        self.record(table);
        self.inner.fetch_by_ids(table, columns, ids)
    }

    fn fetch(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        self.record(&query.table);
        self.inner.fetch(query)
    }

    fn columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        self.record(table);
        self.inner.columns(table)
    }

    fn columns_epoch(&self) -> u64 {
        self.inner.columns_epoch()
    }
}
