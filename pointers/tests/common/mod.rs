#![allow(dead_code)]

use pointers::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Ulid,
    pub title: String,
    pub score: i64,
}

pointable!(Post, table = "posts", id = "01J9Y8PX0000000000000000A1", fields = ["title", "score"]);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Ulid,
    pub body: String,
    pub deleted_at: Option<String>,
}

pointable!(Comment, table = "comments", id = "01J9Y8PX0000000000000000C1", fields = ["body", "deleted_at"]);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Ulid,
    pub label: String,
    pub hidden: bool,
}

pointable!(Tag, table = "tags", id = "01J9Y8PX0000000000000000T1", fields = ["label", "hidden"], builder = visible_tags);

/// Tags hide `hidden` rows unless overridden.
pub struct VisibleTags;

impl QueryBuilder for VisibleTags {
    fn build(&self, table: &TableDescriptor, filters: &[Filter], _options: &QueryOptions) -> Result<Query, AppError> {
        Ok(Query::from_table(&table.table_name)
            .filters(filters.iter().cloned())
            .default_filter(Some(Filter::eq("hidden", false))))
    }
}

pub fn visible_tags() -> Arc<dyn QueryBuilder> {
    Arc::new(VisibleTags)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub id: Ulid,
    pub label: String,
}

virtual_pointable!(Badge, table = "badges", id = "01J9Y8PX0000000000000000B1", convert = badge_row);

pub fn badge_row(pointer: &Pointer) -> Row {
    Row::with_id(pointer.id()).with("label", "virtual")
}

pub fn decls() -> Vec<TableDecl> {
    vec![Post::DECL, Comment::DECL, Tag::DECL, Badge::DECL]
}

pub type TestStore = Arc<InstrumentedStore<RedbStore>>;

pub fn store(name: &str) -> TestStore {
    let store = Arc::new(InstrumentedStore::new(RedbStore::temp(name).unwrap()));
    store.inner().migrate(&decls()).unwrap();
    store
}

pub fn setup(name: &str) -> (Resolver, TestStore) {
    let store = store(name);
    let resolver = Resolver::builder(store.clone()).declare_all(decls()).build();
    (resolver, store)
}

pub fn post(title: &str, score: i64) -> Post {
    Post { id: Ulid::new(), title: title.to_string(), score }
}

pub fn comment(body: &str) -> Comment {
    Comment { id: Ulid::new(), body: body.to_string(), deleted_at: None }
}

pub fn tag(label: &str) -> Tag {
    Tag { id: Ulid::new(), label: label.to_string(), hidden: false }
}

/// A cache whose every call fails.
pub struct BrokenCache;

impl Cache for BrokenCache {
    fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    fn put(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    fn invalidate(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

/// Only lets named users through, and only to their own rows.
pub struct OwnRowsOnly;

impl PermissionFilter for OwnRowsOnly {
    fn apply(&self, query: Query, options: &QueryOptions) -> Result<Query, AppError> {
        match &options.current_user {
            Some(user) => Ok(query.filter(Filter::eq("owner", user.as_str()))),
            None => Err(AppError::PermissionDenied(format!("anonymous read of {}", query.table))),
        }
    }
}

/// A store that is down.
pub struct DownStore;

impl Store for DownStore {
    fn fetch_by_ids(&self, _table: &str, _columns: &[String], _ids: &[Ulid]) -> Result<Vec<Row>, StoreError> {
        Err(StoreError::Unavailable("timeout".into()))
    }

    fn fetch(&self, _query: &Query) -> Result<Vec<Row>, StoreError> {
        Err(StoreError::Unavailable("timeout".into()))
    }

    fn columns(&self, _table: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Unavailable("timeout".into()))
    }
}
