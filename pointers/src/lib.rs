//! pointers gives application code one opaque, globally unique handle for records of any
//! registered entity type, and follows those handles back to the records, singly or in
//! batches, without knowing which table they live in.
//!
//! Types are declared with [`pointable!`] and [`virtual_pointable!`] and collected through
//! `inventory`. The [`Registry`] reconciles them with the type rows of the live store, the
//! [`Dispatcher`] builds per-type queries (custom [`QueryBuilder`]s or the generic one over
//! the store's columns), and the [`Resolver`] resolves handles. Batch loading issues at most
//! one query per type, also for handles nested inside arbitrary data along [`Path`]s.
//!
//! The bundled [`RedbStore`] keeps rows as JSON in [Redb](https://github.com/cberner/redb).

pub mod cache;
pub mod dispatch;
pub mod error;
pub mod forge;
pub mod logger;
pub mod macro_rules;
pub mod pointer;
pub mod preload;
pub mod query;
pub mod registry;
pub mod resolver;
pub mod row;
pub mod settings;
pub mod storage;
pub mod store;
pub mod table;

pub use inventory;
pub use ulid::Ulid;

pub use cache::{Cache, CacheDef, CacheError, CacheFacade, LruCache, NoCache};
pub use dispatch::{Dispatcher, GenericQueryBuilder, PermissionFilter, QueryBuilder, DELETED_AT};
pub use error::AppError;
pub use pointer::{Pointer, TABLE_ID};
pub use preload::{GroupFailure, Path, Preloaded, Step, Tree};
pub use query::{Filter, FilterOp, Order, Query, QueryOptions};
pub use registry::{Discrepancy, LiveTable, Registry, Source, TypeRef};
pub use resolver::{Resolver, ResolverBuilder, Target};
pub use row::{Row, ID};
pub use settings::Settings;
pub use storage::RedbStore;
pub use store::{InstrumentedStore, Store, StoreError, POINTERS_TABLE, TABLES_TABLE};
pub use table::{Pointable, Role, Schema, TableDecl, TableDescriptor};
