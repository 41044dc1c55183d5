use crate::cache::{Cache, CacheDef, CacheFacade, LruCache};
use crate::dispatch::{Dispatcher, PermissionFilter};
use crate::error::AppError;
use crate::pointer::Pointer;
use crate::query::{Filter, Query, QueryOptions};
use crate::registry::{Registry, TypeRef};
use crate::row::Row;
use crate::settings::Settings;
use crate::store::{Store, POINTERS_TABLE};
use crate::table::{TableDecl, TableDescriptor};
use crate::{debug, warn};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use ulid::Ulid;

const POINTER_ROWS: CacheDef<Row> = CacheDef::new("pointer");

/// What to follow: a raw id (looked up in the pointer table) or a handle.
#[derive(Debug, Clone)]
pub enum Target {
    Id(Ulid),
    Pointer(Pointer),
}

impl From<Ulid> for Target {
    fn from(id: Ulid) -> Self {
        Target::Id(id)
    }
}

impl From<Pointer> for Target {
    fn from(pointer: Pointer) -> Self {
        Target::Pointer(pointer)
    }
}

impl From<&Pointer> for Target {
    fn from(pointer: &Pointer) -> Self {
        Target::Pointer(pointer.clone())
    }
}

/// Follows handles to the records they refer to, one at a time or in batches
/// (see [`preload_all`](Resolver::preload_all)).
pub struct Resolver {
    pub(crate) registry: Arc<Registry>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) cache: CacheFacade,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) settings: Settings,
}

pub struct ResolverBuilder {
    store: Arc<dyn Store>,
    decls: Option<Vec<TableDecl>>,
    cache: Option<Arc<dyn Cache>>,
    permission: Option<Arc<dyn PermissionFilter>>,
    settings: Settings,
}

impl ResolverBuilder {
    /// Restricts the registry to explicit declarations instead of every submitted one.
    pub fn declare(mut self, decl: TableDecl) -> Self {
        self.decls.get_or_insert_with(Vec::new).push(decl);
        self
    }

    pub fn declare_all(mut self, decls: impl IntoIterator<Item = TableDecl>) -> Self {
        self.decls.get_or_insert_with(Vec::new).extend(decls);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn permission(mut self, permission: Arc<dyn PermissionFilter>) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Resolver {
        let settings = self.settings;
        let backend = self.cache.unwrap_or_else(|| Arc::new(LruCache::new(settings.cache.capacity)));
        let cache = CacheFacade::new(backend, settings.cache.ttl_s, settings.cache.negative_ttl_s);
        let ttl = settings.registry.ttl_s;
        let registry = match self.decls {
            Some(decls) => Registry::new(self.store.clone(), cache.clone(), decls, ttl),
            None => Registry::from_inventory(self.store.clone(), cache.clone(), ttl),
        };
        let dispatcher = Dispatcher::new(self.store.clone(), cache.clone(), self.permission);
        Resolver { registry: Arc::new(registry), store: self.store, cache, dispatcher, settings }
    }
}

impl Resolver {
    pub fn builder(store: Arc<dyn Store>) -> ResolverBuilder {
        ResolverBuilder { store, decls: None, cache: None, permission: None, settings: Settings::default() }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The handle stored for `id` in the pointer table.
    pub fn pointer(&self, id: Ulid) -> Result<Pointer, AppError> {
        let row = self.cache.get_or_compute_opt(&POINTER_ROWS, &id.to_string(), || {
            let rows = self
                .store
                .fetch_by_ids(POINTERS_TABLE, &[], &[id])
                .map_err(|err| AppError::store(format!("looking up pointer {}", id), err))?;
            Ok(rows.into_iter().next())
        })?;
        row.and_then(Pointer::from_row).ok_or_else(|| AppError::not_found(format!("pointer {}", id)))
    }

    /// Positional handles for `ids`, read with a single query.
    pub fn pointers(&self, ids: &[Ulid]) -> Result<Vec<Option<Pointer>>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .store
            .fetch_by_ids(POINTERS_TABLE, &[], ids)
            .map_err(|err| AppError::store(format!("looking up {} pointers", ids.len()), err))?;
        let by_id: HashMap<Ulid, Pointer> = rows.into_iter().filter_map(Pointer::from_row).map(|p| (p.id(), p)).collect();
        Ok(ids.iter().map(|id| by_id.get(id).cloned()).collect())
    }

    pub fn invalidate_pointer(&self, id: Ulid) {
        self.cache.invalidate(&POINTER_ROWS, &id.to_string());
    }

    pub fn get(&self, target: impl Into<Target>, options: &QueryOptions) -> Result<Row, AppError> {
        let pointer = match target.into() {
            Target::Id(id) => self.pointer(id)?,
            Target::Pointer(pointer) => pointer,
        };
        if !options.force {
            if let Some(row) = pointer.resolved_merged() {
                return Ok(row);
            }
        }

        let table = self.registry.resolve_type(pointer.table_id())?;
        if table.is_virtual() {
            debug!("Converting {} {} in memory", table.display_name(), pointer.id());
            return Ok(table.virtual_row(&pointer));
        }
        self.require_table(&table, pointer.id())?;

        let query = self.dispatcher.build_query(&table, &[Filter::id(pointer.id())], options)?;
        let row = self
            .first(&query, &table, pointer.id().to_string())?
            .ok_or_else(|| AppError::not_found(format!("{} {}", table.display_name(), pointer.id())))?;

        let mut pointer = pointer;
        pointer.attach(row)?;
        Ok(pointer.into_resolved().unwrap_or_default())
    }

    pub fn get_as<T: DeserializeOwned>(&self, target: impl Into<Target>, options: &QueryOptions) -> Result<T, AppError> {
        Ok(self.get(target, options)?.decode()?)
    }

    /// Follows the first pointer-table row matching `filters`.
    pub fn one(&self, filters: Vec<Filter>, options: &QueryOptions) -> Result<Row, AppError> {
        let query = Query::from_table(POINTERS_TABLE).filters(filters).limit(1);
        let row = self
            .store
            .fetch(&query)
            .map_err(|err| AppError::store("searching pointers", err))?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::not_found("no pointer matches"))?;
        let pointer = Pointer::from_row(row).ok_or_else(|| AppError::not_found("malformed pointer row"))?;
        self.get(pointer, options)
    }

    /// First record of one type matching `filters`.
    pub fn one_of(&self, type_ref: impl Into<TypeRef>, filters: Vec<Filter>, options: &QueryOptions) -> Result<Row, AppError> {
        let table = self.registry.resolve_type(type_ref)?;
        if table.is_virtual() {
            return Err(AppError::not_found(format!("{} has no stored records", table.display_name())));
        }
        self.require_table(&table, "query")?;
        let query = self.dispatcher.build_query(&table, &filters, options)?.limit(1);
        self.first(&query, &table, "query")?
            .ok_or_else(|| AppError::not_found(format!("no {} matches", table.display_name())))
    }

    fn require_table(&self, table: &TableDescriptor, what: impl std::fmt::Display) -> Result<(), AppError> {
        if table.in_store {
            return Ok(());
        }
        warn!("{} {} requested but the type has no live table", table.display_name(), what);
        Err(AppError::not_found(format!("{} {} (type has no live table)", table.display_name(), what)))
    }

    fn first(&self, query: &Query, table: &TableDescriptor, what: impl std::fmt::Display) -> Result<Option<Row>, AppError> {
        let rows = self
            .store
            .fetch(query)
            .map_err(|err| AppError::store(format!("fetching {} {} from `{}`", table.display_name(), what, table.table_name), err))?;
        Ok(rows.into_iter().next())
    }
}
