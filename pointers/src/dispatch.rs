use crate::cache::{CacheDef, CacheFacade};
use crate::debug;
use crate::error::AppError;
use crate::query::{Filter, Query, QueryOptions};
use crate::store::Store;
use crate::table::TableDescriptor;
use serde_json::Value;
use std::sync::Arc;

pub const DELETED_AT: &str = "deleted_at";

const COLUMNS: CacheDef<Vec<String>> = CacheDef::new("columns");

/// Per-type query construction. Types register one to add joins, default filters or
/// preload hints; the rest share [`GenericQueryBuilder`].
pub trait QueryBuilder: Send + Sync {
    fn build(&self, table: &TableDescriptor, filters: &[Filter], options: &QueryOptions) -> Result<Query, AppError>;
}

/// Optional boundary check applied to every dispatched query. Must be a pure transformer.
pub trait PermissionFilter: Send + Sync {
    fn apply(&self, query: Query, options: &QueryOptions) -> Result<Query, AppError>;
}

/// Fallback for tables without a custom builder, working purely from the column names the
/// store reports. Tables with a `deleted_at` column hide soft-deleted rows by default.
pub struct GenericQueryBuilder {
    columns: Vec<String>,
}

impl GenericQueryBuilder {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl QueryBuilder for GenericQueryBuilder {
    fn build(&self, table: &TableDescriptor, filters: &[Filter], _options: &QueryOptions) -> Result<Query, AppError> {
        let default_filter = self
            .columns
            .iter()
            .any(|c| c == DELETED_AT)
            .then(|| Filter::eq(DELETED_AT, Value::Null));
        Ok(Query::from_table(&table.table_name)
            .select(self.columns.clone())
            .filters(filters.iter().cloned())
            .default_filter(default_filter))
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn Store>,
    cache: CacheFacade,
    permission: Option<Arc<dyn PermissionFilter>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, cache: CacheFacade, permission: Option<Arc<dyn PermissionFilter>>) -> Self {
        Self { store, cache, permission }
    }

    pub fn build_query(&self, table: &TableDescriptor, filters: &[Filter], options: &QueryOptions) -> Result<Query, AppError> {
        let mut query = match table.query_builder() {
            Some(builder) => builder.build(table, filters, options)?,
            None => self.generic(table)?.build(table, filters, options)?,
        };

        if !options.override_filters.is_empty() {
            query.default_filter = Some(Filter::All(options.override_filters.clone()));
        }

        if !options.skip_permission_check {
            if let Some(permission) = &self.permission {
                query = permission.apply(query, options)?;
            }
        }

        debug!("Dispatched query on {} with {} filters", query.table, query.filters.len());
        Ok(query)
    }

    /// Builder over the store's columns, followed by declared fields the store has not seen yet.
    pub fn generic(&self, table: &TableDescriptor) -> Result<GenericQueryBuilder, AppError> {
        let mut columns = self.cache.get_or_compute(&COLUMNS, &self.columns_key(&table.table_name), || {
            self.store
                .columns(&table.table_name)
                .map_err(|err| AppError::store(format!("listing columns of `{}`", table.table_name), err))
        })?;
        for field in table.schema.iter().flat_map(|s| s.fields.iter()) {
            if !columns.iter().any(|c| c == field) {
                columns.push(field.to_string());
            }
        }
        Ok(GenericQueryBuilder::new(columns))
    }

    pub fn invalidate_columns(&self, table_name: &str) {
        self.cache.invalidate(&COLUMNS, &self.columns_key(table_name));
    }

    fn columns_key(&self, table_name: &str) -> String {
        format!("{}:{}", self.store.columns_epoch(), table_name)
    }
}
