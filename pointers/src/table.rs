use crate::dispatch::QueryBuilder;
use crate::pointer::Pointer;
use crate::row::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Rows live in a backing table and are fetched with a query.
    Pointable,
    /// Records are derived in memory from the handle, no backing table.
    Virtual,
}

pub type QueryBuilderFactory = fn() -> Arc<dyn QueryBuilder>;
pub type VirtualFn = fn(&Pointer) -> Row;

/// Static declaration of an entity type, submitted by the module that owns the type.
#[derive(Clone, Copy)]
pub struct TableDecl {
    pub type_name: &'static str,
    pub table_name: &'static str,
    pub id: &'static str,
    pub role: Role,
    pub fields: &'static [&'static str],
    pub query_builder: Option<QueryBuilderFactory>,
    pub to_virtual: Option<VirtualFn>,
}

inventory::collect!(TableDecl);

impl TableDecl {
    pub const fn pointable(type_name: &'static str, table_name: &'static str, id: &'static str) -> Self {
        TableDecl { type_name, table_name, id, role: Role::Pointable, fields: &[], query_builder: None, to_virtual: None }
    }

    pub const fn virtual_type(type_name: &'static str, table_name: &'static str, id: &'static str) -> Self {
        TableDecl { type_name, table_name, id, role: Role::Virtual, fields: &[], query_builder: None, to_virtual: None }
    }

    pub const fn with_fields(mut self, fields: &'static [&'static str]) -> Self {
        self.fields = fields;
        self
    }

    pub const fn with_query_builder(mut self, factory: QueryBuilderFactory) -> Self {
        self.query_builder = Some(factory);
        self
    }

    pub const fn with_virtual(mut self, to_virtual: VirtualFn) -> Self {
        self.to_virtual = Some(to_virtual);
        self
    }

    pub fn ulid(&self) -> Option<Ulid> {
        Ulid::from_string(self.id).ok()
    }
}

impl fmt::Debug for TableDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDecl")
            .field("type_name", &self.type_name)
            .field("table_name", &self.table_name)
            .field("id", &self.id)
            .field("role", &self.role)
            .finish()
    }
}

/// Capabilities a compiled type brings along.
#[derive(Clone)]
pub struct Schema {
    pub fields: &'static [&'static str],
    pub query_builder: Option<Arc<dyn QueryBuilder>>,
    pub to_virtual: Option<VirtualFn>,
}

/// Reconciled view of one entity type: its declaration (if any) and whether the live
/// store knows it.
#[derive(Clone)]
pub struct TableDescriptor {
    pub id: Ulid,
    pub table_name: String,
    pub type_name: Option<String>,
    pub role: Role,
    pub schema: Option<Schema>,
    pub in_store: bool,
}

impl TableDescriptor {
    pub fn from_decl(decl: &TableDecl, id: Ulid, in_store: bool) -> Self {
        TableDescriptor {
            id,
            table_name: decl.table_name.to_string(),
            type_name: Some(decl.type_name.to_string()),
            role: decl.role,
            schema: Some(Schema {
                fields: decl.fields,
                query_builder: decl.query_builder.map(|factory| factory()),
                to_virtual: decl.to_virtual,
            }),
            in_store,
        }
    }

    /// A table the store has but no code declares: schemaless, served by the generic builder.
    pub fn live_only(id: Ulid, table_name: &str) -> Self {
        TableDescriptor { id, table_name: table_name.to_string(), type_name: None, role: Role::Pointable, schema: None, in_store: true }
    }

    pub fn is_virtual(&self) -> bool {
        self.role == Role::Virtual
    }

    pub fn query_builder(&self) -> Option<&Arc<dyn QueryBuilder>> {
        self.schema.as_ref().and_then(|s| s.query_builder.as_ref())
    }

    pub fn display_name(&self) -> &str {
        self.type_name.as_deref().unwrap_or(&self.table_name)
    }

    /// In-memory conversion for virtual types. Always converts; callers decide whether a
    /// record already on the handle is good enough.
    pub fn virtual_row(&self, pointer: &Pointer) -> Row {
        match self.schema.as_ref().and_then(|s| s.to_virtual) {
            Some(convert) => {
                let mut row = convert(pointer);
                row.merge_missing(pointer.extra());
                row
            }
            None => pointer.to_row(),
        }
    }
}

impl fmt::Debug for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDescriptor")
            .field("id", &self.id)
            .field("table_name", &self.table_name)
            .field("type_name", &self.type_name)
            .field("role", &self.role)
            .field("custom_query", &self.query_builder().is_some())
            .field("in_store", &self.in_store)
            .finish()
    }
}

/// A compiled record type that pointers can refer to. Implemented by `pointable!` and
/// `virtual_pointable!`.
pub trait Pointable: Serialize + DeserializeOwned {
    const DECL: TableDecl;

    fn pointer_id(&self) -> Ulid;
}
