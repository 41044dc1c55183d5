use crate::cache::{CacheDef, CacheFacade};
use crate::error::AppError;
use crate::query::Query;
use crate::store::{Store, StoreError, TABLES_TABLE};
use crate::table::{Role, TableDecl, TableDescriptor};
use crate::{debug, info, warn};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use ulid::Ulid;

const LIVE: CacheDef<Vec<LiveTable>> = CacheDef::new("live_types");
const MISSES: CacheDef<Ulid> = CacheDef::new("type_lookup");

/// How callers name an entity type: by id, or by type or table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Id(Ulid),
    Name(String),
}

impl From<&str> for TypeRef {
    fn from(value: &str) -> Self {
        match Ulid::from_string(value) {
            Ok(id) => TypeRef::Id(id),
            Err(_) => TypeRef::Name(value.to_string()),
        }
    }
}

impl From<String> for TypeRef {
    fn from(value: String) -> Self {
        TypeRef::from(value.as_str())
    }
}

impl From<Ulid> for TypeRef {
    fn from(value: Ulid) -> Self {
        TypeRef::Id(value)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Id(id) => write!(f, "{}", id),
            TypeRef::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Types declared in code.
    Static,
    /// Types the store has a type row for.
    Live,
}

/// One row of the store's type table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveTable {
    pub id: Ulid,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    /// Declared pointable type without a type row.
    MissingInStore { name: String, id: Ulid },
    /// Type row no code declares.
    MissingInCode { name: String, id: Ulid },
    /// Same table declared and live under different ids.
    IdMismatch { name: String, declared: Ulid, live: Ulid },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::MissingInStore { name, id } => write!(f, "{} ({}) is declared but missing in store", name, id),
            Discrepancy::MissingInCode { name, id } => write!(f, "{} ({}) is in store but not declared", name, id),
            Discrepancy::IdMismatch { name, declared, live } => {
                write!(f, "{} is declared as {} but live as {}", name, declared, live)
            }
        }
    }
}

#[derive(Clone)]
struct Snapshot {
    tables: HashMap<Ulid, Arc<TableDescriptor>>,
    by_name: HashMap<String, Ulid>,
    live: Option<Vec<LiveTable>>,
    built_at: Instant,
    stale: bool,
}

impl Snapshot {
    fn build(declared: &[(Ulid, TableDecl)], live: Option<Vec<LiveTable>>) -> Self {
        let live_ids: HashSet<Ulid> = live.iter().flatten().map(|t| t.id).collect();
        let mut tables = HashMap::new();
        let mut by_name = HashMap::new();

        for (id, decl) in declared {
            let descriptor = TableDescriptor::from_decl(decl, *id, live_ids.contains(id));
            tables.insert(*id, Arc::new(descriptor));
            by_name.entry(decl.type_name.to_string()).or_insert(*id);
            by_name.entry(decl.table_name.to_string()).or_insert(*id);
        }
        for table in live.iter().flatten() {
            if !tables.contains_key(&table.id) {
                tables.insert(table.id, Arc::new(TableDescriptor::live_only(table.id, &table.table)));
                by_name.entry(table.table.clone()).or_insert(table.id);
            }
        }
        Snapshot { tables, by_name, live, built_at: Instant::now(), stale: false }
    }

    fn find(&self, type_ref: &TypeRef) -> Option<&Arc<TableDescriptor>> {
        match type_ref {
            TypeRef::Id(id) => self.tables.get(id),
            TypeRef::Name(name) => self.by_name.get(name).and_then(|id| self.tables.get(id)),
        }
    }
}

/// Maps type ids and names to descriptors, reconciling declarations in code with the type
/// rows of the live store.
///
/// Readers always see a complete snapshot. A snapshot older than the ttl, or marked stale by
/// [`invalidate`](Self::invalidate), is rebuilt wholesale on the next lookup.
pub struct Registry {
    store: Arc<dyn Store>,
    cache: CacheFacade,
    declared: Vec<(Ulid, TableDecl)>,
    ttl: Duration,
    snapshot: ArcSwap<Snapshot>,
    generation: AtomicU64,
}

impl Registry {
    pub fn new(store: Arc<dyn Store>, cache: CacheFacade, decls: impl IntoIterator<Item = TableDecl>, ttl: Duration) -> Self {
        let declared = validate(decls);
        let mut snapshot = Snapshot::build(&declared, None);
        snapshot.stale = true;
        Registry { store, cache, declared, ttl, snapshot: ArcSwap::from_pointee(snapshot), generation: AtomicU64::new(0) }
    }

    /// Uses every declaration submitted with `pointable!` / `virtual_pointable!`.
    pub fn from_inventory(store: Arc<dyn Store>, cache: CacheFacade, ttl: Duration) -> Self {
        Self::new(store, cache, inventory::iter::<TableDecl>.into_iter().copied(), ttl)
    }

    /// Reads the live type rows and rebuilds the snapshot.
    pub fn load(&self) -> Result<(), AppError> {
        self.reload()?;
        self.cache.invalidate(&LIVE, &self.generation().to_string());
        Ok(())
    }

    /// Drops the snapshot and every cached type lookup derived from it. Column lists are
    /// keyed on the store's own epoch instead.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut snapshot = Snapshot::clone(&self.snapshot.load());
        snapshot.stale = true;
        self.snapshot.store(Arc::new(snapshot));
        debug!("Registry invalidated, generation {}", self.generation());
    }

    pub fn resolve_type(&self, type_ref: impl Into<TypeRef>) -> Result<Arc<TableDescriptor>, AppError> {
        let type_ref = type_ref.into();
        let snapshot = self.snapshot.load_full();
        if let Some(descriptor) = snapshot.find(&type_ref) {
            if descriptor.is_virtual() || self.is_fresh(&snapshot) {
                return Ok(descriptor.clone());
            }
        }

        let snapshot = self.current()?;
        if let Some(descriptor) = snapshot.find(&type_ref) {
            return Ok(descriptor.clone());
        }

        let key = format!("{}:{}", self.generation(), type_ref);
        let found = self.cache.get_or_compute_opt(&MISSES, &key, || {
            let snapshot = self.reload()?;
            Ok(snapshot.find(&type_ref).map(|d| d.id))
        })?;
        found
            .and_then(|id| self.snapshot.load().tables.get(&id).cloned())
            .ok_or_else(|| AppError::UnknownType(type_ref.to_string()))
    }

    pub fn all_types(&self, source: Source) -> Result<Vec<Arc<TableDescriptor>>, AppError> {
        let mut types: Vec<Arc<TableDescriptor>> = match source {
            Source::Static => {
                let snapshot = self.snapshot.load();
                self.declared.iter().filter_map(|(id, _)| snapshot.tables.get(id).cloned()).collect()
            }
            Source::Live => self.current()?.tables.values().filter(|d| d.in_store).cloned().collect(),
        };
        types.sort_by_key(|d| d.id);
        Ok(types)
    }

    /// Compares declarations with the live type rows. Never fails: when the store cannot
    /// be read the last known live set is used.
    pub fn diff(&self) -> Vec<Discrepancy> {
        let live = match self.read_live() {
            Ok(live) => live,
            Err(err) => {
                warn!("Registry diff against last known live types: {}", err);
                self.snapshot.load().live.clone().unwrap_or_default()
            }
        };

        let mut discrepancies = Vec::new();
        for (id, decl) in &self.declared {
            if live.iter().any(|t| t.id == *id) {
                continue;
            }
            match live.iter().find(|t| t.table == decl.table_name) {
                Some(t) => discrepancies.push(Discrepancy::IdMismatch { name: decl.table_name.to_string(), declared: *id, live: t.id }),
                None if decl.role == Role::Pointable => {
                    discrepancies.push(Discrepancy::MissingInStore { name: decl.type_name.to_string(), id: *id })
                }
                None => {}
            }
        }
        for table in &live {
            let known = self.declared.iter().any(|(id, decl)| *id == table.id || decl.table_name == table.table);
            if !known {
                discrepancies.push(Discrepancy::MissingInCode { name: table.table.clone(), id: table.id });
            }
        }
        for d in &discrepancies {
            warn!("Registry drift: {}", d);
        }
        discrepancies
    }

    /// [`diff`](Self::diff) for callers that refuse to run with drift.
    pub fn check(&self) -> Result<(), AppError> {
        let discrepancies = self.diff();
        if discrepancies.is_empty() {
            Ok(())
        } else {
            Err(AppError::RegistryDrift(discrepancies))
        }
    }

    /// Static lookup, no store access.
    pub(crate) fn declared(&self, type_ref: &TypeRef) -> Option<(Ulid, &TableDecl)> {
        self.declared
            .iter()
            .find(|(id, decl)| match type_ref {
                TypeRef::Id(wanted) => id == wanted,
                TypeRef::Name(name) => decl.type_name == name || decl.table_name == name,
            })
            .map(|(id, decl)| (*id, decl))
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_fresh(&self, snapshot: &Snapshot) -> bool {
        !snapshot.stale && snapshot.live.is_some() && snapshot.built_at.elapsed() < self.ttl
    }

    fn current(&self) -> Result<Arc<Snapshot>, AppError> {
        let snapshot = self.snapshot.load_full();
        if self.is_fresh(&snapshot) {
            return Ok(snapshot);
        }
        match self.cache.get_or_compute(&LIVE, &self.generation().to_string(), || self.read_live()) {
            Ok(live) => Ok(self.install(live)),
            Err(err) if snapshot.live.is_some() => {
                warn!("Keeping previous registry snapshot: {}", err);
                Ok(snapshot)
            }
            Err(err) => Err(err),
        }
    }

    fn reload(&self) -> Result<Arc<Snapshot>, AppError> {
        let live = self.read_live()?;
        Ok(self.install(live))
    }

    fn install(&self, live: Vec<LiveTable>) -> Arc<Snapshot> {
        let snapshot = Arc::new(Snapshot::build(&self.declared, Some(live)));
        info!("Registry loaded {} types ({} declared)", snapshot.tables.len(), self.declared.len());
        self.snapshot.store(snapshot.clone());
        snapshot
    }

    fn read_live(&self) -> Result<Vec<LiveTable>, AppError> {
        let rows = match self.store.fetch(&Query::from_table(TABLES_TABLE)) {
            Ok(rows) => rows,
            Err(StoreError::MissingTable(_)) => return Ok(Vec::new()),
            Err(err) => return Err(AppError::store("reading live types", err)),
        };
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let table = row.get("table").and_then(|t| t.as_str()).map(str::to_string);
                match (row.id(), table) {
                    (Some(id), Some(table)) => Some(LiveTable { id, table }),
                    _ => {
                        warn!("Skipping malformed type row {:?}", row);
                        None
                    }
                }
            })
            .collect())
    }
}

fn validate(decls: impl IntoIterator<Item = TableDecl>) -> Vec<(Ulid, TableDecl)> {
    let mut declared: Vec<(Ulid, TableDecl)> = Vec::new();
    for decl in decls {
        let Some(id) = decl.ulid() else {
            warn!("Ignoring {}: invalid type id {:?}", decl.type_name, decl.id);
            continue;
        };
        if let Some((_, first)) = declared.iter().find(|(other, _)| *other == id) {
            warn!("Ignoring {}: id {} already declared by {}", decl.type_name, id, first.type_name);
            continue;
        }
        let table_taken = declared
            .iter()
            .find(|(_, other)| decl.role == Role::Pointable && other.role == Role::Pointable && other.table_name == decl.table_name);
        if let Some((_, first)) = table_taken {
            warn!("Ignoring {}: table {} already declared by {}", decl.type_name, decl.table_name, first.type_name);
            continue;
        }
        declared.push((id, decl));
    }
    declared
}
