use crate::pointer::TABLE_ID;
use crate::query::Query;
use crate::row::{Row, ID};
use crate::settings::StoreSettings;
use crate::store::{Store, StoreError, POINTERS_TABLE, TABLES_TABLE};
use crate::table::{Pointable, Role, TableDecl};
use crate::{info, warn};
use redb::{Database, ReadOnlyTable, ReadTransaction, ReadableTable, TableDefinition, TableError, WriteTransaction};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use ulid::Ulid;

const TABLE: &str = "table";

/// Column names per table, as a JSON array.
const COLUMNS: TableDefinition<&str, &str> = TableDefinition::new("pointers_columns");

fn rows_def(table: &str) -> TableDefinition<'_, u128, &'static [u8]> {
    TableDefinition::new(table)
}

fn open_rows(tx: &ReadTransaction, table: &str) -> Result<ReadOnlyTable<u128, &'static [u8]>, StoreError> {
    match tx.open_table(rows_def(table)) {
        Ok(t) => Ok(t),
        Err(TableError::TableDoesNotExist(_)) => Err(StoreError::MissingTable(table.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// [`Store`] over a single redb database. Every table maps ULID keys to JSON encoded rows;
/// type rows, pointer rows and column lists live in system tables of the same database.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    columns_epoch: Arc<AtomicU64>,
}

impl RedbStore {
    pub fn new(db: Arc<Database>) -> Result<Self, StoreError> {
        let store = Self { db, columns_epoch: Arc::new(AtomicU64::new(0)) };
        store.ensure_system_tables()?;
        Ok(store)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref())?;
        Self::new(Arc::new(db))
    }

    pub fn from_settings(settings: &StoreSettings) -> Result<Self, StoreError> {
        let path = Path::new(&settings.db_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        info!("Opening pointer store at {:?}", path);
        let db = Database::builder().set_cache_size(settings.cache_size_mb * 1024 * 1024).create(path)?;
        Self::new(Arc::new(db))
    }

    pub fn temp(name: &str) -> Result<Self, StoreError> {
        let dir = std::env::temp_dir().join("pointers").join("test");
        fs::create_dir_all(&dir)?;
        Self::open(dir.join(format!("{}_{}.redb", name, rand::random::<u64>())))
    }

    fn ensure_system_tables(&self) -> Result<(), StoreError> {
        let tx = self.db.begin_write()?;
        tx.open_table(rows_def(TABLES_TABLE))?;
        tx.open_table(rows_def(POINTERS_TABLE))?;
        Self::extend_columns(&tx, TABLES_TABLE, [TABLE])?;
        Self::extend_columns(&tx, POINTERS_TABLE, [TABLE_ID])?;
        tx.commit()?;
        Ok(())
    }

    fn read_columns(tx: &WriteTransaction, table: &str) -> Result<Option<Vec<String>>, StoreError> {
        let columns = tx.open_table(COLUMNS)?;
        let raw = columns.get(table)?;
        match raw {
            Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Appends unseen column names; the id column always comes first. True when the list changed.
    fn extend_columns<'a>(tx: &WriteTransaction, table: &str, fields: impl IntoIterator<Item = &'a str>) -> Result<bool, StoreError> {
        let existing = Self::read_columns(tx, table)?;
        let mut current = existing.clone().unwrap_or_else(|| vec![ID.to_string()]);
        for field in fields {
            if !current.iter().any(|c| c == field) {
                current.push(field.to_string());
            }
        }
        if existing.as_ref() == Some(&current) {
            return Ok(false);
        }
        let encoded = serde_json::to_string(&current)?;
        let mut columns = tx.open_table(COLUMNS)?;
        columns.insert(table, encoded.as_str())?;
        Ok(true)
    }

    fn columns_changed(&self, changed: bool) {
        if changed {
            self.columns_epoch.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Records a type row and, for pointable types, creates its table.
    pub fn register_table(&self, id: Ulid, table: &str, role: Role, fields: &[&str]) -> Result<(), StoreError> {
        let tx = self.db.begin_write()?;
        {
            let mut types = tx.open_table(rows_def(TABLES_TABLE))?;
            let row = Row::with_id(id).with(TABLE, table);
            types.insert(id.0, row.to_bytes()?.as_slice())?;
        }
        let mut changed = false;
        if role == Role::Pointable {
            tx.open_table(rows_def(table))?;
            changed = Self::extend_columns(&tx, table, fields.iter().copied())?;
        }
        tx.commit()?;
        self.columns_changed(changed);
        Ok(())
    }

    /// Removes the type rows naming `table`; its data stays.
    pub fn unregister_table(&self, table: &str) -> Result<bool, StoreError> {
        let ids: Vec<Ulid> = self.table_rows()?.into_iter().filter(|(_, name)| name == table).map(|(id, _)| id).collect();
        if ids.is_empty() {
            return Ok(false);
        }
        let tx = self.db.begin_write()?;
        {
            let mut types = tx.open_table(rows_def(TABLES_TABLE))?;
            for id in &ids {
                types.remove(id.0)?;
            }
        }
        tx.commit()?;
        Ok(true)
    }

    /// Registers every declaration; ones with malformed ids are skipped.
    pub fn migrate(&self, decls: &[TableDecl]) -> Result<(), StoreError> {
        for decl in decls {
            match decl.ulid() {
                Some(id) => self.register_table(id, decl.table_name, decl.role, decl.fields)?,
                None => warn!("Not migrating {}: invalid id {:?}", decl.type_name, decl.id),
            }
        }
        Ok(())
    }

    fn table_rows(&self) -> Result<Vec<(Ulid, String)>, StoreError> {
        let rows = self.fetch(&Query::from_table(TABLES_TABLE))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| Some((row.id()?, row.get(TABLE)?.as_str()?.to_string())))
            .collect())
    }

    pub fn table_id(&self, table: &str) -> Result<Ulid, StoreError> {
        self.table_rows()?
            .into_iter()
            .find(|(_, name)| name == table)
            .map(|(id, _)| id)
            .ok_or_else(|| StoreError::MissingTable(table.to_string()))
    }

    pub fn insert(&self, table: &str, row: Row) -> Result<(), StoreError> {
        self.insert_many(table, vec![row])
    }

    /// Writes rows and their pointer rows in one transaction. Ids are unique across all
    /// tables: an id whose pointer row names another table fails the whole batch.
    pub fn insert_many(&self, table: &str, rows: Vec<Row>) -> Result<(), StoreError> {
        let table_id = self.table_id(table)?.to_string();
        let tx = self.db.begin_write()?;
        {
            let mut data = tx.open_table(rows_def(table))?;
            let mut pointers = tx.open_table(rows_def(POINTERS_TABLE))?;
            for row in &rows {
                let id = row.id().ok_or(StoreError::InvalidRow)?;
                let owner = match pointers.get(id.0)? {
                    Some(guard) => Row::from_bytes(guard.value())?.get(TABLE_ID).and_then(Value::as_str).map(str::to_string),
                    None => None,
                };
                if let Some(owner) = owner.filter(|owner| *owner != table_id) {
                    return Err(StoreError::IdConflict { id, owner });
                }
                data.insert(id.0, row.to_bytes()?.as_slice())?;
                let pointer = Row::with_id(id).with(TABLE_ID, table_id.as_str());
                pointers.insert(id.0, pointer.to_bytes()?.as_slice())?;
            }
        }
        let fields: Vec<String> = rows.iter().flat_map(|r| r.fields().map(|(f, _)| f.clone())).collect();
        let changed = Self::extend_columns(&tx, table, fields.iter().map(String::as_str))?;
        tx.commit()?;
        self.columns_changed(changed);
        Ok(())
    }

    pub fn insert_record<T: Pointable>(&self, record: &T) -> Result<(), StoreError> {
        self.insert(T::DECL.table_name, Row::encode(record)?)
    }

    /// Hard-deletes a row of `table` together with its pointer row. Ids the table does not
    /// hold are left alone.
    pub fn delete(&self, table: &str, id: Ulid) -> Result<bool, StoreError> {
        let tx = self.db.begin_write()?;
        let removed = {
            let mut data = tx.open_table(rows_def(table))?;
            let removed = data.remove(id.0)?.is_some();
            if removed {
                let mut pointers = tx.open_table(rows_def(POINTERS_TABLE))?;
                pointers.remove(id.0)?;
            }
            removed
        };
        tx.commit()?;
        Ok(removed)
    }
}

impl Store for RedbStore {
    fn fetch_by_ids(&self, table: &str, columns: &[String], ids: &[Ulid]) -> Result<Vec<Row>, StoreError> {
        let tx = self.db.begin_read()?;
        let rows = open_rows(&tx, table)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(guard) = rows.get(id.0)? {
                out.push(Row::from_bytes(guard.value())?.project(columns));
            }
        }
        Ok(out)
    }

    fn fetch(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let tx = self.db.begin_read()?;
        let table = open_rows(&tx, &query.table)?;
        let mut rows = Vec::new();
        match query.id_set() {
            Some(ids) => {
                for id in ids {
                    if let Some(guard) = table.get(id.0)? {
                        rows.push(Row::from_bytes(guard.value())?);
                    }
                }
            }
            None => {
                for entry in table.iter()? {
                    let (_, value) = entry?;
                    rows.push(Row::from_bytes(value.value())?);
                }
            }
        }
        rows.retain(|row| query.matches(row));
        Ok(query.finish(rows))
    }

    fn columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let tx = self.db.begin_read()?;
        let columns = match tx.open_table(COLUMNS) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Err(StoreError::MissingTable(table.to_string())),
            Err(e) => return Err(e.into()),
        };
        match columns.get(table)? {
            Some(guard) => Ok(serde_json::from_str(guard.value())?),
            None => Err(StoreError::MissingTable(table.to_string())),
        }
    }

    fn columns_epoch(&self) -> u64 {
        self.columns_epoch.load(Ordering::SeqCst)
    }
}
