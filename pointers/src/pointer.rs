use crate::error::AppError;
use crate::row::{ulid_value, value_to_ulid, Row, ID};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

pub const TABLE_ID: &str = "table_id";

/// Globally unique handle to a record of any registered table.
///
/// `id` and `table_id` never change after construction; the only mutation is attaching the
/// resolved record, which must carry the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pointer {
    id: Ulid,
    table_id: Ulid,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    extra: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resolved: Option<Row>,
}

impl Pointer {
    pub fn new(id: Ulid, table_id: Ulid) -> Self {
        Self { id, table_id, extra: Map::new(), resolved: None }
    }

    /// Builds a pointer from a row of the universal pointer table. Columns other than
    /// `id` and `table_id` stay on the handle as extra fields.
    pub fn from_row(row: Row) -> Option<Self> {
        let id = row.id()?;
        let table_id = row.get(TABLE_ID).and_then(value_to_ulid)?;
        let mut extra = row.into_map();
        extra.remove(ID);
        extra.remove(TABLE_ID);
        Some(Self { id, table_id, extra, resolved: None })
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn table_id(&self) -> Ulid {
        self.table_id
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    pub fn with_field(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(field.to_string(), value.into());
        self
    }

    pub fn resolved(&self) -> Option<&Row> {
        self.resolved.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn into_resolved(self) -> Option<Row> {
        self.resolved
    }

    /// Attaches a record, filling in fields only the handle knows about.
    pub fn attach(&mut self, row: Row) -> Result<(), AppError> {
        let merged = self.merged(row)?;
        self.resolved = Some(merged);
        Ok(())
    }

    pub fn with_resolved(mut self, row: Row) -> Result<Self, AppError> {
        self.attach(row)?;
        Ok(self)
    }

    /// The resolved record with handle-only fields merged in.
    pub fn resolved_merged(&self) -> Option<Row> {
        self.resolved.clone().map(|mut row| {
            row.merge_missing(&self.extra);
            row
        })
    }

    fn merged(&self, mut row: Row) -> Result<Row, AppError> {
        match row.id() {
            Some(id) if id == self.id => {}
            Some(other) => {
                return Err(AppError::PointerMismatch { pointer: self.id, record: other.to_string() });
            }
            None if row.contains(ID) => {
                return Err(AppError::PointerMismatch { pointer: self.id, record: row.value(ID).to_string() });
            }
            None => {
                row.insert(ID, ulid_value(self.id));
            }
        }
        row.merge_missing(&self.extra);
        Ok(row)
    }

    /// Default shape of a virtual record: the handle itself.
    pub fn to_row(&self) -> Row {
        let mut row = Row::with_id(self.id).with(TABLE_ID, self.table_id.to_string());
        row.merge_missing(&self.extra);
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attach_rejects_foreign_records() {
        let mut pointer = Pointer::new(Ulid::new(), Ulid::new());
        let err = pointer.attach(Row::with_id(Ulid::new())).unwrap_err();
        assert!(matches!(err, AppError::PointerMismatch { .. }));
        assert!(!pointer.is_resolved());
    }

    #[test]
    fn attach_merges_handle_fields_and_fills_id() {
        let id = Ulid::new();
        let mut pointer = Pointer::new(id, Ulid::new()).with_field("joined", "yes").with_field("name", "handle");
        pointer.attach(Row::new().with("name", "record")).unwrap();
        let row = pointer.resolved().unwrap();
        assert_eq!(row.id(), Some(id));
        assert_eq!(row.value("joined"), &json!("yes"));
        assert_eq!(row.value("name"), &json!("record"));
    }

    #[test]
    fn pointer_rows_keep_extra_columns() {
        let (id, table_id) = (Ulid::new(), Ulid::new());
        let row = Row::with_id(id).with(TABLE_ID, table_id.to_string()).with("deleted_at", Value::Null);
        let pointer = Pointer::from_row(row).unwrap();
        assert_eq!(pointer.id(), id);
        assert_eq!(pointer.table_id(), table_id);
        assert!(pointer.extra().contains_key("deleted_at"));
        assert!(Pointer::from_row(Row::with_id(id)).is_none());
    }
}
