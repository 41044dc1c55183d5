use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use ulid::Ulid;

pub const ID: &str = "id";

/// Dynamic record as returned by a store: field name to JSON value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    pub fn new() -> Self {
        Row(Map::new())
    }

    pub fn with_id(id: Ulid) -> Self {
        Row::new().with(ID, id.to_string())
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Missing fields read as `null`, which is how filters treat them.
    pub fn value(&self, field: &str) -> &Value {
        self.0.get(field).unwrap_or(&Value::Null)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn id(&self) -> Option<Ulid> {
        self.0.get(ID).and_then(value_to_ulid)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copies fields this row does not have yet; existing fields win.
    pub fn merge_missing(&mut self, other: &Map<String, Value>) {
        for (field, value) in other {
            if !self.0.contains_key(field) {
                self.0.insert(field.clone(), value.clone());
            }
        }
    }

    /// Keeps only the selected columns. The id always survives projection.
    pub fn project(mut self, columns: &[String]) -> Self {
        if columns.is_empty() {
            return self;
        }
        self.0.retain(|field, _| field == ID || columns.iter().any(|c| c == field));
        self
    }

    pub fn encode<T: Serialize>(record: &T) -> Result<Row, serde_json::Error> {
        match serde_json::to_value(record)? {
            Value::Object(map) => Ok(Row(map)),
            other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                "record must serialize to a map of fields, got {}",
                other
            ))),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.0)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Row, serde_json::Error> {
        serde_json::from_slice(bytes).map(Row)
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Row {
    fn from(map: Map<String, Value>) -> Self {
        Row(map)
    }
}

pub fn value_to_ulid(value: &Value) -> Option<Ulid> {
    value.as_str().and_then(|s| Ulid::from_str(s).ok())
}

pub fn ulid_value(id: Ulid) -> Value {
    Value::String(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: Ulid,
        text: String,
    }

    #[test]
    fn typed_records_survive_encoding() {
        let note = Note { id: Ulid::new(), text: "hello".into() };
        let row = Row::encode(&note).unwrap();
        assert_eq!(row.id(), Some(note.id));
        assert_eq!(row.decode::<Note>().unwrap(), note);
    }

    #[test]
    fn scalars_are_not_records() {
        assert!(Row::encode(&42u32).is_err());
    }

    #[test]
    fn merge_keeps_existing_fields() {
        let mut row = Row::new().with("a", 1).with("b", 2);
        let extra = json!({"b": 20, "c": 30});
        row.merge_missing(extra.as_object().unwrap());
        assert_eq!(row.value("a"), &json!(1));
        assert_eq!(row.value("b"), &json!(2));
        assert_eq!(row.value("c"), &json!(30));
    }

    #[test]
    fn projection_keeps_id() {
        let id = Ulid::new();
        let row = Row::with_id(id).with("a", 1).with("b", 2).project(&["a".to_string()]);
        assert_eq!(row.id(), Some(id));
        assert!(row.contains("a"));
        assert!(!row.contains("b"));
        assert_eq!(row.value("b"), &Value::Null);
    }
}
