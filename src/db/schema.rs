use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// Fallback text for columns the catalog has no comment for.
pub const NO_DESCRIPTION: &str = "No description available";

/// Represents a column of a configured table, as read from the catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub description: String,
    pub is_nullable: bool,
    pub default_value: Option<String>,
    pub foreign_key: Option<ForeignKeyRef>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            description: NO_DESCRIPTION.to_string(),
            is_nullable: true,
            default_value: None,
            foreign_key: None,
        }
    }
}

/// Target of a foreign key column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyRef {
    pub references_table: String,
    pub references_column: String,
}

/// One row of the foreign-key catalog query for a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyInfo {
    pub column_name: String,
    pub references_table: String,
    pub references_column: String,
}

/// A single cell value produced by a generated statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary-precision numeric, kept as its decimal text
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    Timestamp(chrono::NaiveDateTime),
    TimestampTz(chrono::DateTime<chrono::Utc>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Decimal(v) | Value::Text(v) => serializer.serialize_str(v),
            Value::Bytes(v) => v.serialize(serializer),
            Value::Date(v) => v.serialize(serializer),
            Value::Time(v) => v.serialize(serializer),
            Value::Timestamp(v) => v.serialize(serializer),
            Value::TimestampTz(v) => v.serialize(serializer),
            Value::Uuid(v) => v.serialize(serializer),
            Value::Json(v) => v.serialize(serializer),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// A result row: column names mapped to values, in result-set column order.
///
/// Serializes as a JSON object. Duplicate column names (e.g. `SELECT a.id, b.id`)
/// keep the last value, the same way a dictionary-shaped row would.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.columns.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_preserves_column_order() {
        let row: Row = vec![
            ("zeta", Value::Int(1)),
            ("alpha", Value::from("a")),
            ("mid", Value::Null),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"zeta":1,"alpha":"a","mid":null}"#);
    }

    #[test]
    fn test_row_duplicate_column_last_wins() {
        let mut row = Row::new();
        row.insert("id", Value::Int(1));
        row.insert("id", Value::Int(2));
        assert_eq!(row.len(), 1);
        assert_eq!(row.get("id"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_value_serialization() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(serde_json::to_value(Value::Date(date)).unwrap(), "2024-03-01");
        assert_eq!(
            serde_json::to_value(Value::Decimal("12.50".into())).unwrap(),
            "12.50"
        );
        assert_eq!(
            serde_json::to_value(Value::Bytes(vec![1, 2])).unwrap(),
            serde_json::json!([1, 2])
        );
        assert_eq!(serde_json::to_value(Value::Null).unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn test_column_schema_defaults_to_sentinel_description() {
        let col = ColumnSchema::new("id", "integer");
        assert_eq!(col.description, NO_DESCRIPTION);
        assert!(col.foreign_key.is_none());
    }
}
