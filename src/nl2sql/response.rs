use serde::{Serialize, Serializer};

use crate::db::schema::Row;
use crate::nl2sql::parser::OperationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// The operation-specific part of a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    CreatedRecord(Option<Row>),
    Results(Vec<Row>),
    UpdatedRecords(Vec<Row>),
    DeletedRecords(Vec<Row>),
    Message(String),
}

/// Uniform result of one natural-language request.
///
/// Serializes as
/// `{"operation", "status", "sql_query", <created_record|results|updated_records|deleted_records|message>}`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub operation: OperationKind,
    pub status: Status,
    pub sql_query: Option<String>,
    pub payload: Payload,
}

impl QueryResponse {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn message(&self) -> Option<&str> {
        match self.payload {
            Payload::Message(ref m) => Some(m),
            _ => None,
        }
    }

    /// Rows of a successful READ/UPDATE/DELETE, or the created record of an INSERT
    pub fn rows(&self) -> &[Row] {
        match self.payload {
            Payload::CreatedRecord(Some(ref row)) => std::slice::from_ref(row),
            Payload::Results(ref rows)
            | Payload::UpdatedRecords(ref rows)
            | Payload::DeletedRecords(ref rows) => rows,
            Payload::CreatedRecord(None) | Payload::Message(_) => &[],
        }
    }
}

impl Serialize for QueryResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("operation", &self.operation)?;
        map.serialize_entry("status", &self.status)?;
        map.serialize_entry("sql_query", &self.sql_query)?;
        match self.payload {
            Payload::CreatedRecord(ref row) => map.serialize_entry("created_record", row)?,
            Payload::Results(ref rows) => map.serialize_entry("results", rows)?,
            Payload::UpdatedRecords(ref rows) => map.serialize_entry("updated_records", rows)?,
            Payload::DeletedRecords(ref rows) => map.serialize_entry("deleted_records", rows)?,
            Payload::Message(ref msg) => map.serialize_entry("message", msg)?,
        }
        map.end()
    }
}

/// Shape a successful execution. UNKNOWN never executes, so it only
/// occurs here if a caller passes it directly; it is reported as an error.
pub fn success(operation: OperationKind, sql_query: &str, mut rows: Vec<Row>) -> QueryResponse {
    let payload = match operation {
        OperationKind::Insert => Payload::CreatedRecord(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        }),
        OperationKind::Read => Payload::Results(rows),
        OperationKind::Update => Payload::UpdatedRecords(rows),
        OperationKind::Delete => Payload::DeletedRecords(rows),
        OperationKind::Unknown => {
            return error(operation, Some(sql_query.to_string()), "unknown operation")
        }
    };
    QueryResponse {
        operation,
        status: Status::Success,
        sql_query: Some(sql_query.to_string()),
        payload,
    }
}

/// Shape an error. Only the message is carried; no record fields.
pub fn error(
    operation: OperationKind,
    sql_query: Option<String>,
    message: impl Into<String>,
) -> QueryResponse {
    QueryResponse {
        operation,
        status: Status::Error,
        sql_query,
        payload: Payload::Message(message.into()),
    }
}
