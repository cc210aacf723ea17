use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of statement the model says it generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Insert,
    Read,
    Update,
    Delete,
    #[default]
    Unknown,
}

impl OperationKind {
    /// Map a label to a kind. Anything outside the closed set is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "INSERT" => OperationKind::Insert,
            "READ" => OperationKind::Read,
            "UPDATE" => OperationKind::Update,
            "DELETE" => OperationKind::Delete,
            _ => OperationKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "INSERT",
            OperationKind::Read => "READ",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
            OperationKind::Unknown => "UNKNOWN",
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            OperationKind::Insert | OperationKind::Update | OperationKind::Delete
        )
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation and SQL extracted from one model response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedQuery {
    pub operation: OperationKind,
    pub sql: String,
}

impl GeneratedQuery {
    /// The `(UNKNOWN, "")` value every parse failure collapses to
    pub fn unknown() -> Self {
        Self::default()
    }
}

/// Why a model response could not be turned into a [`GeneratedQuery`].
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("no fenced json block in model output")]
    NoFencedBlock,

    #[error("invalid json in fenced block: {0}")]
    InvalidJson(String),

    #[error("unsupported operation {0:?}")]
    UnsupportedOperation(String),
}

static JSON_FENCE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").unwrap());

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    operation: Option<String>,
    #[serde(default)]
    query: Option<String>,
}

/// Parse the first fenced json block of `text`.
///
/// A missing `query` yields an empty SQL string; the caller
/// decides what an empty statement means.
pub fn parse_model_output(text: &str) -> Result<GeneratedQuery, ParseError> {
    let captures = JSON_FENCE_REGEX
        .captures(text)
        .ok_or(ParseError::NoFencedBlock)?;
    let body = captures.get(1).map(|m| m.as_str()).unwrap_or_default();

    let payload: Payload =
        serde_json::from_str(body).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let label = payload.operation.unwrap_or_default();
    let operation = OperationKind::from_label(&label);
    if operation == OperationKind::Unknown {
        return Err(ParseError::UnsupportedOperation(label));
    }

    Ok(GeneratedQuery {
        operation,
        sql: payload.query.unwrap_or_default(),
    })
}

/// Extract the operation and SQL from raw model output, degrading every
/// failure to [`GeneratedQuery::unknown`].
pub fn extract_query(text: &str) -> GeneratedQuery {
    match parse_model_output(text.trim()) {
        Ok(q) => q,
        Err(e) => {
            log::warn!("Could not parse model output: {}", e);
            GeneratedQuery::unknown()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_with_surrounding_prose() {
        let text = "Sure! Here is the query you asked for:\n\
                    ```json\n{\"operation\":\"READ\",\"query\":\"SELECT 1\"}\n```\n\
                    Let me know if you need anything else.";
        assert_eq!(
            extract_query(text),
            GeneratedQuery {
                operation: OperationKind::Read,
                sql: "SELECT 1".into(),
            }
        );
    }

    #[test]
    fn test_extract_multiline_block() {
        let text = r#"```json
{
    "operation": "INSERT",
    "query": "INSERT INTO users (name, city) VALUES ('Ada', 'New York') RETURNING *"
}
```"#;
        let q = extract_query(text);
        assert_eq!(q.operation, OperationKind::Insert);
        assert!(q.sql.ends_with("RETURNING *"));
    }

    #[test]
    fn test_braces_inside_query() {
        let text = "```json\n{\"operation\":\"READ\",\"query\":\"SELECT '{}'::jsonb AS j\"}\n```";
        assert_eq!(extract_query(text).sql, "SELECT '{}'::jsonb AS j");
    }

    #[test]
    fn test_first_block_wins() {
        let text = "```json\n{\"operation\":\"DELETE\",\"query\":\"DELETE FROM a\"}\n```\n\
                    ```json\n{\"operation\":\"READ\",\"query\":\"SELECT 2\"}\n```";
        assert_eq!(extract_query(text).operation, OperationKind::Delete);
    }

    #[test]
    fn test_no_fenced_block() {
        assert_eq!(
            parse_model_output("SELECT * FROM users"),
            Err(ParseError::NoFencedBlock)
        );
        // A plain fence without the json tag does not count
        assert_eq!(
            parse_model_output("```\n{\"operation\":\"READ\",\"query\":\"SELECT 1\"}\n```"),
            Err(ParseError::NoFencedBlock)
        );
        assert_eq!(extract_query(""), GeneratedQuery::unknown());
    }

    #[test]
    fn test_malformed_json() {
        let text = "```json\n{\"operation\": \"READ\", \"query\": }\n```";
        assert!(matches!(
            parse_model_output(text),
            Err(ParseError::InvalidJson(_))
        ));
        assert_eq!(extract_query(text), GeneratedQuery::unknown());
    }

    #[test]
    fn test_unsupported_operation() {
        for label in ["DROP", "read", "UNKNOWN", ""] {
            let text = format!("```json\n{{\"operation\":\"{label}\",\"query\":\"SELECT 1\"}}\n```");
            assert_eq!(
                parse_model_output(&text),
                Err(ParseError::UnsupportedOperation(label.to_string()))
            );
            assert_eq!(extract_query(&text), GeneratedQuery::unknown());
        }
    }

    #[test]
    fn test_missing_operation_field() {
        let text = "```json\n{\"query\":\"SELECT 1\"}\n```";
        assert_eq!(extract_query(text), GeneratedQuery::unknown());
    }

    #[test]
    fn test_non_string_operation_is_invalid_json() {
        let text = "```json\n{\"operation\":3,\"query\":\"SELECT 1\"}\n```";
        assert!(matches!(
            parse_model_output(text),
            Err(ParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_missing_query_gives_empty_sql() {
        let text = "```json\n{\"operation\":\"UPDATE\"}\n```";
        assert_eq!(
            extract_query(text),
            GeneratedQuery {
                operation: OperationKind::Update,
                sql: String::new(),
            }
        );
    }

    #[test]
    fn test_operation_labels() {
        assert_eq!(OperationKind::from_label("INSERT"), OperationKind::Insert);
        assert_eq!(OperationKind::from_label("DELETE"), OperationKind::Delete);
        assert_eq!(OperationKind::from_label("MERGE"), OperationKind::Unknown);
        assert_eq!(OperationKind::Update.to_string(), "UPDATE");
        assert_eq!(
            serde_json::to_value(OperationKind::Read).unwrap(),
            serde_json::json!("READ")
        );
        assert!(OperationKind::Delete.is_mutating());
        assert!(!OperationKind::Read.is_mutating());
        assert!(!OperationKind::Unknown.is_mutating());
    }
}
