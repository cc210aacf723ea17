use crate::db::schema::Row;
use crate::nl2sql::response::{Payload, QueryResponse, Status};

/// Plain-text rendering of a response for terminal display.
pub fn render_text(resp: &QueryResponse) -> String {
    let status = match resp.status {
        Status::Success => "success",
        Status::Error => "error",
    };
    let mut out = format!(
        "Operation Type: {}\nStatus: {}\nGenerated SQL Query:\n    {}\n",
        resp.operation,
        status,
        resp.sql_query.as_deref().unwrap_or("")
    );

    match resp.payload {
        Payload::CreatedRecord(ref record) => {
            out.push_str("Inserted Record:\n");
            match record {
                Some(row) => render_rows(&mut out, std::slice::from_ref(row)),
                None => out.push_str("No record inserted.\n"),
            }
        }
        Payload::Results(ref rows) => {
            render_section(&mut out, "Query Results:", "No results found.", rows)
        }
        Payload::UpdatedRecords(ref rows) => {
            render_section(&mut out, "Updated Records:", "No records updated.", rows)
        }
        Payload::DeletedRecords(ref rows) => {
            render_section(&mut out, "Deleted Records:", "No records deleted.", rows)
        }
        Payload::Message(ref msg) => out.push_str(&format!("Error: {}\n", msg)),
    }
    out
}

fn render_section(out: &mut String, title: &str, empty: &str, rows: &[Row]) {
    out.push_str(title);
    out.push('\n');
    if rows.is_empty() {
        out.push_str(empty);
        out.push('\n');
    } else {
        render_rows(out, rows);
    }
}

fn render_rows(out: &mut String, rows: &[Row]) {
    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .map(|(name, value)| {
                let json = serde_json::to_string(value).unwrap_or_default();
                format!("{}={}", name, json)
            })
            .collect();
        out.push_str(&format!("  {}\n", cells.join(", ")));
    }
}
