/// Default system instruction sent with every completion request.
pub const SYSTEM_PROMPT: &str = "You are an expert in writing error free PostgreSQL queries \
based on the questions asked by an analyst who is exploring the data in this database.";

/// Fill the NL-to-SQL template with the schema context and the user's request.
///
/// Both values are inserted verbatim.
pub fn build_prompt(context: &str, nl_query: &str) -> String {
    format!(
        r#"
The following is the information about table schema present in the PostgreSQL:
{context}

Convert this natural language query to PostgreSQL SQL Query:
"{nl_query}"

First, determine the operation type (INSERT, READ, UPDATE, or DELETE) and then generate the appropriate query.

Note:
- Use PostgreSQL syntax
- Include proper table aliases when joining
- Use appropriate PostgreSQL functions
- Ensure proper handling of NULL values
- Consider table relationships when joining
- Use table descriptions to understand the context better
- For INSERT operations, include RETURNING clause to get the created record
- For UPDATE operations, include RETURNING clause to get the updated record
- For DELETE operations, include RETURNING clause to get the deleted record

Respond with the operation type and SQL query in JSON format:
```json
{{
    "operation": "<OPERATION_TYPE>",
    "query": "<sql_query>"
}}
```
"#
    )
}
