use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use super::{ToolContext, ToolHandler, ToolOutcome, ToolOutput};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};

pub const DEFAULT_MAX_ROWS: usize = 50;

/// Read-only queries against a SQLite database.
///
/// The table layout is read once at construction and advertised in the tool
/// description so the model can write queries against it.
pub struct SqlQuery {
    path: PathBuf,
    max_rows: usize,
    schema: String,
}

impl SqlQuery {
    pub fn new<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let expanded = shellexpand::tilde(&path.as_ref().to_string_lossy()).into_owned();
        let path = PathBuf::from(expanded);
        let conn = open_read_only(&path)?;
        let schema = describe_schema(&conn)?;
        Ok(Self {
            path,
            max_rows: DEFAULT_MAX_ROWS,
            schema,
        })
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }

    async fn query(&self, sql: String) -> AgentResult<Value> {
        let path = self.path.clone();
        let max_rows = self.max_rows;
        tokio::task::spawn_blocking(move || run_query(&path, &sql, max_rows))
            .await
            .map_err(|e| AgentError::Internal(e.to_string()))?
    }
}

fn open_read_only(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

fn describe_schema(conn: &Connection) -> rusqlite::Result<String> {
    let mut tables = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = tables
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut lines = Vec::new();
    for name in names {
        let mut info = conn.prepare(&format!("PRAGMA table_info(\"{}\")", name.replace('"', "\"\"")))?;
        let columns = info
            .query_map([], |row| {
                Ok(format!("{} {}", row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        lines.push(format!("{}({})", name, columns.join(", ")));
    }
    Ok(lines.join("\n"))
}

fn ensure_read_only(sql: &str) -> AgentResult<()> {
    let statement = sql.trim().trim_end_matches(';').trim();
    if statement.contains(';') {
        return Err(AgentError::InvalidParameters(
            "only a single statement is allowed".into(),
        ));
    }
    let keyword = statement
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase();
    match keyword.as_str() {
        "SELECT" | "WITH" => Ok(()),
        _ => Err(AgentError::InvalidParameters(
            "only SELECT queries are allowed".into(),
        )),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => json!(String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => json!(format!("<{} bytes>", b.len())),
    }
}

fn run_query(path: &Path, sql: &str, max_rows: usize) -> AgentResult<Value> {
    let failed = |e: rusqlite::Error| AgentError::ExecutionError(e.to_string());

    let conn = open_read_only(path).map_err(failed)?;
    let mut statement = conn.prepare(sql).map_err(failed)?;
    let columns: Vec<String> = statement
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut rows = statement.query([]).map_err(failed)?;
    let mut collected = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next().map_err(failed)? {
        if collected.len() == max_rows {
            truncated = true;
            break;
        }
        let values: Vec<Value> = (0..columns.len())
            .map(|i| row.get_ref(i).map(to_json))
            .collect::<rusqlite::Result<_>>()
            .map_err(failed)?;
        collected.push(Value::Array(values));
    }

    Ok(json!({
        "columns": columns,
        "rows": collected,
        "truncated": truncated,
    }))
}

#[async_trait]
impl ToolHandler for SqlQuery {
    fn tool(&self) -> Tool {
        Tool::new(
            "sql_query",
            format!(
                "Run a read-only SQL query (SQLite dialect, SELECT only) and return the matching rows. \
                At most {} rows are returned. The database has these tables:\n{}",
                self.max_rows, self.schema
            ),
            json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "A single SELECT statement."
                    }
                }
            }),
        )
    }

    async fn call(&self, call: &ToolCall, _ctx: &ToolContext) -> AgentResult<ToolOutcome> {
        let sql = call
            .str_arg("query")
            .ok_or_else(|| AgentError::InvalidParameters("'query' must be a string".into()))?;
        ensure_read_only(sql)?;

        tracing::debug!(sql, "sql query");
        let result = self.query(sql.to_string()).await?;
        Ok(ToolOutcome::Complete(ToolOutput::json(result)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::Content;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shop.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, category TEXT, price REAL);
             INSERT INTO products (name, category, price) VALUES
                ('Kettle', 'kitchen', 24.5),
                ('Toaster', 'kitchen', 31.0),
                ('Lamp', 'living', 18.0);",
        )
        .unwrap();
        (dir, path)
    }

    fn result_of(outcome: ToolOutcome) -> Value {
        match outcome {
            ToolOutcome::Complete(output) => match &output.content[..] {
                [Content::Json(json)] => json.value.clone(),
                other => panic!("unexpected content {:?}", other),
            },
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_schema_in_description() {
        let (_dir, path) = fixture();
        let tool = SqlQuery::new(&path).unwrap().tool();
        assert!(tool
            .description
            .contains("products(id INTEGER, name TEXT, category TEXT, price REAL)"));
    }

    #[tokio::test]
    async fn test_select_returns_rows() {
        let (_dir, path) = fixture();
        let tool = SqlQuery::new(&path).unwrap();
        let call = ToolCall::new(
            "sql_query",
            json!({"query": "SELECT category, COUNT(*) AS n FROM products GROUP BY category ORDER BY category"}),
        );

        let value = result_of(tool.call(&call, &ToolContext::default()).await.unwrap());
        assert_eq!(value["columns"], json!(["category", "n"]));
        assert_eq!(value["rows"], json!([["kitchen", 2], ["living", 1]]));
        assert_eq!(value["truncated"], json!(false));
    }

    #[tokio::test]
    async fn test_row_cap() {
        let (_dir, path) = fixture();
        let tool = SqlQuery::new(&path).unwrap().with_max_rows(2);
        let call = ToolCall::new("sql_query", json!({"query": "SELECT name FROM products ORDER BY id"}));

        let value = result_of(tool.call(&call, &ToolContext::default()).await.unwrap());
        assert_eq!(value["rows"], json!([["Kettle"], ["Toaster"]]));
        assert_eq!(value["truncated"], json!(true));
    }

    #[tokio::test]
    async fn test_writes_rejected() {
        let (_dir, path) = fixture();
        let tool = SqlQuery::new(&path).unwrap();
        let ctx = ToolContext::default();

        for sql in [
            "DELETE FROM products",
            "SELECT 1; DROP TABLE products",
            "  update products set price = 0",
        ] {
            let call = ToolCall::new("sql_query", json!({ "query": sql }));
            let err = tool.call(&call, &ctx).await.unwrap_err();
            assert!(matches!(err, AgentError::InvalidParameters(_)), "{}", sql);
        }
    }

    #[tokio::test]
    async fn test_bad_sql_is_execution_error() {
        let (_dir, path) = fixture();
        let tool = SqlQuery::new(&path).unwrap();
        let call = ToolCall::new("sql_query", json!({"query": "SELECT missing FROM products"}));
        let err = tool.call(&call, &ToolContext::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::ExecutionError(_)));
    }
}
