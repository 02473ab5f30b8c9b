use std::path::PathBuf;

use futures::future::BoxFuture;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

use opflow_core::error::{OpflowError, Result};
use opflow_core::traits::QueryExecutor;
use opflow_core::types::QueryRows;

/// Read-only SQLite data source.
pub struct SqliteExecutor {
    path: PathBuf,
}

impl SqliteExecutor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn db_err(e: rusqlite::Error) -> OpflowError {
    OpflowError::DataSource(e.to_string())
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::json!(i),
        ValueRef::Real(f) => serde_json::json!(f),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => serde_json::Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

fn run_query(path: PathBuf, sql: String, max_rows: usize) -> Result<QueryRows> {
    let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(db_err)?;
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut out = Vec::new();
    let mut truncated = false;
    let mut rows = stmt.query([]).map_err(db_err)?;
    while let Some(row) = rows.next().map_err(db_err)? {
        // One row past the limit is enough to know the result was cut.
        if out.len() == max_rows {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(to_json(row.get_ref(i).map_err(db_err)?));
        }
        out.push(values);
    }

    Ok(QueryRows {
        columns,
        rows: out,
        truncated,
    })
}

impl QueryExecutor for SqliteExecutor {
    fn query(&self, sql: &str, max_rows: usize) -> BoxFuture<'_, Result<QueryRows>> {
        let path = self.path.clone();
        let sql = sql.to_string();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || run_query(path, sql, max_rows))
                .await
                .map_err(|e| OpflowError::DataSource(format!("query task failed: {}", e)))?
        })
    }
}
