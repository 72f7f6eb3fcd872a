//! SQLite connection implementation

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, OpenFlags, params_from_iter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use txfixture_core::{
    ColumnMeta, Connection, DialectInfo, MEMORY_DATABASE, QueryResult, RawConnection, Result,
    Row, SchemaIntrospection, StatementResult, Transaction, TxFixtureError, Value,
};

use crate::{SqliteRawConnection, SqliteSavepoint, SqliteTransaction};

/// SQLite connection wrapper
pub struct SqliteConnection {
    conn: Arc<Mutex<RusqliteConnection>>,
    path: String,
    closed: Arc<AtomicBool>,
    savepoint_seq: AtomicUsize,
}

impl SqliteConnection {
    /// Open a SQLite database
    pub fn open(path: &str) -> Result<Self> {
        tracing::info!(path = %path, "opening SQLite database");
        let expanded_path = Self::expand_path(path)?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if path == MEMORY_DATABASE {
            RusqliteConnection::open_in_memory().map_err(|e| {
                TxFixtureError::Connection(format!("Failed to open in-memory database: {}", e))
            })?
        } else {
            if !expanded_path.starts_with("file:") {
                let file_path = std::path::Path::new(&expanded_path);
                if let Some(parent) = file_path.parent()
                    && !parent.exists()
                {
                    return Err(TxFixtureError::Connection(format!(
                        "Parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }

            RusqliteConnection::open_with_flags(&expanded_path, flags).map_err(|e| {
                TxFixtureError::Connection(format!(
                    "Failed to open SQLite database at '{}': {}",
                    expanded_path, e
                ))
            })?
        };

        conn.pragma_update(None, "foreign_keys", "ON").map_err(|e| {
            TxFixtureError::Connection(format!("Failed to enable foreign keys: {}", e))
        })?;
        if path != MEMORY_DATABASE {
            conn.pragma_update(None, "journal_mode", "WAL").map_err(|e| {
                TxFixtureError::Connection(format!("Failed to set journal mode: {}", e))
            })?;
        }
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(|e| {
            TxFixtureError::Connection(format!("Failed to set synchronous mode: {}", e))
        })?;
        // Concurrent pooled connections wait for the write lock instead of failing
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| TxFixtureError::Connection(format!("Failed to set busy timeout: {}", e)))?;

        tracing::info!(path = %expanded_path, "SQLite database connection established");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: expanded_path,
            closed: Arc::new(AtomicBool::new(false)),
            savepoint_seq: AtomicUsize::new(0),
        })
    }

    /// Expand `~` and make relative paths absolute
    fn expand_path(path: &str) -> Result<String> {
        if path == MEMORY_DATABASE || path.starts_with("file:") {
            return Ok(path.to_string());
        }

        let expanded = if let Some(rest) = path.strip_prefix("~/") {
            let home = std::env::var_os("HOME").ok_or_else(|| {
                TxFixtureError::Configuration("Unable to determine HOME directory".into())
            })?;
            std::path::PathBuf::from(home)
                .join(rest)
                .to_string_lossy()
                .to_string()
        } else if path.starts_with('~') {
            return Err(TxFixtureError::Configuration(
                "User-specific home directories (~user) are not supported".into(),
            ));
        } else {
            path.to_string()
        };

        let path_buf = std::path::PathBuf::from(&expanded);
        if path_buf.is_relative() {
            Ok(std::env::current_dir()?
                .join(path_buf)
                .to_string_lossy()
                .to_string())
        } else {
            Ok(expanded)
        }
    }

    /// Path of the database file, or `:memory:`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Execute several `;`-separated statements without parameters
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        tracing::debug!("executing SQL batch");
        self.ensure_open()?;
        let conn = self.conn.lock();
        conn.execute_batch(sql)
            .map_err(|e| TxFixtureError::Query(format!("Failed to execute batch: {}", e)))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TxFixtureError::Connection(
                "SQLite connection is closed".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    fn dialect(&self) -> DialectInfo {
        crate::sqlite_dialect()
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        run_execute(&conn, sql, params)
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        run_query(&conn, sql, params)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        tracing::debug!("beginning SQLite transaction");
        self.ensure_open()?;
        {
            let conn = self.conn.lock();
            // DEFERRED takes the write lock on the first write
            conn.execute_batch("BEGIN DEFERRED").map_err(|e| {
                TxFixtureError::Query(format!("Failed to begin transaction: {}", e))
            })?;
        }
        Ok(Box::new(SqliteTransaction::new(Arc::clone(&self.conn))))
    }

    async fn begin_nested(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        if !self.in_transaction() {
            return Err(TxFixtureError::Query(
                "cannot begin a nested transaction outside of a transaction".into(),
            ));
        }
        let seq = self.savepoint_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let name = format!("sqlite_sp_{}", seq);
        {
            let conn = self.conn.lock();
            conn.execute_batch(&crate::sqlite_dialect().savepoint_sql(&name))
                .map_err(|e| {
                    TxFixtureError::Query(format!("Failed to create savepoint: {}", e))
                })?;
        }
        tracing::debug!(savepoint = %name, "SQLite savepoint created");
        Ok(Box::new(SqliteSavepoint::new(Arc::clone(&self.conn), name)))
    }

    fn in_transaction(&self) -> bool {
        !self.conn.lock().is_autocommit()
    }

    async fn close(&self) -> Result<()> {
        tracing::info!(path = %self.path, "closing SQLite connection");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn as_schema_introspection(&self) -> Option<&dyn SchemaIntrospection> {
        Some(self)
    }

    async fn raw_connection(&self) -> Result<Arc<dyn RawConnection>> {
        self.ensure_open()?;
        Ok(Arc::new(SqliteRawConnection::new(
            Arc::clone(&self.conn),
            Arc::clone(&self.closed),
        )))
    }
}

/// Run a statement on a locked connection
pub(crate) fn run_execute(
    conn: &RusqliteConnection,
    sql: &str,
    params: &[Value],
) -> Result<StatementResult> {
    let rusqlite_params = values_to_rusqlite(params);
    let rows_affected = conn
        .execute(sql, params_from_iter(rusqlite_params.iter()))
        .map_err(|e| TxFixtureError::Query(format!("Failed to execute statement: {}", e)))?;

    tracing::debug!(affected_rows = rows_affected, "statement executed");
    Ok(StatementResult {
        affected_rows: rows_affected as u64,
        last_insert_id: Some(conn.last_insert_rowid()),
    })
}

/// Run a query on a locked connection
pub(crate) fn run_query(
    conn: &RusqliteConnection,
    sql: &str,
    params: &[Value],
) -> Result<QueryResult> {
    let start_time = std::time::Instant::now();
    let rusqlite_params = values_to_rusqlite(params);

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| TxFixtureError::Query(format!("Failed to prepare query: {}", e)))?;

    let mut column_names: Vec<String> = Vec::with_capacity(stmt.column_count());
    let mut columns: Vec<ColumnMeta> = Vec::with_capacity(stmt.column_count());
    for (idx, col) in stmt.columns().iter().enumerate() {
        let name = col.name().to_string();
        // Declared type from CREATE TABLE, if the column maps to one
        let data_type = col.decl_type().unwrap_or("DYNAMIC").to_string();
        column_names.push(name.clone());
        columns.push(ColumnMeta {
            name,
            data_type,
            nullable: true,
            ordinal: idx,
        });
    }

    let mut rows = Vec::new();
    let mut query_rows = stmt
        .query(params_from_iter(rusqlite_params.iter()))
        .map_err(|e| TxFixtureError::Query(format!("Failed to execute query: {}", e)))?;

    while let Some(row) = query_rows
        .next()
        .map_err(|e| TxFixtureError::Query(format!("Failed to fetch row: {}", e)))?
    {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(rusqlite_to_value(row, i)?);
        }
        rows.push(Row::new(column_names.clone(), values));
    }

    let execution_time_ms = start_time.elapsed().as_millis() as u64;
    tracing::debug!(
        row_count = rows.len(),
        execution_time_ms = execution_time_ms,
        "query executed successfully"
    );
    Ok(QueryResult {
        id: uuid::Uuid::new_v4(),
        columns,
        rows,
        affected_rows: 0,
        execution_time_ms,
    })
}

/// Convert our Value types to rusqlite-compatible types
fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(if *b { 1 } else { 0 }),
        Value::Int64(i) => rusqlite::types::Value::Integer(*i),
        Value::Float64(f) => rusqlite::types::Value::Real(*f),
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Bytes(b) => rusqlite::types::Value::Blob(b.clone()),
        Value::DateTimeUtc(dt) => rusqlite::types::Value::Text(dt.to_rfc3339()),
        Value::Uuid(u) => rusqlite::types::Value::Text(u.to_string()),
    }
}

/// Convert rusqlite row value to our Value type
fn rusqlite_to_value(row: &rusqlite::Row, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| TxFixtureError::Query(e.to_string()))?;

    Ok(match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    })
}
