//! SQLite driver for the store layer.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::{PreparedQuery, RowSink, Store};
use crate::value::{Row, Value};
use crate::{Pool, Pooled};

const BUSY_TIMEOUT_MS: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqliteOpenMode {
    ReadOnly,
    ReadWrite,
}

pub struct SqliteConn {
    conn: Connection,
}

impl SqliteConn {
    pub fn open(path: &Path, mode: SqliteOpenMode) -> rusqlite::Result<Self> {
        let flags = match mode {
            SqliteOpenMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            SqliteOpenMode::ReadWrite => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        };
        let conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        if matches!(mode, SqliteOpenMode::ReadOnly) {
            conn.pragma_update(None, "query_only", 1)?;
        }
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, err)| StoreError::Close(err.to_string()))
    }
}

/// A SQLite database file opened with one connection per concurrent caller
/// for every prepared query.
pub struct SqliteStore {
    path: PathBuf,
    mode: SqliteOpenMode,
    connections_per_query: usize,
}

impl SqliteStore {
    /// Opens `path` read-only; fails when the file cannot be opened.
    pub fn open(path: impl Into<PathBuf>, connections_per_query: usize) -> Result<Self> {
        Self::open_with_mode(path, SqliteOpenMode::ReadOnly, connections_per_query)
    }

    pub fn open_with_mode(
        path: impl Into<PathBuf>,
        mode: SqliteOpenMode,
        connections_per_query: usize,
    ) -> Result<Self> {
        let path = path.into();
        // Open once so an unreachable database fails at startup.
        let check = SqliteConn::open(&path, mode)
            .map_err(|err| StoreError::Connection(format!("{}: {err}", path.display())))?;
        check.close()?;
        Ok(Self {
            path,
            mode,
            connections_per_query: connections_per_query.max(1),
        })
    }
}

impl Store for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn prepare(&self, text: &str) -> Result<Box<dyn PreparedQuery>> {
        let mut conns = Vec::with_capacity(self.connections_per_query);
        for _ in 0..self.connections_per_query {
            let conn = SqliteConn::open(&self.path, self.mode)
                .map_err(|err| StoreError::Connection(err.to_string()))?;
            // Compiles into the connection's statement cache; executions
            // reuse the cached statement.
            let parameters = conn
                .connection()
                .prepare_cached(text)
                .map(|stmt| stmt.parameter_count())
                .map_err(|err| StoreError::Prepare {
                    query: text.to_string(),
                    message: err.to_string(),
                })?;
            if parameters != 1 {
                return Err(StoreError::Prepare {
                    query: text.to_string(),
                    message: format!("expected exactly one parameter, found {parameters}"),
                });
            }
            conns.push(conn);
        }
        debug!(
            path = %self.path.display(),
            connections = conns.len(),
            "prepared sqlite query"
        );
        Ok(Box::new(SqliteQuery {
            text: text.to_string(),
            conns: Pool::from_items(conns),
        }))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct SqliteQuery {
    text: String,
    conns: Arc<Pool<SqliteConn>>,
}

impl SqliteQuery {
    fn checkout(&self) -> Result<Pooled<SqliteConn>> {
        self.conns
            .acquire(None)
            .ok_or_else(|| StoreError::Query("sqlite query already closed".to_string()))
    }
}

impl PreparedQuery for SqliteQuery {
    fn text(&self) -> &str {
        &self.text
    }

    fn for_each_row(&self, key: &str, sink: &mut RowSink<'_>) -> Result<()> {
        let conn = self.checkout()?;
        let mut stmt = conn
            .connection()
            .prepare_cached(&self.text)
            .map_err(query_error)?;
        let width = stmt.column_count();
        let mut rows = stmt.query([key]).map_err(query_error)?;
        let mut values = Vec::with_capacity(width);
        while let Some(row) = rows.next().map_err(query_error)? {
            values.clear();
            for index in 0..width {
                values.push(convert(row.get_ref(index).map_err(query_error)?)?);
            }
            if sink(&Row::new(&values))?.is_break() {
                break;
            }
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        for conn in self.conns.drain() {
            conn.close()?;
        }
        self.conns.ensure_returned()
    }
}

fn convert(value: ValueRef<'_>) -> Result<Value> {
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(value) => Ok(Value::Integer(value)),
        ValueRef::Real(value) => Ok(Value::Real(value)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|text| Value::Text(text.to_string()))
            .map_err(|err| StoreError::Query(format!("invalid utf-8 in text column: {err}"))),
        ValueRef::Blob(_) => Err(StoreError::Unsupported("blob column".to_string())),
    }
}

fn query_error(err: rusqlite::Error) -> StoreError {
    StoreError::Query(err.to_string())
}
