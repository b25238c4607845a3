//! Database driver abstraction trait
//!
//! Defines the interface that all database backends must implement.

use crate::db::QueryItem;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::str::FromStr;
use std::time::Duration;

/// Which database backend a request targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    SqlServer,
    Sqlite,
}

impl std::fmt::Display for DatabaseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackend::SqlServer => write!(f, "SQL Server"),
            DatabaseBackend::Sqlite => write!(f, "SQLite"),
        }
    }
}

impl FromStr for DatabaseBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlserver" | "mssql" | "sql server" => Ok(DatabaseBackend::SqlServer),
            "sqlite" | "sqlite3" => Ok(DatabaseBackend::Sqlite),
            other => Err(format!("unknown driver '{}'", other)),
        }
    }
}

/// Lazy stream of columns/rows produced by one script.
pub type RowStream<'a> = BoxStream<'a, Result<QueryItem>>;

/// Factory for connections to one backend.
///
/// All methods are async because callers live in a tokio runtime.
/// Synchronous drivers (like rusqlite) should use `spawn_blocking` internally.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Which backend this driver represents
    fn backend(&self) -> DatabaseBackend;

    /// Open a new connection. `timeout` is a hint for backend-level waits;
    /// the registry enforces the hard deadline.
    async fn open_connection(
        &self,
        connection_string: &str,
        timeout: Duration,
    ) -> Result<Box<dyn DriverConnection>>;
}

/// A live backend connection, owned by the handle registry.
#[async_trait]
pub trait DriverConnection: Send {
    /// Release the backend connection. Later calls are no-ops.
    async fn close(&mut self) -> Result<()>;

    /// Run a script for its side effects, returning the affected-row count of
    /// each statement in order. Statements that return rows count as 0.
    async fn execute_non_query(&mut self, script: &str) -> Result<Vec<u64>>;

    /// Run a script and stream its result sets.
    ///
    /// Each row-producing statement yields one `QueryItem::Columns` followed by
    /// its rows, in source order. Dropping the stream abandons the remaining rows.
    async fn execute_query<'a>(&'a mut self, script: &str) -> Result<RowStream<'a>>;
}
