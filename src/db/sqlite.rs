//! SQLite driver implementation using rusqlite
//!
//! Uses `spawn_blocking` to bridge rusqlite's synchronous API
//! into the async world expected by DatabaseDriver. Query rows are
//! handed over through a capacity-1 channel, so the blocking side only
//! steps its cursor when the consumer asks for the next item.

use crate::db::connection_string::ConnectionString;
use crate::db::driver::{DatabaseBackend, DatabaseDriver, DriverConnection, RowStream};
use crate::db::query::{CellValue, QueryItem, Row};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use rusqlite::{types::ValueRef, Batch, Connection, OpenFlags};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Where and how to open a SQLite database
#[derive(Clone, Debug, PartialEq)]
struct SqliteTarget {
    path: String,
    flags: OpenFlags,
}

impl SqliteTarget {
    /// Accepts `Data Source=<path>` (aliases `Filename`, `DataSource`) and an
    /// optional `Mode=ReadOnly|ReadWrite|ReadWriteCreate|Memory`.
    fn from_connection_string(input: &str) -> Result<Self> {
        let cs = ConnectionString::parse(input)?;
        let mode = cs.get(&["mode"]).unwrap_or("ReadWriteCreate");
        let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let (path, flags) = match mode.to_ascii_lowercase().as_str() {
            "memory" => (":memory:".to_string(), base | OpenFlags::SQLITE_OPEN_READ_WRITE),
            other => {
                let path = cs
                    .get(&["data source", "datasource", "filename"])
                    .filter(|p| !p.trim().is_empty())
                    .context("SQLite connection string requires 'Data Source'")?
                    .to_string();
                let flags = match other {
                    "readonly" => base | OpenFlags::SQLITE_OPEN_READ_ONLY,
                    "readwrite" => base | OpenFlags::SQLITE_OPEN_READ_WRITE,
                    "readwritecreate" => {
                        base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
                    }
                    _ => bail!("Unsupported SQLite mode '{}'", mode),
                };
                (path, flags)
            }
        };
        Ok(Self { path, flags })
    }

    fn open(&self, timeout: Duration) -> Result<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags)
            .with_context(|| format!("Failed to open SQLite database '{}'", self.path))?;
        conn.busy_timeout(timeout)?;
        Ok(conn)
    }
}

/// SQLite driver
#[derive(Clone, Copy, Debug, Default)]
pub struct SqliteDriver;

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Sqlite
    }

    async fn open_connection(
        &self,
        connection_string: &str,
        timeout: Duration,
    ) -> Result<Box<dyn DriverConnection>> {
        let target = SqliteTarget::from_connection_string(connection_string)?;
        let conn = tokio::task::spawn_blocking(move || target.open(timeout)).await??;

        Ok(Box::new(SqliteConnection {
            conn: Some(Arc::new(Mutex::new(conn))),
        }))
    }
}

/// An open SQLite database
pub struct SqliteConnection {
    conn: Option<Arc<Mutex<Connection>>>,
}

impl SqliteConnection {
    fn conn(&self) -> Result<Arc<Mutex<Connection>>> {
        self.conn
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| anyhow!("SQLite connection is closed"))
    }
}

#[async_trait]
impl DriverConnection for SqliteConnection {
    async fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        match Arc::try_unwrap(conn) {
            Ok(mutex) => {
                let conn = mutex.into_inner();
                tokio::task::spawn_blocking(move || conn.close().map_err(|(_, e)| e))
                    .await?
                    .context("Failed to close SQLite database")
            }
            // A query producer still holds it; the database closes when it stops.
            Err(_) => Ok(()),
        }
    }

    async fn execute_non_query(&mut self, script: &str) -> Result<Vec<u64>> {
        let conn = self.conn()?;
        let script = script.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            execute_batch_counted(&conn, &script)
        })
        .await?
    }

    async fn execute_query<'a>(&'a mut self, script: &str) -> Result<RowStream<'a>> {
        let conn = self.conn()?;
        let script = script.to_string();
        let (tx, rx) = mpsc::channel::<Result<QueryItem>>(1);

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            if let Err(e) = stream_batch(&conn, &script, &tx) {
                let _ = tx.blocking_send(Err(e));
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }
}

/// Run every statement of `script`, collecting per-statement change counts
fn execute_batch_counted(conn: &Connection, script: &str) -> Result<Vec<u64>> {
    let mut counts = Vec::new();
    let mut batch = Batch::new(conn, script);
    while let Some(mut stmt) = batch.next()? {
        if stmt.column_count() > 0 {
            let mut rows = stmt.raw_query();
            while rows.next()?.is_some() {}
            counts.push(0);
        } else {
            // total_changes() only moves on DML, so DDL reports 0.
            let before = total_changes(conn)?;
            stmt.raw_execute()?;
            counts.push(total_changes(conn)?.saturating_sub(before));
        }
    }
    Ok(counts)
}

fn total_changes(conn: &Connection) -> Result<u64> {
    let total: i64 = conn.query_row("select total_changes()", [], |row| row.get(0))?;
    Ok(total as u64)
}

/// Producer side of `execute_query`. Returns early, without error, once the
/// receiving stream has been dropped.
fn stream_batch(
    conn: &Connection,
    script: &str,
    tx: &mpsc::Sender<Result<QueryItem>>,
) -> Result<()> {
    let mut batch = Batch::new(conn, script);
    while let Some(mut stmt) = batch.next()? {
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        if columns.is_empty() {
            stmt.raw_execute()?;
            continue;
        }

        let col_count = columns.len();
        if tx.blocking_send(Ok(QueryItem::Columns(columns))).is_err() {
            return Ok(());
        }

        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut row_data: Row = Vec::with_capacity(col_count);
            for i in 0..col_count {
                row_data.push(cell_value(row.get_ref(i)?));
            }
            if tx.blocking_send(Ok(QueryItem::Row(row_data))).is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}

fn cell_value(value: ValueRef<'_>) -> CellValue {
    match value {
        ValueRef::Null => CellValue::Null,
        ValueRef::Integer(v) => CellValue::Int(v),
        ValueRef::Real(v) => CellValue::Float(v),
        ValueRef::Text(v) => CellValue::String(String::from_utf8_lossy(v).to_string()),
        ValueRef::Blob(v) => CellValue::Binary(v.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn open_memory() -> Box<dyn DriverConnection> {
        SqliteDriver
            .open_connection("Data Source=:memory:", Duration::from_secs(1))
            .await
            .unwrap()
    }

    #[test]
    fn test_target_modes() {
        let t = SqliteTarget::from_connection_string("Mode=Memory").unwrap();
        assert_eq!(t.path, ":memory:");

        let t = SqliteTarget::from_connection_string("Data Source=app.db;Mode=ReadOnly").unwrap();
        assert_eq!(t.path, "app.db");
        assert!(t.flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY));

        assert!(SqliteTarget::from_connection_string("Mode=ReadOnly").is_err());
        assert!(SqliteTarget::from_connection_string("Data Source=x;Mode=Shared").is_err());
    }

    #[tokio::test]
    async fn test_non_query_counts_per_statement() {
        let mut conn = open_memory().await;
        let counts = conn
            .execute_non_query(
                "create table t (a integer); \
                 insert into t values (1), (2), (3); \
                 update t set a = a + 1 where a > 1; \
                 create table u (b integer); \
                 select * from t;",
            )
            .await
            .unwrap();
        assert_eq!(counts, vec![0, 3, 2, 0, 0]);
    }

    #[tokio::test]
    async fn test_leading_comments_do_not_hide_changes() {
        let mut conn = open_memory().await;
        conn.execute_non_query("create table t (a integer); insert into t values (1), (2), (3);")
            .await
            .unwrap();

        let counts = conn
            .execute_non_query(
                "-- bump all\nupdate t set a = a + 1; \
                 /* bump */ update t set a = a + 1 where a > 2; \
                 drop table t;",
            )
            .await
            .unwrap();
        assert_eq!(counts, vec![3, 2, 0]);
    }

    #[tokio::test]
    async fn test_query_yields_columns_then_rows_per_statement() {
        let mut conn = open_memory().await;
        conn.execute_non_query("create table t (a integer, b text); insert into t values (1, 'x');")
            .await
            .unwrap();

        let items: Vec<QueryItem> = conn
            .execute_query("select a, b from t; select a from t where a > 5")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            items,
            vec![
                QueryItem::Columns(vec!["a".into(), "b".into()]),
                QueryItem::Row(vec![CellValue::Int(1), CellValue::String("x".into())]),
                QueryItem::Columns(vec!["a".into()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_stream_releases_connection() {
        let mut conn = open_memory().await;
        conn.execute_non_query(
            "create table t (a integer); \
             with recursive s(i) as (select 0 union all select i + 1 from s where i < 99) insert into t select i from s;",
        )
        .await
        .unwrap();

        {
            let mut stream = conn.execute_query("select a from t").await.unwrap();
            assert!(matches!(stream.next().await, Some(Ok(QueryItem::Columns(_)))));
        }

        let counts = conn.execute_non_query("delete from t").await.unwrap();
        assert_eq!(counts, vec![100]);
    }

    #[tokio::test]
    async fn test_syntax_error_surfaces_on_stream() {
        let mut conn = open_memory().await;
        let mut stream = conn.execute_query("selec nothing").await.unwrap();
        assert!(matches!(stream.next().await, Some(Err(_))));
    }

    #[tokio::test]
    async fn test_close_then_use_fails() {
        let mut conn = open_memory().await;
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.execute_non_query("select 1").await.is_err());
    }
}
