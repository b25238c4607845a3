//! Connection handle registry
//!
//! Maps opaque integer handles to live driver connections. The map lock is
//! held only for insert/remove/lookup; each connection carries its own async
//! mutex so a long query on one handle never stalls the others.

use crate::db::driver::{DatabaseBackend, DatabaseDriver, DriverConnection};
use crate::error::{ConnectorError, ConnectorResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Opaque reference to an open connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionHandle(pub u64);

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connection shared between the registry and the executor using it
pub type SharedConnection = Arc<tokio::sync::Mutex<Box<dyn DriverConnection>>>;

struct Entry {
    backend: DatabaseBackend,
    conn: SharedConnection,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    entries: HashMap<ConnectionHandle, Entry>,
}

/// Handle table shared by every request
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a connection through `driver` and register it.
    ///
    /// The driver gets at most `timeout`; a handle id is consumed only once
    /// the connection is up.
    pub async fn open(
        &self,
        driver: &dyn DatabaseDriver,
        connection_string: &str,
        timeout: Duration,
    ) -> ConnectorResult<ConnectionHandle> {
        let backend = driver.backend();
        let conn = tokio::time::timeout(timeout, driver.open_connection(connection_string, timeout))
            .await
            .map_err(|_| {
                ConnectorError::Connection(format!(
                    "{} open timed out after {:?}",
                    backend, timeout
                ))
            })?
            .map_err(ConnectorError::connection)?;

        let handle = {
            let mut inner = self.lock();
            inner.next_id += 1;
            let handle = ConnectionHandle(inner.next_id);
            inner.entries.insert(
                handle,
                Entry {
                    backend,
                    conn: Arc::new(tokio::sync::Mutex::new(conn)),
                },
            );
            handle
        };

        info!(%handle, %backend, "connection opened");
        Ok(handle)
    }

    /// Resolve a handle for use by an executor
    pub fn get(
        &self,
        handle: ConnectionHandle,
        backend: DatabaseBackend,
    ) -> ConnectorResult<SharedConnection> {
        let inner = self.lock();
        let entry = inner
            .entries
            .get(&handle)
            .ok_or_else(|| ConnectorError::handle(handle, "connection is not open"))?;
        check_backend(handle, entry, backend)?;
        Ok(Arc::clone(&entry.conn))
    }

    /// Close a handle. The mapping is removed even when the driver fails to
    /// close; that failure is reported as a connection error.
    pub async fn close(
        &self,
        handle: ConnectionHandle,
        backend: DatabaseBackend,
    ) -> ConnectorResult<()> {
        let entry = {
            let mut inner = self.lock();
            let entry = inner
                .entries
                .get(&handle)
                .ok_or_else(|| ConnectorError::handle(handle, "connection is not open"))?;
            check_backend(handle, entry, backend)?;
            inner
                .entries
                .remove(&handle)
                .ok_or_else(|| ConnectorError::handle(handle, "connection is not open"))?
        };

        // Waits for an in-flight request on this handle to finish.
        let mut conn = entry.conn.lock().await;
        match conn.close().await {
            Ok(()) => {
                info!(%handle, %backend, "connection closed");
                Ok(())
            }
            Err(e) => {
                warn!(%handle, %backend, error = %e, "driver close failed; handle released");
                Err(ConnectorError::connection(e))
            }
        }
    }

    /// Number of open handles
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_backend(
    handle: ConnectionHandle,
    entry: &Entry,
    backend: DatabaseBackend,
) -> ConnectorResult<()> {
    if entry.backend == backend {
        return Ok(());
    }
    debug!(%handle, opened = %entry.backend, requested = %backend, "driver mismatch");
    Err(ConnectorError::handle(
        handle,
        format!("opened by the {} driver, not {}", entry.backend, backend),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::driver::RowStream;
    use anyhow::{anyhow, bail, Result};
    use async_trait::async_trait;

    /// Driver whose connections fail to close
    struct FlakyDriver;

    struct FlakyConnection;

    #[async_trait]
    impl DatabaseDriver for FlakyDriver {
        fn backend(&self) -> DatabaseBackend {
            DatabaseBackend::SqlServer
        }

        async fn open_connection(&self, cs: &str, _: Duration) -> Result<Box<dyn DriverConnection>> {
            if cs == "refuse" {
                bail!("connection refused");
            }
            Ok(Box::new(FlakyConnection))
        }
    }

    #[async_trait]
    impl DriverConnection for FlakyConnection {
        async fn close(&mut self) -> Result<()> {
            Err(anyhow!("socket already gone"))
        }

        async fn execute_non_query(&mut self, _: &str) -> Result<Vec<u64>> {
            Ok(vec![])
        }

        async fn execute_query<'a>(&'a mut self, _: &str) -> Result<RowStream<'a>> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_handles_are_monotonic_and_failed_open_consumes_none() {
        let registry = ConnectionRegistry::new();
        let first = registry.open(&FlakyDriver, "ok", TIMEOUT).await.unwrap();
        let err = registry.open(&FlakyDriver, "refuse", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Connection(_)));
        let second = registry.open(&FlakyDriver, "ok", TIMEOUT).await.unwrap();

        assert_eq!(first, ConnectionHandle(1));
        assert_eq!(second, ConnectionHandle(2));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_close_still_removes_handle() {
        let registry = ConnectionRegistry::new();
        let handle = registry.open(&FlakyDriver, "ok", TIMEOUT).await.unwrap();

        let err = registry.close(handle, DatabaseBackend::SqlServer).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Connection(_)));
        assert!(registry.is_empty());

        let err = registry.close(handle, DatabaseBackend::SqlServer).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Handle { .. }));
    }

    #[tokio::test]
    async fn test_wrong_backend_is_rejected_and_handle_kept() {
        let registry = ConnectionRegistry::new();
        let handle = registry.open(&FlakyDriver, "ok", TIMEOUT).await.unwrap();

        assert!(matches!(
            registry.get(handle, DatabaseBackend::Sqlite),
            Err(ConnectorError::Handle { .. })
        ));
        assert!(matches!(
            registry.close(handle, DatabaseBackend::Sqlite).await,
            Err(ConnectorError::Handle { .. })
        ));
        assert!(registry.get(handle, DatabaseBackend::SqlServer).is_ok());
    }
}
