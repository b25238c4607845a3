//! Command dispatcher
//!
//! `Connector` is the single entry point: it validates a request, resolves
//! its driver and handle, and routes it to the matching executor.

use crate::config::ConnectorConfig;
use crate::db::sqlite::SqliteDriver;
use crate::db::sqlserver::SqlServerDriver;
use crate::db::{
    ConnectionHandle, ConnectionRegistry, DatabaseBackend, DatabaseDriver, NonQueryResult,
    ResultSet,
};
use crate::error::{ConnectorError, ConnectorResult};
use crate::request::{
    CloseRequest, NonQueryRequest, OpenRequest, QueryRequest, RawRequest, Request,
};
use crate::results::{collect_results, stream_results, Callback};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// What a request returns to its caller
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Handle(ConnectionHandle),
    Closed,
    NonQuery(NonQueryResult),
    /// Buffered result sets; empty when results were streamed to a callback
    ResultSets(Vec<ResultSet>),
}

impl Response {
    pub fn handle(&self) -> Option<ConnectionHandle> {
        match self {
            Response::Handle(h) => Some(*h),
            _ => None,
        }
    }

    pub fn rowcount(&self) -> Option<u64> {
        match self {
            Response::NonQuery(r) => Some(r.rowcount),
            _ => None,
        }
    }

    pub fn into_result_sets(self) -> Option<Vec<ResultSet>> {
        match self {
            Response::ResultSets(sets) => Some(sets),
            _ => None,
        }
    }
}

/// Stateless dispatcher over a shared handle registry. Cheap to clone.
#[derive(Clone)]
pub struct Connector {
    config: Arc<ConnectorConfig>,
    registry: ConnectionRegistry,
    drivers: Arc<HashMap<DatabaseBackend, Arc<dyn DatabaseDriver>>>,
}

impl Connector {
    /// Connector with the built-in SQL Server and SQLite drivers
    pub fn new(config: ConnectorConfig) -> Self {
        Self::with_drivers(
            config,
            [
                Arc::new(SqlServerDriver) as Arc<dyn DatabaseDriver>,
                Arc::new(SqliteDriver),
            ],
        )
    }

    /// Connector with an explicit driver set; a later driver for the same
    /// backend replaces an earlier one.
    pub fn with_drivers(
        config: ConnectorConfig,
        drivers: impl IntoIterator<Item = Arc<dyn DatabaseDriver>>,
    ) -> Self {
        let drivers = drivers.into_iter().map(|d| (d.backend(), d)).collect();
        Self {
            config: Arc::new(config),
            registry: ConnectionRegistry::new(),
            drivers: Arc::new(drivers),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn driver(&self, backend: DatabaseBackend) -> ConnectorResult<&Arc<dyn DatabaseDriver>> {
        self.drivers
            .get(&backend)
            .ok_or_else(|| ConnectorError::validation(format!("no {} driver is registered", backend)))
    }

    /// Validate a JSON configuration and execute it
    pub async fn invoke(
        &self,
        config: serde_json::Value,
        callback: Option<Callback>,
    ) -> ConnectorResult<Response> {
        let mut raw = RawRequest::from_json(config)?;
        self.apply_environment(&mut raw)?;
        self.execute(Request::from_raw(raw, callback)?).await
    }

    /// Fill a missing `driver` and `connectionString` from the environment the
    /// request names, or else from the selected default environment.
    fn apply_environment(&self, raw: &mut RawRequest) -> ConnectorResult<()> {
        let env = match raw.environment.as_deref() {
            Some(name) => Some(self.config.environment(name).ok_or_else(|| {
                ConnectorError::validation(format!("unknown environment '{}'", name))
            })?),
            None => self.config.selected_environment(),
        };
        if let Some(env) = env {
            raw.driver.get_or_insert_with(|| env.driver.clone());
            raw.connection_string
                .get_or_insert_with(|| env.connection_string.clone());
        }
        Ok(())
    }

    /// Route a validated request to its executor
    pub async fn execute(&self, request: Request) -> ConnectorResult<Response> {
        debug!(command = ?request.command(), "dispatching request");
        match request {
            Request::Open(req) => self.open(req).await.map(Response::Handle),
            Request::Close(req) => self.close(req).await.map(|()| Response::Closed),
            Request::NonQuery(req) => self.non_query(req).await.map(Response::NonQuery),
            Request::Query(req) => self.query(req).await.map(Response::ResultSets),
        }
    }

    pub async fn open(&self, req: OpenRequest) -> ConnectorResult<ConnectionHandle> {
        let driver = self.driver(req.driver)?;
        let timeout = req.timeout.unwrap_or_else(|| self.config.open_timeout());
        self.registry
            .open(driver.as_ref(), &req.connection_string, timeout)
            .await
    }

    pub async fn close(&self, req: CloseRequest) -> ConnectorResult<()> {
        self.registry.close(req.handle, req.driver).await
    }

    /// Run one script for its side effects
    pub async fn non_query(&self, req: NonQueryRequest) -> ConnectorResult<NonQueryResult> {
        let conn = self.registry.get(req.handle, req.driver)?;
        let mut conn = conn.lock().await;

        let counts = conn
            .execute_non_query(&req.source)
            .await
            .map_err(ConnectorError::query)?;
        let rowcount = self.config.rowcount_mode.apply(&counts);

        debug!(handle = %req.handle, statements = counts.len(), rowcount, "non-query finished");
        Ok(NonQueryResult { rowcount })
    }

    /// Run a query script. With a callback every result set is streamed and
    /// the returned sequence is empty; without one all sets are buffered.
    pub async fn query(&self, req: QueryRequest) -> ConnectorResult<Vec<ResultSet>> {
        let conn = self.registry.get(req.handle, req.driver)?;
        let mut conn = conn.lock().await;

        let items = conn
            .execute_query(&req.source)
            .await
            .map_err(ConnectorError::query)?;

        match &req.callback {
            Some(callback) => {
                let summary = stream_results(items, callback, req.packet_size).await?;
                info!(
                    handle = %req.handle,
                    result_sets = summary.result_sets,
                    rows = summary.rows,
                    chunks = summary.chunks,
                    "query streamed"
                );
                Ok(Vec::new())
            }
            None => {
                if req.packet_size.is_some() {
                    debug!(handle = %req.handle, "packet size ignored without a callback");
                }
                let sets = collect_results(items).await?;
                debug!(handle = %req.handle, result_sets = sets.len(), "query buffered");
                Ok(sets)
            }
        }
    }
}
