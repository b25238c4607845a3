//! SQL bridge - Library
//! Async SQL connector: handle registry, command dispatch, and backpressured
//! result streaming over SQL Server and SQLite

pub mod config;
pub mod connector;
pub mod db;
pub mod error;
pub mod request;
pub mod results;
pub mod script;

pub use config::{ConnectorConfig, RowcountMode};
pub use connector::{Connector, Response};
pub use error::{ConnectorError, ConnectorResult};
pub use request::{RawRequest, Request};
pub use results::{callback_fn, chunk_channel, Callback, PendingChunk};

use tracing_subscriber::EnvFilter;

/// Default log filter when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "sql_bridge=info";

/// Install a stderr `tracing` subscriber filtered by `RUST_LOG`
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    // Stdout may carry protocol output; logs go to stderr
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
