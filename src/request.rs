//! Request model and validation
//!
//! Callers hand in a loosely-typed JSON configuration; it is checked once
//! here and turned into a typed `Request` before anything touches a driver.

use crate::db::{ConnectionHandle, DatabaseBackend};
use crate::error::{ConnectorError, ConnectorResult};
use crate::results::Callback;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::time::Duration;

/// Command tag of a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Open,
    Close,
    NonQuery,
    Query,
}

impl std::str::FromStr for Command {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Command::Open),
            "close" => Ok(Command::Close),
            "nonquery" => Ok(Command::NonQuery),
            "query" => Ok(Command::Query),
            other => Err(ConnectorError::validation(format!(
                "unknown command '{}' (expected open, close, nonquery or query)",
                other
            ))),
        }
    }
}

/// Request fields as they arrive from the caller, all optional
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRequest {
    #[serde(alias = "cmd")]
    pub command: Option<String>,
    pub driver: Option<String>,
    pub connection_string: Option<String>,
    #[serde(alias = "handler")]
    pub handle: Option<u64>,
    pub source: Option<String>,
    pub packet_size: Option<i64>,
    #[serde(alias = "timeout")]
    pub timeout_seconds: Option<u64>,
    /// Configured environment supplying `driver` and `connectionString`
    #[serde(alias = "env")]
    pub environment: Option<String>,
}

impl RawRequest {
    pub fn from_json(value: serde_json::Value) -> ConnectorResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| ConnectorError::validation(format!("malformed request: {}", e)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenRequest {
    pub connection_string: String,
    pub driver: DatabaseBackend,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseRequest {
    pub handle: ConnectionHandle,
    pub driver: DatabaseBackend,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NonQueryRequest {
    pub handle: ConnectionHandle,
    pub driver: DatabaseBackend,
    pub source: String,
}

#[derive(Clone)]
pub struct QueryRequest {
    pub handle: ConnectionHandle,
    pub driver: DatabaseBackend,
    pub source: String,
    /// Stream chunks here instead of buffering the whole answer
    pub callback: Option<Callback>,
    /// Maximum rows per streamed row chunk; ignored without a callback
    pub packet_size: Option<NonZeroUsize>,
}

impl std::fmt::Debug for QueryRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRequest")
            .field("handle", &self.handle)
            .field("driver", &self.driver)
            .field("source", &self.source)
            .field("callback", &self.callback.is_some())
            .field("packet_size", &self.packet_size)
            .finish()
    }
}

/// A validated request
#[derive(Clone, Debug)]
pub enum Request {
    Open(OpenRequest),
    Close(CloseRequest),
    NonQuery(NonQueryRequest),
    Query(QueryRequest),
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::Open(_) => Command::Open,
            Request::Close(_) => Command::Close,
            Request::NonQuery(_) => Command::NonQuery,
            Request::Query(_) => Command::Query,
        }
    }

    /// Parse a JSON configuration value
    pub fn from_json(value: serde_json::Value, callback: Option<Callback>) -> ConnectorResult<Self> {
        Self::from_raw(RawRequest::from_json(value)?, callback)
    }

    /// Validate the fields required by the command
    pub fn from_raw(raw: RawRequest, callback: Option<Callback>) -> ConnectorResult<Self> {
        let command: Command = required(raw.command, "command")?.parse()?;
        let driver: DatabaseBackend = required(raw.driver, "driver")?
            .parse()
            .map_err(ConnectorError::Validation)?;

        if callback.is_some() && command != Command::Query {
            return Err(ConnectorError::validation("callback is only accepted by query"));
        }

        let request = match command {
            Command::Open => {
                let timeout = match raw.timeout_seconds {
                    Some(0) => {
                        return Err(ConnectorError::validation("timeoutSeconds must be positive"))
                    }
                    other => other.map(Duration::from_secs),
                };
                Request::Open(OpenRequest {
                    connection_string: required(raw.connection_string, "connectionString")?,
                    driver,
                    timeout,
                })
            }
            Command::Close => Request::Close(CloseRequest {
                handle: handle(raw.handle)?,
                driver,
            }),
            Command::NonQuery => Request::NonQuery(NonQueryRequest {
                handle: handle(raw.handle)?,
                driver,
                source: required(raw.source, "source")?,
            }),
            Command::Query => {
                let packet_size = match raw.packet_size {
                    None => None,
                    Some(n) => Some(
                        usize::try_from(n)
                            .ok()
                            .and_then(NonZeroUsize::new)
                            .ok_or_else(|| {
                                ConnectorError::validation("packetSize must be a positive integer")
                            })?,
                    ),
                };
                Request::Query(QueryRequest {
                    handle: handle(raw.handle)?,
                    driver,
                    source: required(raw.source, "source")?,
                    callback,
                    packet_size,
                })
            }
        };
        Ok(request)
    }
}

impl TryFrom<RawRequest> for Request {
    type Error = ConnectorError;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        Request::from_raw(raw, None)
    }
}

fn required(value: Option<String>, field: &str) -> ConnectorResult<String> {
    value.ok_or_else(|| ConnectorError::validation(format!("missing required field '{}'", field)))
}

fn handle(value: Option<u64>) -> ConnectorResult<ConnectionHandle> {
    value
        .map(ConnectionHandle)
        .ok_or_else(|| ConnectorError::validation("missing required field 'handle'"))
}
