//! Script files: split on a delimiter line and run each segment as a non-query

use crate::connector::Connector;
use crate::db::{ConnectionHandle, DatabaseBackend, NonQueryResult};
use crate::error::{ConnectorError, ConnectorResult};
use crate::request::NonQueryRequest;
use std::path::Path;
use tracing::debug;

/// Split `text` on lines whose trimmed content equals `delimiter`
/// (case-insensitive). Blank segments are dropped.
pub fn split_script(text: &str, delimiter: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.trim().eq_ignore_ascii_case(delimiter) {
            push_segment(&mut segments, &mut current);
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    push_segment(&mut segments, &mut current);
    segments
}

fn push_segment(segments: &mut Vec<String>, current: &mut String) {
    if !current.trim().is_empty() {
        segments.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

impl Connector {
    /// Run every segment of `script` in order, stopping at the first failure
    pub async fn run_script(
        &self,
        handle: ConnectionHandle,
        driver: DatabaseBackend,
        script: &str,
    ) -> ConnectorResult<Vec<NonQueryResult>> {
        let segments = split_script(script, &self.config().script_delimiter);
        let mut results = Vec::with_capacity(segments.len());

        for (index, source) in segments.into_iter().enumerate() {
            debug!(%handle, segment = index, "running script segment");
            let result = self
                .non_query(NonQueryRequest {
                    handle,
                    driver,
                    source,
                })
                .await?;
            results.push(result);
        }
        Ok(results)
    }

    /// Read a script file and run it with `run_script`
    pub async fn run_script_file(
        &self,
        handle: ConnectionHandle,
        driver: DatabaseBackend,
        path: impl AsRef<Path>,
    ) -> ConnectorResult<Vec<NonQueryResult>> {
        let path = path.as_ref();
        let script = tokio::fs::read_to_string(path).await.map_err(|e| {
            ConnectorError::validation(format!("cannot read script '{}': {}", path.display(), e))
        })?;
        self.run_script(handle, driver, &script).await
    }
}
