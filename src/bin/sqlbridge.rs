//! Stdio endpoint for the connector
//!
//! Reads one JSON request per line from stdin and writes JSON lines to
//! stdout: `{"ok": ...}` or `{"error": {"kind", "message"}}`. A query line
//! carrying `"stream": true` first emits one `{"chunk": ...}` line per chunk;
//! each chunk is flushed before the next one is produced. An `"id"` field,
//! when present, is echoed on every line that answers the request.

use anyhow::Result;
use serde_json::{json, Map, Value};
use sql_bridge::{callback_fn, Callback, Connector, ConnectorConfig};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;
use tracing::{info, warn};

type Output = Arc<Mutex<Stdout>>;

#[tokio::main]
async fn main() -> Result<()> {
    sql_bridge::init_tracing();

    let connector = Connector::new(ConnectorConfig::load());
    let out: Output = Arc::new(Mutex::new(tokio::io::stdout()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!("sqlbridge ready");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_line(&connector, &out, &line).await;
        write_line(&out, &reply).await?;
    }

    let open = connector.registry().len();
    if open > 0 {
        warn!(open, "stdin closed with connections still open");
    }
    Ok(())
}

async fn handle_line(connector: &Connector, out: &Output, line: &str) -> Value {
    let mut request: Map<String, Value> = match serde_json::from_str(line) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return error_reply(&Value::Null, "ValidationError", "request must be a JSON object"),
        Err(e) => return error_reply(&Value::Null, "ValidationError", &format!("invalid JSON: {}", e)),
    };

    let id = request.remove("id").unwrap_or(Value::Null);
    let stream = request
        .remove("stream")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let callback = stream.then(|| chunk_writer(out, &id));

    match connector.invoke(Value::Object(request), callback).await {
        Ok(response) => envelope(&id, "ok", json!(response)),
        Err(e) => error_reply(&id, e.kind(), &e.to_string()),
    }
}

/// Callback that writes each chunk as its own line
fn chunk_writer(out: &Output, id: &Value) -> Callback {
    let out = Arc::clone(out);
    let id = id.clone();
    callback_fn(move |chunk| {
        let out = Arc::clone(&out);
        let line = envelope(&id, "chunk", json!(chunk));
        async move { write_line(&out, &line).await }
    })
}

fn envelope(id: &Value, key: &str, value: Value) -> Value {
    let mut map = Map::new();
    if !id.is_null() {
        map.insert("id".to_string(), id.clone());
    }
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn error_reply(id: &Value, kind: &str, message: &str) -> Value {
    envelope(id, "error", json!({ "kind": kind, "message": message }))
}

async fn write_line(out: &Output, value: &Value) -> Result<()> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');

    let mut out = out.lock().await;
    out.write_all(line.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}
