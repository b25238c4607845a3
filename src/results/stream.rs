//! Streaming result engine
//!
//! Turns a driver's lazy item stream into ordered chunks. Strictly
//! sequential: the callback is never invoked again before the previous
//! invocation's future has resolved, so a slow consumer throttles the cursor
//! and at most one window of rows is held in memory.

use crate::db::{Chunk, QueryItem, Row, RowStream};
use crate::error::{ConnectorError, ConnectorResult};
use crate::results::Callback;
use futures::StreamExt;
use std::num::NonZeroUsize;
use tracing::debug;

/// Counters for one streamed query
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub result_sets: usize,
    pub rows: usize,
    pub chunks: usize,
}

struct Emitter<'c> {
    callback: &'c Callback,
    summary: StreamSummary,
}

impl Emitter<'_> {
    async fn emit(&mut self, chunk: Chunk) -> ConnectorResult<()> {
        (self.callback)(chunk).await.map_err(ConnectorError::callback)?;
        self.summary.chunks += 1;
        Ok(())
    }

    async fn flush(&mut self, window: &mut Vec<Row>) -> ConnectorResult<()> {
        if window.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(window);
        self.emit(Chunk::rows(rows)).await
    }
}

/// Deliver every result set of `items` to `callback`.
///
/// Each set produces one meta chunk followed by row chunks of at most
/// `packet_size` rows (the whole set when `None`); one resolve chunk ends the
/// stream. On any failure the row stream is dropped before the error is
/// returned and no resolve chunk is sent.
pub async fn stream_results(
    mut items: RowStream<'_>,
    callback: &Callback,
    packet_size: Option<NonZeroUsize>,
) -> ConnectorResult<StreamSummary> {
    let mut emitter = Emitter {
        callback,
        summary: StreamSummary::default(),
    };

    let pumped = pump(&mut items, &mut emitter, packet_size).await;
    drop(items);
    if let Err(e) = pumped {
        debug!(chunks = emitter.summary.chunks, error = %e, "stream aborted");
        return Err(e);
    }

    emitter.emit(Chunk::resolve()).await?;
    debug!(
        result_sets = emitter.summary.result_sets,
        rows = emitter.summary.rows,
        chunks = emitter.summary.chunks,
        "stream resolved"
    );
    Ok(emitter.summary)
}

async fn pump(
    items: &mut RowStream<'_>,
    emitter: &mut Emitter<'_>,
    packet_size: Option<NonZeroUsize>,
) -> ConnectorResult<()> {
    let limit = packet_size.map(NonZeroUsize::get);
    let mut window: Vec<Row> = Vec::new();
    let mut in_set = false;

    while let Some(item) = items.next().await {
        match item.map_err(ConnectorError::query)? {
            QueryItem::Columns(columns) => {
                emitter.flush(&mut window).await?;
                emitter.emit(Chunk::meta(columns)).await?;
                emitter.summary.result_sets += 1;
                in_set = true;
            }
            QueryItem::Row(row) => {
                if !in_set {
                    return Err(ConnectorError::query("row received before column metadata"));
                }
                window.push(row);
                emitter.summary.rows += 1;
                if limit.is_some_and(|n| window.len() >= n) {
                    emitter.flush(&mut window).await?;
                }
            }
        }
    }

    emitter.flush(&mut window).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CellValue;
    use crate::results::callback_fn;
    use anyhow::{anyhow, Result};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn result_set(columns: &[&str], ids: impl Iterator<Item = i64>) -> Vec<Result<QueryItem>> {
        let mut items = vec![Ok(QueryItem::Columns(
            columns.iter().map(|c| c.to_string()).collect(),
        ))];
        items.extend(ids.map(|i| Ok(QueryItem::Row(vec![CellValue::Int(i)]))));
        items
    }

    fn to_stream(items: Vec<Result<QueryItem>>) -> RowStream<'static> {
        futures::stream::iter(items).boxed()
    }

    fn recorder() -> (Callback, Arc<Mutex<Vec<Chunk>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = callback_fn(move |chunk| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(chunk);
                Ok(())
            }
        });
        (callback, seen)
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter()
            .map(|r| match r[0] {
                CellValue::Int(v) => v,
                _ => panic!("unexpected cell"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_packets_of_five_over_forty_rows() {
        let (callback, seen) = recorder();
        let items = result_set(&["id"], (0..40).map(|i| i * 3));

        let summary = stream_results(to_stream(items), &callback, NonZeroUsize::new(5))
            .await
            .unwrap();
        assert_eq!(summary, StreamSummary { result_sets: 1, rows: 40, chunks: 10 });

        let chunks = seen.lock().unwrap();
        assert_eq!(chunks.len(), 10);
        assert_eq!(chunks[0], Chunk::meta(vec!["id".into()]));
        let mut all = Vec::new();
        for chunk in &chunks[1..9] {
            let rows = chunk.rows.as_ref().unwrap();
            assert_eq!(rows.len(), 5);
            assert!(chunk.meta.is_none() && chunk.resolve.is_none());
            all.extend(ids(rows));
        }
        assert_eq!(all, (0..40).map(|i| i * 3).collect::<Vec<_>>());
        assert_eq!(chunks[9], Chunk::resolve());
    }

    #[tokio::test]
    async fn test_two_sets_keep_statement_order() {
        let (callback, seen) = recorder();
        let mut items = result_set(&["a"], 0..40);
        items.extend(result_set(&["b"], 0..20));

        stream_results(to_stream(items), &callback, NonZeroUsize::new(5))
            .await
            .unwrap();

        let chunks = seen.lock().unwrap();
        assert_eq!(chunks.len(), 15);
        assert_eq!(chunks[0].meta.as_deref(), Some(&["a".to_string()][..]));
        assert_eq!(chunks[9].meta.as_deref(), Some(&["b".to_string()][..]));
        for (i, chunk) in chunks.iter().enumerate() {
            let is_rows = !matches!(i, 0 | 9 | 14);
            assert_eq!(chunk.rows.is_some(), is_rows, "chunk {}", i);
        }
        assert!(chunks[14].is_resolve() && chunks[14].rows.is_none() && chunks[14].meta.is_none());
    }

    #[tokio::test]
    async fn test_last_window_holds_remainder_and_empty_set_has_no_rows() {
        let (callback, seen) = recorder();
        let mut items = result_set(&["a"], 0..40);
        items.extend(result_set(&["empty"], 0..0));

        stream_results(to_stream(items), &callback, NonZeroUsize::new(6))
            .await
            .unwrap();

        let chunks = seen.lock().unwrap();
        let sizes: Vec<usize> = chunks.iter().filter_map(|c| c.rows.as_ref().map(Vec::len)).collect();
        assert_eq!(sizes, vec![6, 6, 6, 6, 6, 6, 4]);
        // meta(a), 7 windows, meta(empty), resolve
        assert_eq!(chunks.len(), 10);
        assert!(chunks[8].meta.is_some());
        assert!(chunks[9].is_resolve());
    }

    #[tokio::test]
    async fn test_no_packet_size_sends_whole_set() {
        let (callback, seen) = recorder();
        let items = result_set(&["id"], 0..6);

        stream_results(to_stream(items), &callback, None).await.unwrap();

        let chunks = seen.lock().unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].rows.as_ref().map(Vec::len), Some(6));
    }

    #[tokio::test]
    async fn test_never_two_chunks_in_flight() {
        let in_flight = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let (flag, counter) = (Arc::clone(&in_flight), Arc::clone(&calls));
        let callback = callback_fn(move |_chunk| {
            let (flag, counter) = (Arc::clone(&flag), Arc::clone(&counter));
            async move {
                assert!(!flag.swap(true, Ordering::SeqCst), "second chunk before completion");
                tokio::time::sleep(Duration::from_millis(2)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                flag.store(false, Ordering::SeqCst);
                Ok(())
            }
        });

        let mut items = result_set(&["a"], 0..12);
        items.extend(result_set(&["b"], 0..3));
        stream_results(to_stream(items), &callback, NonZeroUsize::new(4))
            .await
            .unwrap();

        // meta, 3 windows, meta, 1 window, resolve
        assert_eq!(calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_callback_failure_stops_stream_without_resolve() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = callback_fn(move |chunk: Chunk| {
            let sink = Arc::clone(&sink);
            async move {
                let mut sink = sink.lock().unwrap();
                sink.push(chunk);
                if sink.len() == 3 {
                    return Err(anyhow!("consumer gone"));
                }
                Ok(())
            }
        });

        let err = stream_results(to_stream(result_set(&["a"], 0..40)), &callback, NonZeroUsize::new(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Callback(_)));
        let chunks = seen.lock().unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(!chunks.iter().any(Chunk::is_resolve));
    }

    #[tokio::test]
    async fn test_driver_failure_mid_stream_is_query_error() {
        let (callback, seen) = recorder();
        let mut items = result_set(&["a"], 0..7);
        items.push(Err(anyhow!("network reset")));
        items.extend(result_set(&["b"], 0..2));

        let err = stream_results(to_stream(items), &callback, NonZeroUsize::new(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Query(_)));

        // meta and the first full window only; the partial window is discarded
        let chunks = seen.lock().unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(!chunks.iter().any(Chunk::is_resolve));
    }

    #[tokio::test]
    async fn test_no_result_sets_still_resolves() {
        let (callback, seen) = recorder();
        stream_results(to_stream(vec![]), &callback, None).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Chunk::resolve()]);
    }

    #[tokio::test]
    async fn test_huge_packet_size_streams_small_set() {
        let (callback, seen) = recorder();
        let items = result_set(&["id"], 0..3);

        let summary = stream_results(to_stream(items), &callback, NonZeroUsize::new(usize::MAX))
            .await
            .unwrap();
        assert_eq!(summary, StreamSummary { result_sets: 1, rows: 3, chunks: 3 });

        let chunks = seen.lock().unwrap();
        assert_eq!(chunks[0], Chunk::meta(vec!["id".into()]));
        assert_eq!(ids(chunks[1].rows.as_ref().unwrap()), vec![0, 1, 2]);
        assert_eq!(chunks[2], Chunk::resolve());
    }
}
