//! Consumer callbacks
//!
//! A callback receives one chunk and returns a future; the streaming engine
//! awaits that future before producing the next chunk.

use crate::db::Chunk;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Async consumer of streamed chunks
pub type Callback = Arc<dyn Fn(Chunk) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as a `Callback`
pub fn callback_fn<F, Fut>(f: F) -> Callback
where
    F: Fn(Chunk) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |chunk| f(chunk).boxed())
}

/// A delivered chunk waiting for the consumer's acknowledgement
#[derive(Debug)]
pub struct PendingChunk {
    pub chunk: Chunk,
    ack: oneshot::Sender<Result<(), String>>,
}

impl PendingChunk {
    /// Signal that the chunk was consumed; the producer may continue.
    pub fn ack(self) {
        let _ = self.ack.send(Ok(()));
    }

    /// Reject the chunk; the stream aborts with a callback error.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.ack.send(Err(reason.into()));
    }
}

/// Request/acknowledge pair for consumers that prefer pulling chunks.
///
/// Every chunk arrives as a `PendingChunk` and the producer stays blocked
/// until it is acknowledged. Dropping a pending chunk, or the receiver,
/// fails the stream.
pub fn chunk_channel() -> (Callback, mpsc::Receiver<PendingChunk>) {
    let (tx, rx) = mpsc::channel::<PendingChunk>(1);

    let callback = callback_fn(move |chunk| {
        let tx = tx.clone();
        async move {
            let (ack, done) = oneshot::channel();
            tx.send(PendingChunk { chunk, ack })
                .await
                .map_err(|_| anyhow!("chunk receiver was dropped"))?;
            match done.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => Err(anyhow!(reason)),
                Err(_) => Err(anyhow!("chunk dropped without acknowledgement")),
            }
        }
    });

    (callback, rx)
}
