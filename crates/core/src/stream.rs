//! Lazy, pull-based chunk sequences for streaming provider responses.
//!
//! A [`ChunkStream`] is forward-only and cannot be restarted. The producer
//! holds a [`ChunkSender`] whose `send` waits until the consumer has pulled the
//! previous chunk (at most one chunk is buffered) or the stream was cancelled.
//! Dropping the stream cancels it.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::traits::{ProviderResponse, ProviderResult};

/// One element of a streamed response.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// Partial content.
    Delta(String),
    /// Final chunk with the assembled response. Nothing follows it.
    Done(ProviderResponse),
}

/// The consumer has gone away or cancelled the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("chunk stream closed")]
pub struct StreamClosed;

/// Producer half of a chunk stream.
#[derive(Debug, Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<ProviderResult<Chunk>>,
    cancel: CancellationToken,
}

impl ChunkSender {
    /// Send one item, waiting for the consumer to make room.
    pub async fn send(&self, item: ProviderResult<Chunk>) -> Result<(), StreamClosed> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StreamClosed),
            sent = self.tx.send(item) => sent.map_err(|_| StreamClosed),
        }
    }

    /// Send a partial-content chunk.
    pub async fn delta(&self, text: impl Into<String>) -> Result<(), StreamClosed> {
        self.send(Ok(Chunk::Delta(text.into()))).await
    }

    /// Send the final chunk.
    pub async fn finish(&self, response: ProviderResponse) -> Result<(), StreamClosed> {
        self.send(Ok(Chunk::Done(response))).await
    }

    /// Terminate the stream with an error.
    pub async fn fail(&self, error: ProviderError) -> Result<(), StreamClosed> {
        self.send(Err(error)).await
    }

    /// Whether the consumer cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Consumer half of a chunk stream.
#[derive(Debug)]
pub struct ChunkStream {
    rx: mpsc::Receiver<ProviderResult<Chunk>>,
    cancel: CancellationToken,
    finished: bool,
}

/// Create a connected sender/stream pair.
pub fn chunk_channel() -> (ChunkSender, ChunkStream) {
    let (tx, rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    (
        ChunkSender {
            tx,
            cancel: cancel.clone(),
        },
        ChunkStream {
            rx,
            cancel,
            finished: false,
        },
    )
}

impl ChunkStream {
    /// A stream that yields a single final chunk.
    pub fn from_response(response: ProviderResponse) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity is one and the channel is fresh, so this cannot fail.
        let _ = tx.try_send(Ok(Chunk::Done(response)));
        Self {
            rx,
            cancel: CancellationToken::new(),
            finished: false,
        }
    }

    /// Stop the producer. Subsequent pulls yield nothing.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        self.finished = true;
    }

    /// Whether the sequence has terminated.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drain the stream, concatenating deltas into the final message when the
    /// final chunk carries no content of its own.
    pub async fn collect_response(mut self) -> ProviderResult<ProviderResponse> {
        let mut text = String::new();
        while let Some(item) = self.next().await {
            match item? {
                Chunk::Delta(delta) => text.push_str(&delta),
                Chunk::Done(mut response) => {
                    if response.message.content.is_empty() {
                        response.message.content = text;
                    }
                    return Ok(response);
                }
            }
        }
        Err(ProviderError::internal("stream ended without a final chunk"))
    }
}

impl Stream for ChunkStream {
    type Item = ProviderResult<Chunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                if matches!(item, Ok(Chunk::Done(_)) | Err(_)) {
                    self.finished = true;
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_collect_concatenates_deltas() {
        let (tx, stream) = chunk_channel();
        tokio::spawn(async move {
            tx.delta("Hello, ").await.unwrap();
            tx.delta("world").await.unwrap();
            tx.finish(ProviderResponse::text("")).await.unwrap();
        });

        let response = stream.collect_response().await.unwrap();
        assert_eq!(response.message.content, "Hello, world");
    }

    #[tokio::test]
    async fn test_error_terminates_stream() {
        let (tx, mut stream) = chunk_channel();
        tokio::spawn(async move {
            tx.delta("partial").await.unwrap();
            tx.fail(ProviderError::network("reset")).await.unwrap();
        });

        assert!(matches!(stream.next().await, Some(Ok(Chunk::Delta(_)))));
        assert!(matches!(stream.next().await, Some(Err(_))));
        assert!(stream.next().await.is_none());
        assert!(stream.is_finished());
    }

    #[tokio::test]
    async fn test_producer_waits_for_consumer() {
        let (tx, mut stream) = chunk_channel();
        tx.delta("one").await.unwrap();

        // Buffer is full until the consumer pulls.
        let blocked = tokio::time::timeout(Duration::from_millis(20), tx.delta("two")).await;
        assert!(blocked.is_err());

        assert_eq!(stream.next().await, Some(Ok(Chunk::Delta("one".into()))));
        tx.delta("two").await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_releases_producer() {
        let (tx, mut stream) = chunk_channel();
        tx.delta("one").await.unwrap();
        stream.cancel();

        assert_eq!(tx.delta("two").await, Err(StreamClosed));
        assert!(tx.is_cancelled());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_cancels_producer() {
        let (tx, stream) = chunk_channel();
        drop(stream);
        assert!(tx.is_cancelled());
        assert_eq!(tx.delta("late").await, Err(StreamClosed));
    }
}
