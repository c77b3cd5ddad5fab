//! Stream utilities for reactive data.
//!
//! Provides utilities for converting the engine's broadcast, watch and
//! mpsc channels into async streams for ergonomic event handling.

use std::pin::Pin;

use futures::Stream;
use tokio::sync::{broadcast, mpsc, watch};

/// Boxed, sendable stream.
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Convert a broadcast receiver into an async Stream.
///
/// This handles the `Lagged` error by continuing to receive
/// subsequent messages (older messages are lost).
pub fn broadcast_to_stream<T: Clone + Send + 'static>(
    mut rx: broadcast::Receiver<T>,
) -> BoxStream<T> {
    Box::pin(async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(item) => yield item,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Convert a watch receiver into a stream of snapshots.
///
/// Yields the current value first, then every value published after it.
/// Intermediate values may be skipped if the consumer is slow.
pub fn watch_to_stream<T: Clone + Send + Sync + 'static>(
    mut rx: watch::Receiver<T>,
) -> BoxStream<T> {
    Box::pin(async_stream::stream! {
        let current = rx.borrow_and_update().clone();
        yield current;
        while rx.changed().await.is_ok() {
            let next = rx.borrow_and_update().clone();
            yield next;
        }
    })
}

/// Convert an mpsc receiver into a stream that ends when all senders drop.
pub fn mpsc_to_stream<T: Send + 'static>(mut rx: mpsc::Receiver<T>) -> BoxStream<T> {
    Box::pin(async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    })
}
