//! One output stream fed by sub-streams that are appended over time.

use std::sync::{Arc, Mutex};

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::WeaveError;

type Source<T> = BoxStream<'static, T>;

/// Producer side of a stitched stream.
///
/// Sources are drained strictly in the order they were added; the next one
/// starts only after the current one ends.
pub struct StitchHandle<T> {
    inner: Arc<Shared<T>>,
}

struct Shared<T> {
    sources: Mutex<Option<mpsc::UnboundedSender<Source<T>>>>,
    cancel: CancellationToken,
}

impl<T> Clone for StitchHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Create a stitched stream. Must be called inside a tokio runtime: the
/// drain task is spawned immediately.
pub fn stitchable_stream<T: Send + 'static>() -> (StitchHandle<T>, BoxStream<'static, T>) {
    let (source_tx, mut source_rx) = mpsc::unbounded_channel::<Source<T>>();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<T>();
    let cancel = CancellationToken::new();

    let drain_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            let source = tokio::select! {
                biased;
                _ = drain_cancel.cancelled() => break,
                source = source_rx.recv() => source,
            };
            let Some(mut source) = source else {
                break;
            };

            loop {
                let item = tokio::select! {
                    biased;
                    _ = drain_cancel.cancelled() => None,
                    item = source.next() => item,
                };
                let Some(item) = item else {
                    break;
                };
                if out_tx.send(item).is_err() {
                    debug!("stitched stream consumer dropped");
                    return;
                }
            }

            if drain_cancel.is_cancelled() {
                break;
            }
        }
    });

    let handle = StitchHandle {
        inner: Arc::new(Shared {
            sources: Mutex::new(Some(source_tx)),
            cancel,
        }),
    };
    (handle, Box::pin(UnboundedReceiverStream::new(out_rx)))
}

impl<T: Send + 'static> StitchHandle<T> {
    /// Append a source. Fails once the stream is closed or terminated.
    pub fn add_stream(&self, stream: BoxStream<'static, T>) -> Result<(), WeaveError> {
        let closed = || WeaveError::InvalidState("Cannot add inner stream: outer stream is closed".into());

        let Ok(guard) = self.inner.sources.lock() else {
            return Err(closed());
        };
        match guard.as_ref() {
            Some(sender) if !self.inner.cancel.is_cancelled() => {
                sender.send(stream).map_err(|_| closed())
            }
            _ => Err(closed()),
        }
    }

    /// Stop accepting sources; those already added drain before the output
    /// ends.
    pub fn close(&self) {
        if let Ok(mut guard) = self.inner.sources.lock() {
            guard.take();
        }
    }

    /// Drop all pending sources and end the output immediately.
    pub fn terminate(&self) {
        self.inner.cancel.cancel();
        self.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
            || self
                .inner
                .sources
                .lock()
                .map_or(true, |guard| guard.is_none())
    }
}
