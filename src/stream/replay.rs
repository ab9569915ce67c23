//! Append-only event log that any number of readers can replay.

use std::sync::{Arc, Mutex};

use futures::stream::BoxStream;
use tokio::sync::watch;

struct State<T> {
    items: Vec<T>,
    closed: bool,
}

/// Shared log of stream events. Every reader starts from the first event
/// and ends once the log is closed and fully read.
pub struct ReplayLog<T> {
    state: Arc<Mutex<State<T>>>,
    version: Arc<watch::Sender<u64>>,
}

impl<T> Clone for ReplayLog<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            version: self.version.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for ReplayLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> ReplayLog<T> {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(State {
                items: Vec::new(),
                closed: false,
            })),
            version: Arc::new(version),
        }
    }

    /// Append an event. Ignored once the log is closed.
    pub fn push(&self, item: T) {
        if let Ok(mut state) = self.state.lock() {
            if state.closed {
                return;
            }
            state.items.push(item);
        }
        self.version.send_modify(|v| *v += 1);
    }

    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.version.send_modify(|v| *v += 1);
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().map_or(true, |state| state.closed)
    }

    /// Events recorded so far.
    pub fn snapshot(&self) -> Vec<T> {
        self.state
            .lock()
            .map(|state| state.items.clone())
            .unwrap_or_default()
    }

    fn read(&self, index: usize) -> (Option<T>, bool) {
        match self.state.lock() {
            Ok(state) => (state.items.get(index).cloned(), state.closed),
            Err(_) => (None, true),
        }
    }

    /// A reader that replays from the first event.
    pub fn subscribe(&self) -> BoxStream<'static, T> {
        let log = self.clone();
        let mut changes = self.version.subscribe();
        Box::pin(async_stream::stream! {
            let mut index = 0;
            loop {
                changes.borrow_and_update();
                let (item, closed) = log.read(index);
                match item {
                    Some(item) => {
                        index += 1;
                        yield item;
                        continue;
                    }
                    None if closed => break,
                    None => {}
                }
                if changes.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}
