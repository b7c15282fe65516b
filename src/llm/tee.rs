//! Response tee: fan-out of a single-pass stream
//!
//! One background task drains the source stream into an append-only
//! buffer; any number of readers replay the buffer at their own pace.
//! The source is polled exactly once regardless of reader count, and
//! every reader observes the identical sequence in production order.

use std::sync::{Arc, Mutex};

use futures::{Stream, StreamExt};
use tokio::sync::watch;

use crate::Result;

struct TeeState<T> {
    items: Vec<T>,
    finished: bool,
    error: Option<String>,
}

struct Shared<T> {
    state: Mutex<TeeState<T>>,
    // Bumped on every append and on completion; readers wait on it
    version: watch::Sender<u64>,
}

/// Buffer-and-replay fan-out for a single-pass fragment stream
pub struct ResponseTee<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + 'static> ResponseTee<T> {
    /// Spawn the producer task draining `source` into the buffer
    pub fn spawn<S>(source: S) -> Self
    where
        S: Stream<Item = Result<T>> + Send + 'static,
    {
        let (version, _) = watch::channel(0u64);
        let shared = Arc::new(Shared {
            state: Mutex::new(TeeState {
                items: Vec::new(),
                finished: false,
                error: None,
            }),
            version,
        });

        let producer = Arc::clone(&shared);
        tokio::spawn(async move {
            let mut source = std::pin::pin!(source);

            while let Some(item) = source.next().await {
                let mut state = match producer.state.lock() {
                    Ok(state) => state,
                    Err(_) => return,
                };
                match item {
                    Ok(value) => state.items.push(value),
                    Err(e) => {
                        tracing::warn!(error = %e, "response stream failed");
                        state.error = Some(e.to_string());
                        state.finished = true;
                        drop(state);
                        producer.version.send_modify(|v| *v += 1);
                        return;
                    }
                }
                drop(state);
                producer.version.send_modify(|v| *v += 1);
            }

            if let Ok(mut state) = producer.state.lock() {
                state.finished = true;
            }
            producer.version.send_modify(|v| *v += 1);
        });

        Self { shared }
    }

    /// Create a fresh reader that replays the buffer from the start
    #[must_use]
    pub fn subscribe(&self) -> TeeReader<T> {
        TeeReader {
            shared: Arc::clone(&self.shared),
            version: self.shared.version.subscribe(),
            index: 0,
        }
    }

    /// Error marker recorded when the source stream failed, if any
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.shared
            .state
            .lock()
            .ok()
            .and_then(|state| state.error.clone())
    }

}

/// Independent lazy reader over the tee's buffer
pub struct TeeReader<T> {
    shared: Arc<Shared<T>>,
    version: watch::Receiver<u64>,
    index: usize,
}

impl<T: Clone> TeeReader<T> {
    /// Next fragment in production order, or `None` once the producer
    /// has finished and the buffer is drained
    pub async fn next(&mut self) -> Option<T> {
        loop {
            {
                let state = self.shared.state.lock().ok()?;
                if self.index < state.items.len() {
                    let item = state.items[self.index].clone();
                    self.index += 1;
                    return Some(item);
                }
                if state.finished {
                    return None;
                }
            }

            // Producer dropped without finishing: treat as terminated
            if self.version.changed().await.is_err() {
                let state = self.shared.state.lock().ok()?;
                if self.index < state.items.len() {
                    let item = state.items[self.index].clone();
                    self.index += 1;
                    return Some(item);
                }
                return None;
            }
        }
    }
}
