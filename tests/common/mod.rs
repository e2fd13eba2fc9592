//! Shared test driver.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use mongo_lifecycle::{ConnectOptions, Driver, EventSink};
use parking_lot::Mutex;
use tokio::sync::watch;

/// Error produced by [`MockDriver`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mock driver error: {0}")]
pub struct MockError(pub String);

/// Client handed out by [`MockDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockClient {
    pub id: usize,
    pub uri: String,
}

#[derive(Debug)]
struct MockState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    gate: watch::Sender<bool>,
    fail_next: Mutex<Option<MockError>>,
    sinks: Mutex<Vec<EventSink>>,
    last_force: Mutex<Option<bool>>,
}

/// Driver whose connect calls can be held open, failed, and counted.
#[derive(Debug, Clone)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Arc::new(MockState {
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                gate,
                fail_next: Mutex::new(None),
                sinks: Mutex::new(Vec::new()),
                last_force: Mutex::new(None),
            }),
        }
    }

    /// Make connect calls wait until [`release`](Self::release).
    pub fn hold(&self) {
        self.state.gate.send_replace(false);
    }

    /// Let held and future connect calls proceed.
    pub fn release(&self) {
        self.state.gate.send_replace(true);
    }

    /// Fail the next connect call with `message`.
    pub fn fail_next(&self, message: &str) {
        *self.state.fail_next.lock() = Some(MockError(message.to_string()));
    }

    pub fn connect_calls(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn last_force(&self) -> Option<bool> {
        *self.state.last_force.lock()
    }

    /// Sink handed to the most recent connect call.
    pub fn last_sink(&self) -> Option<EventSink> {
        self.state.sinks.lock().last().cloned()
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Client = MockClient;
    type Error = MockError;

    async fn connect(
        &self,
        uri: &str,
        _options: &ConnectOptions,
        events: EventSink,
    ) -> Result<MockClient, MockError> {
        let id = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.sinks.lock().push(events);

        let mut gate = self.state.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| MockError("gate dropped".to_string()))?;

        if let Some(err) = self.state.fail_next.lock().take() {
            return Err(err);
        }

        Ok(MockClient {
            id,
            uri: uri.to_string(),
        })
    }

    async fn close(&self, _client: MockClient, force: bool) -> Result<(), MockError> {
        // Stay in the disconnecting state across at least one poll.
        tokio::task::yield_now().await;
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        *self.state.last_force.lock() = Some(force);
        Ok(())
    }
}

/// Yield until `condition` holds, giving spawned tasks a chance to run.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    condition()
}
