//! Connection handle with readiness state and lifecycle events.

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::driver::{Driver, MongoDriver};
use crate::event::{ConnectionEvent, EventKind, EventSink, Lifecycle, ReadyState};
use crate::options::ConnectOptions;

type Attempt<E> = Shared<BoxFuture<'static, Result<(), E>>>;

/// Future returned by [`Connection::open_uri`] and [`Connection::as_promise`].
pub type OpenFuture<D> = BoxFuture<'static, Result<Connection<D>, <D as Driver>::Error>>;

/// A single logical connection.
///
/// Cloning yields another handle to the same connection. The handle starts
/// [`ReadyState::Disconnected`] and only changes state through
/// [`open_uri`](Self::open_uri), [`close`](Self::close) or events the driver
/// reports for its client.
pub struct Connection<D: Driver = MongoDriver> {
    inner: Arc<Inner<D>>,
}

struct Inner<D: Driver> {
    driver: D,
    lifecycle: Arc<Lifecycle>,
    client: Mutex<Option<D::Client>>,
    attempt: Mutex<Option<Attempt<D::Error>>>,
}

impl<D: Driver> Clone for Connection<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver> Connection<D> {
    /// Create an unopened connection. No I/O happens until `open_uri`.
    pub fn new(driver: D) -> Self {
        Self {
            inner: Arc::new(Inner {
                driver,
                lifecycle: Arc::new(Lifecycle::new()),
                client: Mutex::new(None),
                attempt: Mutex::new(None),
            }),
        }
    }

    /// Current readiness state.
    pub fn ready_state(&self) -> ReadyState {
        self.inner.lifecycle.state()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ReadyState> {
        self.inner.lifecycle.subscribe()
    }

    /// Register a listener. Listeners are never removed.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.lifecycle.events().on(kind, listener);
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.lifecycle.events().listener_count(kind)
    }

    /// The driver client, once connected.
    pub fn client(&self) -> Option<D::Client> {
        self.inner.client.lock().clone()
    }

    /// The driver this connection delegates to.
    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    /// Whether both handles refer to the same connection.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.inner, &other.inner)
    }

    /// Start a new open attempt against `uri`.
    ///
    /// The state moves to [`ReadyState::Connecting`] before this returns. The
    /// attempt runs on a spawned task whether or not the returned future is
    /// polled, and becomes the attempt [`as_promise`](Self::as_promise)
    /// reports on. A client still held from a lost connection is closed
    /// before the new one is made. Calling this while another attempt is in
    /// flight starts a second one that supersedes the first, whose client is
    /// then discarded; use [`ConnectionManager::open`](crate::ConnectionManager::open)
    /// for idempotent opening.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn open_uri(&self, uri: String, options: &ConnectOptions) -> OpenFuture<D> {
        let inner = Arc::clone(&self.inner);
        let options = options.clone();
        let generation = self.inner.lifecycle.advance();
        let attempt = async move { inner.establish(uri, options, generation).await }
            .boxed()
            .shared();

        *self.inner.attempt.lock() = Some(attempt.clone());
        self.inner.lifecycle.clear_lost();
        self.inner.lifecycle.transition(ReadyState::Connecting);

        tokio::spawn(attempt.clone());

        self.outcome(attempt)
    }

    /// Outcome of the most recent open attempt, or `None` if the connection
    /// was never opened.
    ///
    /// Every caller shares the same attempt; no new driver call is made.
    pub fn as_promise(&self) -> Option<OpenFuture<D>> {
        let attempt = self.inner.attempt.lock().clone()?;
        Some(self.outcome(attempt))
    }

    /// Close the connection.
    ///
    /// An attempt still in flight is allowed to finish first. If another
    /// close is already in progress this waits for it instead of closing
    /// twice. Closing a connection without a client only settles the state
    /// to disconnected.
    pub async fn close(&self, force: bool) -> Result<(), D::Error> {
        loop {
            match self.ready_state() {
                ReadyState::Connecting => {
                    let pending = self.inner.attempt.lock().clone();
                    let Some(attempt) = pending else { break };
                    // The attempt's failure was already reported to its own callers.
                    let _ = attempt.await;
                }
                ReadyState::Disconnecting => {
                    let mut state = self.watch_state();
                    // The sender lives as long as the connection we hold.
                    let _ = state
                        .wait_for(|current| *current != ReadyState::Disconnecting)
                        .await;
                    return Ok(());
                }
                ReadyState::Connected | ReadyState::Disconnected => break,
            }
        }

        self.inner.lifecycle.clear_lost();
        let client = self.inner.client.lock().take();
        let Some(client) = client else {
            self.inner.lifecycle.transition(ReadyState::Disconnected);
            return Ok(());
        };

        debug!(force, "Closing connection");
        let generation = self.inner.lifecycle.advance();
        self.inner.lifecycle.transition(ReadyState::Disconnecting);
        let result = self.inner.driver.close(client, force).await;
        // A reopen issued meanwhile owns the state now.
        if self.inner.lifecycle.is_current(generation) {
            self.inner.lifecycle.transition(ReadyState::Disconnected);
        }
        result
    }

    fn outcome(&self, attempt: Attempt<D::Error>) -> OpenFuture<D> {
        let connection = self.clone();
        async move { attempt.await.map(|()| connection) }.boxed()
    }
}

impl<D: Driver> Inner<D> {
    async fn establish(
        self: Arc<Self>,
        uri: String,
        options: ConnectOptions,
        generation: u64,
    ) -> Result<(), D::Error> {
        // A client left behind by a lost connection is replaced, not leaked.
        let previous = if self.lifecycle.is_current(generation) {
            self.client.lock().take()
        } else {
            None
        };
        if let Some(previous) = previous {
            debug!("Closing previous client before reopening");
            if let Err(err) = self.driver.close(previous, false).await {
                debug!(error = %err, "Previous client did not close cleanly");
            }
        }

        let events = EventSink::new(&self.lifecycle, generation);
        match self.driver.connect(&uri, &options, events).await {
            Ok(client) if !self.lifecycle.is_current(generation) => {
                debug!("Open attempt was superseded, discarding its client");
                if let Err(err) = self.driver.close(client, true).await {
                    debug!(error = %err, "Superseded client did not close cleanly");
                }
                Ok(())
            }
            Ok(client) => {
                *self.client.lock() = Some(client);
                self.lifecycle.transition(ReadyState::Connected);
                Ok(())
            }
            Err(err) => {
                debug!(error = %err, "Open attempt failed");
                if self.lifecycle.is_current(generation) {
                    self.lifecycle.transition(ReadyState::Disconnected);
                }
                self.lifecycle.emit(ConnectionEvent::Error(Arc::new(err.clone())));
                Err(err)
            }
        }
    }
}

impl<D: Driver> fmt::Debug for Connection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("ready_state", &self.ready_state())
            .field("connected", &self.inner.client.lock().is_some())
            .finish()
    }
}
