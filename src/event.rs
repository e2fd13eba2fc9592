//! Readiness state and lifecycle events.
//!
//! A connection's state lives in a `tokio::sync::watch` channel so waiters can
//! await a transition. Every state change also emits the event named after the
//! new state to the registered listeners, in registration order.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::watch;

/// Error payload carried by [`ConnectionEvent::Error`].
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Readiness of a connection handle.
///
/// The discriminants match the numbering used by MongoDB ODMs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadyState {
    /// No connection and no attempt in flight.
    Disconnected = 0,
    /// Connected to the server.
    Connected = 1,
    /// An open attempt is in flight.
    Connecting = 2,
    /// A close is in progress.
    Disconnecting = 3,
}

impl ReadyState {
    /// Numeric code of this state.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Lowercase name of this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Connecting => "connecting",
            Self::Disconnecting => "disconnecting",
        }
    }

    fn event(self) -> ConnectionEvent {
        match self {
            Self::Disconnected => ConnectionEvent::Disconnected,
            Self::Connected => ConnectionEvent::Connected,
            Self::Connecting => ConnectionEvent::Connecting,
            Self::Disconnecting => ConnectionEvent::Disconnecting,
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of lifecycle events a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connecting,
    Connected,
    /// Connected to a replica set primary and at least one secondary.
    FullSetup,
    Disconnecting,
    Disconnected,
    Reconnected,
    /// The driver gave up reconnecting.
    ReconnectFailed,
    Error,
}

/// A lifecycle event.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connecting,
    Connected,
    FullSetup,
    Disconnecting,
    Disconnected,
    Reconnected,
    ReconnectFailed,
    Error(SharedError),
}

impl ConnectionEvent {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connecting => EventKind::Connecting,
            Self::Connected => EventKind::Connected,
            Self::FullSetup => EventKind::FullSetup,
            Self::Disconnecting => EventKind::Disconnecting,
            Self::Disconnected => EventKind::Disconnected,
            Self::Reconnected => EventKind::Reconnected,
            Self::ReconnectFailed => EventKind::ReconnectFailed,
            Self::Error(_) => EventKind::Error,
        }
    }
}

type Listener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Ordered listener registry.
#[derive(Default)]
pub struct EventEmitter {
    listeners: RwLock<Vec<(EventKind, Listener)>>,
}

impl EventEmitter {
    /// Create an emitter with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.listeners.write().push((kind, Arc::new(listener)));
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|(registered, _)| *registered == kind)
            .count()
    }

    /// Deliver `event` to every matching listener.
    pub fn emit(&self, event: &ConnectionEvent) {
        // Snapshot so a listener may register further listeners.
        let matching: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|(kind, _)| *kind == event.kind())
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in matching {
            listener(event);
        }
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

/// State and listeners shared between a connection and its driver client.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: watch::Sender<ReadyState>,
    events: EventEmitter,
    lost: AtomicBool,
    generation: AtomicU64,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ReadyState::Disconnected);
        Self {
            state,
            events: EventEmitter::new(),
            lost: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Start a new generation. Sinks and closes from older generations
    /// no longer affect the state.
    pub(crate) fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub(crate) fn state(&self) -> ReadyState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ReadyState> {
        self.state.subscribe()
    }

    pub(crate) fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        self.events.emit(&event);
    }

    /// Move to `next`, emitting its event if the state changed.
    pub(crate) fn transition(&self, next: ReadyState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::debug!(state = %next, "Connection state changed");
            self.events.emit(&next.event());
        }
        changed
    }

    /// Forget a pending loss; an explicit open or close supersedes it.
    pub(crate) fn clear_lost(&self) {
        self.lost.store(false, Ordering::SeqCst);
    }
}

/// Driver-facing handle for reporting runtime events on a connection.
///
/// Holds a weak reference, so a driver client that outlives its connection
/// reports into nothing. A sink is bound to the open attempt that created it:
/// once the connection is reopened or closed, its reports are dropped.
#[derive(Clone)]
pub struct EventSink {
    lifecycle: Weak<Lifecycle>,
    generation: u64,
}

impl EventSink {
    pub(crate) fn new(lifecycle: &Arc<Lifecycle>, generation: u64) -> Self {
        Self {
            lifecycle: Arc::downgrade(lifecycle),
            generation,
        }
    }

    /// A sink attached to no connection.
    pub fn detached() -> Self {
        Self {
            lifecycle: Weak::new(),
            generation: 0,
        }
    }

    /// Whether the connection this sink reports to still exists and still
    /// belongs to the client the sink was handed to.
    pub fn is_attached(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<Lifecycle>> {
        self.lifecycle
            .upgrade()
            .filter(|lifecycle| lifecycle.is_current(self.generation))
    }

    /// The driver reached a replica set primary and at least one secondary.
    pub fn full_setup(&self) {
        if let Some(lifecycle) = self.current() {
            lifecycle.emit(ConnectionEvent::FullSetup);
        }
    }

    /// Connectivity was lost after the connection had been established.
    ///
    /// Ignored unless the connection is currently connected.
    pub fn lost(&self, cause: Option<SharedError>) {
        let Some(lifecycle) = self.current() else {
            return;
        };
        if lifecycle.state() != ReadyState::Connected {
            return;
        }
        lifecycle.lost.store(true, Ordering::SeqCst);
        lifecycle.transition(ReadyState::Disconnected);
        if let Some(err) = cause {
            lifecycle.emit(ConnectionEvent::Error(err));
        }
    }

    /// Connectivity came back after a [`lost`](Self::lost).
    pub fn reconnected(&self) {
        let Some(lifecycle) = self.current() else {
            return;
        };
        if !lifecycle.lost.swap(false, Ordering::SeqCst) {
            return;
        }
        if lifecycle.state() == ReadyState::Disconnected {
            lifecycle.transition(ReadyState::Connected);
            lifecycle.emit(ConnectionEvent::Reconnected);
        }
    }

    /// The driver stopped trying to reconnect.
    pub fn reconnect_failed(&self) {
        if let Some(lifecycle) = self.current() {
            lifecycle.emit(ConnectionEvent::ReconnectFailed);
        }
    }

    /// Report a runtime error.
    pub fn error<E>(&self, err: E)
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Some(lifecycle) = self.current() {
            lifecycle.emit(ConnectionEvent::Error(Arc::new(err)));
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(lifecycle: &Lifecycle, kinds: &[EventKind]) -> Arc<Mutex<Vec<EventKind>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in kinds {
            let seen = Arc::clone(&seen);
            lifecycle
                .events()
                .on(*kind, move |event| seen.lock().push(event.kind()));
        }
        seen
    }

    #[test]
    fn test_ready_state_codes() {
        assert_eq!(ReadyState::Disconnected.code(), 0);
        assert_eq!(ReadyState::Connected.code(), 1);
        assert_eq!(ReadyState::Connecting.code(), 2);
        assert_eq!(ReadyState::Disconnecting.code(), 3);
        assert_eq!(ReadyState::Connecting.to_string(), "connecting");
    }

    #[test]
    fn test_emitter_preserves_registration_order() {
        let emitter = EventEmitter::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let order = Arc::clone(&order);
            emitter.on(EventKind::Connected, move |_| order.lock().push(id));
        }
        emitter.on(EventKind::Disconnected, |_| panic!("wrong kind delivered"));

        emitter.emit(&ConnectionEvent::Connected);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(emitter.listener_count(EventKind::Connected), 3);
    }

    #[test]
    fn test_listener_may_register_listener() {
        let emitter = Arc::new(EventEmitter::new());
        let inner = Arc::clone(&emitter);
        emitter.on(EventKind::Connecting, move |_| {
            inner.on(EventKind::Connected, |_| {});
        });
        emitter.emit(&ConnectionEvent::Connecting);
        assert_eq!(emitter.listener_count(EventKind::Connected), 1);
    }

    #[test]
    fn test_transition_emits_once() {
        let lifecycle = Lifecycle::new();
        let seen = recorder(&lifecycle, &[EventKind::Connecting, EventKind::Connected]);

        assert!(lifecycle.transition(ReadyState::Connecting));
        assert!(!lifecycle.transition(ReadyState::Connecting));
        assert!(lifecycle.transition(ReadyState::Connected));

        assert_eq!(*seen.lock(), vec![EventKind::Connecting, EventKind::Connected]);
        assert_eq!(lifecycle.state(), ReadyState::Connected);
    }

    #[test]
    fn test_sink_loss_and_reconnect() {
        let lifecycle = Arc::new(Lifecycle::new());
        let seen = recorder(
            &lifecycle,
            &[
                EventKind::Disconnected,
                EventKind::Reconnected,
                EventKind::Error,
            ],
        );
        let sink = EventSink::new(&lifecycle, lifecycle.advance());

        // Not connected yet: nothing to lose or restore.
        sink.lost(None);
        sink.reconnected();
        assert!(seen.lock().is_empty());

        lifecycle.transition(ReadyState::Connected);
        let cause: SharedError = Arc::new(std::io::Error::other("heartbeat failed"));
        sink.lost(Some(cause));
        assert_eq!(lifecycle.state(), ReadyState::Disconnected);

        sink.reconnected();
        assert_eq!(lifecycle.state(), ReadyState::Connected);
        assert_eq!(
            *seen.lock(),
            vec![
                EventKind::Disconnected,
                EventKind::Error,
                EventKind::Reconnected
            ]
        );
    }

    #[test]
    fn test_cleared_loss_does_not_reconnect() {
        let lifecycle = Arc::new(Lifecycle::new());
        let sink = EventSink::new(&lifecycle, lifecycle.advance());
        lifecycle.transition(ReadyState::Connected);
        sink.lost(None);
        lifecycle.clear_lost();
        sink.reconnected();
        assert_eq!(lifecycle.state(), ReadyState::Disconnected);
    }

    #[test]
    fn test_sink_from_older_generation_is_ignored() {
        let lifecycle = Arc::new(Lifecycle::new());
        let old = EventSink::new(&lifecycle, lifecycle.advance());
        let current = EventSink::new(&lifecycle, lifecycle.advance());
        lifecycle.transition(ReadyState::Connected);

        assert!(!old.is_attached());
        old.lost(None);
        assert_eq!(lifecycle.state(), ReadyState::Connected);

        assert!(current.is_attached());
        current.lost(None);
        assert_eq!(lifecycle.state(), ReadyState::Disconnected);
    }

    #[test]
    fn test_detached_sink_is_inert() {
        let sink = EventSink::detached();
        assert!(!sink.is_attached());
        sink.full_setup();
        sink.error(std::io::Error::other("ignored"));
    }
}
