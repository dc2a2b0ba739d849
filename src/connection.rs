//! Connection Manager - Liveness, Initialization, Recovery
//!
//! Owns the lifecycle of the persistent streaming connection and the
//! process-wide offline decision.
//!
//! # Offline Is One-Way
//!
//! The liveness probe distinguishes "reachable but unhappy" from
//! "unreachable". Only the latter latches [`ConnectionState::Offline`], and
//! the latch never clears: once a probe has failed at the transport level,
//! every later call is served from the fallback source without touching the
//! network again. Recovery means restarting the process. A reachable
//! backend answering non-success keeps its chance on the next call.
//!
//! # Recovery of Live Streams
//!
//! After the backend transport reconnects, server-side subscriptions are
//! gone. The watcher task listens for [`ConnectionEvent::Reconnected`] and
//! force-closes every channel in the [`StreamRegistry`]; each stream
//! session observes end-of-stream and resubscribes from its cursor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::backend::{ChatBackend, ConnectionEvent};
use crate::error::{ClientError, Result};
use crate::stream_registry::StreamRegistry;

/// Lifecycle states of the streaming connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempted yet (or torn down by shutdown)
    Uninitialized,
    /// A connect is in flight
    Connecting,
    /// The persistent connection is up
    Connected,
    /// The backend was unreachable; permanent fallback operation
    Offline,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Manages probe results, connection setup and stream recovery
pub struct ConnectionManager<B> {
    backend: Arc<B>,
    registry: StreamRegistry,
    state: RwLock<ConnectionState>,
    /// Fast-path copy of the offline latch; REST calls read only this
    offline: AtomicBool,
    /// Serializes connect attempts so exactly one task dials
    init_lock: tokio::sync::Mutex<()>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<B: ChatBackend + 'static> ConnectionManager<B> {
    /// Create a manager over a backend and the shared stream registry
    pub fn new(backend: Arc<B>, registry: StreamRegistry) -> Self {
        Self {
            backend,
            registry,
            state: RwLock::new(ConnectionState::Uninitialized),
            offline: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
            watcher: Mutex::new(None),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the offline latch has fired
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    /// The backend behind this manager
    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// The registry of live reply channels
    #[must_use]
    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Check whether the backend is live
    ///
    /// Returns `false` without touching the network once the offline latch
    /// has fired. A transport-level probe failure fires the latch; a
    /// reachable backend answering non-success just returns `false` and
    /// will be probed again on the next call.
    pub async fn probe_liveness(&self) -> bool {
        if self.is_offline() {
            return false;
        }

        match self.backend.probe().await {
            Ok(live) => {
                if !live {
                    tracing::warn!(
                        backend = self.backend.name(),
                        url = self.backend.base_url(),
                        "Backend reachable but not answering successfully"
                    );
                }
                live
            }
            Err(e) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    url = self.backend.base_url(),
                    error = %e,
                    "Backend unreachable; switching to offline mode for the rest of this run"
                );
                self.offline.store(true, Ordering::Release);
                *self.state.write() = ConnectionState::Offline;
                false
            }
        }
    }

    /// Probe, then make sure the persistent connection is up
    ///
    /// Runs the liveness probe on every call, even when already connected.
    /// On the first live call this dials the backend and starts the
    /// reconnect watcher.
    pub async fn ensure_initialized(&self) -> Result<()> {
        if !self.probe_liveness().await {
            return Err(if self.is_offline() {
                ClientError::TransportUnavailable {
                    url: self.backend.base_url().to_string(),
                    reason: "offline mode latched after a failed liveness probe".to_string(),
                }
            } else {
                ClientError::OperationFailed(
                    "backend answered the liveness probe with a non-success status".to_string(),
                )
            });
        }

        let _guard = self.init_lock.lock().await;
        if *self.state.read() == ConnectionState::Connected {
            return Ok(());
        }

        *self.state.write() = ConnectionState::Connecting;
        match self.backend.connect().await {
            Ok(()) => {
                *self.state.write() = ConnectionState::Connected;
                self.spawn_watcher();
                tracing::info!(backend = self.backend.name(), "Streaming connection established");
                Ok(())
            }
            Err(e) => {
                *self.state.write() = ConnectionState::Uninitialized;
                tracing::warn!(
                    backend = self.backend.name(),
                    error = %e,
                    "Failed to establish streaming connection"
                );
                Err(e)
            }
        }
    }

    /// Start the watcher task that restarts streams after a reconnect
    fn spawn_watcher(&self) {
        let mut guard = self.watcher.lock();
        if guard.is_some() {
            return;
        }

        let mut events = BroadcastStream::new(self.backend.connection_events());
        let registry = self.registry.clone();
        let backend_name = self.backend.name().to_string();

        *guard = Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    Ok(ConnectionEvent::Reconnected) => {
                        let closed = registry.close_all();
                        tracing::info!(
                            backend = %backend_name,
                            closed,
                            "Connection recovered; live reply streams restarting"
                        );
                    }
                    Ok(event) => {
                        tracing::debug!(backend = %backend_name, ?event, "Connection event");
                    }
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        // A lag can swallow a Reconnected; treat it as one
                        let closed = registry.close_all();
                        tracing::warn!(
                            backend = %backend_name,
                            missed,
                            closed,
                            "Connection event stream lagged; live reply streams restarting"
                        );
                    }
                }
            }
        }));
    }

    /// Tear everything down
    ///
    /// Stops the watcher, closes every registered reply channel and
    /// disconnects the backend. The offline latch survives; a manager that
    /// went offline stays offline.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }

        let closed = self.registry.close_all();
        self.backend.disconnect().await;

        *self.state.write() = if self.is_offline() {
            ConnectionState::Offline
        } else {
            ConnectionState::Uninitialized
        };
        tracing::info!(backend = self.backend.name(), closed, "Connection manager shut down");
    }
}

impl<B> Drop for ConnectionManager<B> {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use super::*;
    use crate::backend::Subscription;
    use crate::channel::Channel;
    use crate::messages::{Chat, ChatId, Message, ResumeCursor};

    /// Backend double with scripted probe and connect outcomes
    struct StubBackend {
        probe_script: Mutex<VecDeque<Result<bool>>>,
        connect_script: Mutex<VecDeque<Result<()>>>,
        probes: AtomicUsize,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        events: broadcast::Sender<ConnectionEvent>,
    }

    impl StubBackend {
        fn new() -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                probe_script: Mutex::new(VecDeque::new()),
                connect_script: Mutex::new(VecDeque::new()),
                probes: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                events,
            })
        }

        fn script_probe(&self, result: Result<bool>) {
            self.probe_script.lock().push_back(result);
        }

        fn script_connect(&self, result: Result<()>) {
            self.connect_script.lock().push_back(result);
        }

        fn probes(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        fn unreachable_error() -> ClientError {
            ClientError::TransportUnavailable {
                url: "test://stub".to_string(),
                reason: "connection refused".to_string(),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for StubBackend {
        fn name(&self) -> &str {
            "stub"
        }

        fn base_url(&self) -> &str {
            "test://stub"
        }

        async fn probe(&self) -> Result<bool> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.probe_script.lock().pop_front().unwrap_or(Ok(true))
        }

        async fn list_chats(&self) -> Result<Vec<Chat>> {
            Err(ClientError::OperationFailed("not scripted".to_string()))
        }

        async fn history(&self, _chat: &ChatId) -> Result<Vec<Message>> {
            Err(ClientError::OperationFailed("not scripted".to_string()))
        }

        async fn create_chat(&self, _name: &str) -> Result<Chat> {
            Err(ClientError::OperationFailed("not scripted".to_string()))
        }

        async fn delete_chat(&self, _chat: &ChatId) -> Result<()> {
            Err(ClientError::OperationFailed("not scripted".to_string()))
        }

        async fn send_prompt(&self, _chat: &ChatId, _text: &str) -> Result<Message> {
            Err(ClientError::OperationFailed("not scripted".to_string()))
        }

        async fn cancel_generation(&self, _chat: &ChatId) -> Result<()> {
            Ok(())
        }

        async fn connect(&self) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connect_script.lock().pop_front().unwrap_or(Ok(()))
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        async fn subscribe(
            &self,
            _chat: &ChatId,
            _cursor: &ResumeCursor,
        ) -> Result<Subscription> {
            Err(ClientError::OperationFailed("not scripted".to_string()))
        }

        fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
            self.events.subscribe()
        }
    }

    fn manager(backend: &Arc<StubBackend>) -> ConnectionManager<StubBackend> {
        ConnectionManager::new(backend.clone(), StreamRegistry::new())
    }

    #[tokio::test]
    async fn test_initialize_connects_once_but_probes_every_call() {
        let backend = StubBackend::new();
        let manager = manager(&backend);

        manager.ensure_initialized().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(backend.connects(), 1);

        manager.ensure_initialized().await.unwrap();
        assert_eq!(backend.connects(), 1, "already connected; no second dial");
        assert_eq!(backend.probes(), 2, "liveness is re-checked on every call");
    }

    #[tokio::test]
    async fn test_unreachable_probe_latches_offline_permanently() {
        let backend = StubBackend::new();
        backend.script_probe(Err(StubBackend::unreachable_error()));
        let manager = manager(&backend);

        assert!(!manager.probe_liveness().await);
        assert!(manager.is_offline());
        assert_eq!(manager.state(), ConnectionState::Offline);
        assert_eq!(backend.probes(), 1);

        // Latched: no further probe hits the backend
        assert!(!manager.probe_liveness().await);
        assert_eq!(backend.probes(), 1);

        let err = manager.ensure_initialized().await.unwrap_err();
        assert!(matches!(err, ClientError::TransportUnavailable { .. }));
        assert_eq!(backend.probes(), 1);
        assert_eq!(backend.connects(), 0);
    }

    #[tokio::test]
    async fn test_non_success_probe_does_not_latch() {
        let backend = StubBackend::new();
        backend.script_probe(Ok(false));
        let manager = manager(&backend);

        assert!(!manager.probe_liveness().await);
        assert!(!manager.is_offline(), "non-success answer must not latch");

        // The next call probes again and can succeed
        assert!(manager.probe_liveness().await);
        assert_eq!(backend.probes(), 2);
    }

    #[tokio::test]
    async fn test_failed_connect_reverts_and_can_retry() {
        let backend = StubBackend::new();
        backend.script_connect(Err(ClientError::OperationFailed(
            "handshake rejected".to_string(),
        )));
        let manager = manager(&backend);

        let err = manager.ensure_initialized().await.unwrap_err();
        assert!(matches!(err, ClientError::OperationFailed(_)));
        assert_eq!(manager.state(), ConnectionState::Uninitialized);

        manager.ensure_initialized().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(backend.connects(), 2);
    }

    #[tokio::test]
    async fn test_reconnected_event_closes_registered_channels_once() {
        let backend = StubBackend::new();
        let manager = manager(&backend);
        manager.ensure_initialized().await.unwrap();

        let a: Channel<crate::messages::MessageFragment> = Channel::new();
        let b: Channel<crate::messages::MessageFragment> = Channel::new();
        manager.registry().register(ChatId::from("a"), a.clone());
        manager.registry().register(ChatId::from("b"), b.clone());

        backend.events.send(ConnectionEvent::Reconnected).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(manager.registry().is_empty());

        // Already closed by the watcher, so this transition reports false
        assert!(!a.close());
        assert!(!b.close());
    }

    #[tokio::test]
    async fn test_other_events_leave_channels_alone() {
        let backend = StubBackend::new();
        let manager = manager(&backend);
        manager.ensure_initialized().await.unwrap();

        let channel: Channel<crate::messages::MessageFragment> = Channel::new();
        manager.registry().register(ChatId::from("a"), channel.clone());

        backend.events.send(ConnectionEvent::Connected).unwrap();
        backend
            .events
            .send(ConnectionEvent::Reconnecting { attempt: 1 })
            .unwrap();
        backend.events.send(ConnectionEvent::Disconnected).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!channel.is_closed());
        assert_eq!(manager.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_streams_and_disconnects() {
        let backend = StubBackend::new();
        let manager = manager(&backend);
        manager.ensure_initialized().await.unwrap();

        let channel: Channel<crate::messages::MessageFragment> = Channel::new();
        manager.registry().register(ChatId::from("a"), channel.clone());

        manager.shutdown().await;

        assert!(channel.is_closed());
        assert!(manager.registry().is_empty());
        assert_eq!(backend.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Uninitialized);

        // A shut-down manager can be brought back up
        manager.ensure_initialized().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
    }
}
