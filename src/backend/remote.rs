//! Remote Backend - HTTP REST plus a Multiplexed WebSocket Hub
//!
//! [`ChatBackend`] implementation against a real server. REST calls go
//! through `reqwest` with a per-request timeout; reply streaming runs over
//! a single WebSocket to `{base}/stream` shared by every subscription.
//!
//! # Architecture
//!
//! ```text
//!   subscribe()/dispose              inbound frames
//!        |                                 |
//!        v                                 v
//!   +-----------+   HubCommand   +------------------+
//!   | Remote    | -------------> |     hub task     |
//!   | Backend   |                | owns the socket  |
//!   +-----------+                | routes by sub id |
//!        |                       +------------------+
//!        |                         |            |
//!   ConnectionEvent          per-subscription   reconnect loop
//!   broadcast                event senders      (linear backoff, capped)
//! ```
//!
//! The hub task owns the socket outright. Public methods talk to it through
//! an unbounded command channel, so a subscription's disposer can fire from
//! synchronous drop code. On socket loss the hub drops every routed sender,
//! which is how each consumer learns its stream broke, then redials forever
//! with delay `min((attempt + 1) * step, ceiling)`. The first successful
//! dial emits [`ConnectionEvent::Connected`]; every later recovery emits
//! [`ConnectionEvent::Reconnected`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::backend::traits::{ChatBackend, ConnectionEvent, StreamEvent, Subscription};
use crate::backend::wire::{ClientFrame, ServerFrame};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::messages::{Chat, ChatId, Message, ResumeCursor};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the connection event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Commands from the public API to the hub task
enum HubCommand {
    Subscribe {
        id: Uuid,
        chat: ChatId,
        cursor: ResumeCursor,
        event_tx: mpsc::UnboundedSender<StreamEvent>,
        result_tx: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        id: Uuid,
    },
    Shutdown,
}

/// Handle to a running hub task
struct HubHandle {
    cmd_tx: mpsc::UnboundedSender<HubCommand>,
    task: JoinHandle<()>,
}

/// HTTP + WebSocket chat backend
pub struct RemoteBackend {
    base_url: String,
    probe_timeout: Duration,
    backoff_step: Duration,
    backoff_ceiling: Duration,
    http: reqwest::Client,
    events: broadcast::Sender<ConnectionEvent>,
    hub: Mutex<Option<HubHandle>>,
}

impl RemoteBackend {
    /// Create a backend for the endpoint in the config
    ///
    /// Nothing is dialled until [`connect`](ChatBackend::connect) runs.
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            probe_timeout: config.probe_timeout,
            backoff_step: config.reconnect_backoff_step,
            backoff_ceiling: config.reconnect_backoff_ceiling,
            http: reqwest::Client::builder()
                .timeout(config.request_timeout)
                .build()
                .expect("Failed to create HTTP client"),
            events,
            hub: Mutex::new(None),
        }
    }

    /// URL of one chat's REST resource
    fn chat_url(&self, chat: &ChatId) -> String {
        format!("{}/{}", self.base_url, chat)
    }

    /// Reject non-success REST responses as [`ClientError::OperationFailed`]
    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::OperationFailed(format!(
                "backend returned {status}: {body}"
            )))
        }
    }
}

#[async_trait]
impl ChatBackend for RemoteBackend {
    fn name(&self) -> &str {
        "remote"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn probe(&self) -> Result<bool> {
        let response = self
            .http
            .get(&self.base_url)
            .timeout(self.probe_timeout)
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn list_chats(&self) -> Result<Vec<Chat>> {
        let response = self.http.get(&self.base_url).send().await?;
        let chats = Self::expect_success(response).await?.json().await?;
        Ok(chats)
    }

    async fn history(&self, chat: &ChatId) -> Result<Vec<Message>> {
        let response = self.http.get(self.chat_url(chat)).send().await?;
        let messages = Self::expect_success(response).await?.json().await?;
        Ok(messages)
    }

    async fn create_chat(&self, name: &str) -> Result<Chat> {
        let response = self
            .http
            .post(&self.base_url)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        let chat = Self::expect_success(response).await?.json().await?;
        Ok(chat)
    }

    async fn delete_chat(&self, chat: &ChatId) -> Result<()> {
        let response = self.http.delete(self.chat_url(chat)).send().await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn send_prompt(&self, chat: &ChatId, text: &str) -> Result<Message> {
        let response = self
            .http
            .post(self.chat_url(chat))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;
        let message = Self::expect_success(response).await?.json().await?;
        Ok(message)
    }

    async fn cancel_generation(&self, chat: &ChatId) -> Result<()> {
        let url = format!("{}/cancel", self.chat_url(chat));
        let response = self.http.post(url).send().await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        {
            let hub = self.hub.lock();
            if let Some(handle) = hub.as_ref() {
                if !handle.task.is_finished() {
                    return Ok(());
                }
            }
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let hub = HubTask {
            ws_url: hub_url(&self.base_url),
            label: hub_label(),
            backoff_step: self.backoff_step,
            backoff_ceiling: self.backoff_ceiling,
            events: self.events.clone(),
        };
        let task = tokio::spawn(hub.run(cmd_rx, ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => {
                *self.hub.lock() = Some(HubHandle { cmd_tx, task });
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            // The task never reports readiness without sending first
            Err(_) => Err(ClientError::SubscriptionDropped(
                "hub task exited before reporting readiness".to_string(),
            )),
        }
    }

    async fn disconnect(&self) {
        let handle = self.hub.lock().take();
        if let Some(handle) = handle {
            let _ = handle.cmd_tx.send(HubCommand::Shutdown);
            let _ = handle.task.await;
        }
    }

    async fn subscribe(&self, chat: &ChatId, cursor: &ResumeCursor) -> Result<Subscription> {
        let cmd_tx = {
            let hub = self.hub.lock();
            match hub.as_ref() {
                Some(handle) if !handle.task.is_finished() => handle.cmd_tx.clone(),
                _ => {
                    return Err(ClientError::SubscriptionDropped(
                        "streaming connection is not established".to_string(),
                    ))
                }
            }
        };

        let id = Uuid::new_v4();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();

        cmd_tx
            .send(HubCommand::Subscribe {
                id,
                chat: chat.clone(),
                cursor: cursor.clone(),
                event_tx,
                result_tx,
            })
            .map_err(|_| ClientError::SubscriptionDropped("hub task is gone".to_string()))?;
        result_rx.await.map_err(|_| {
            ClientError::SubscriptionDropped("hub task dropped the subscribe request".to_string())
        })??;

        Ok(Subscription::new(event_rx, move || {
            let _ = cmd_tx.send(HubCommand::Unsubscribe { id });
        }))
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

/// State owned by the background hub task
struct HubTask {
    ws_url: String,
    label: String,
    backoff_step: Duration,
    backoff_ceiling: Duration,
    events: broadcast::Sender<ConnectionEvent>,
}

impl HubTask {
    /// Run the hub until shutdown
    ///
    /// The initial dial reports through `ready_tx`; a failure there ends the
    /// task, so automatic reconnection only covers established connections.
    async fn run(
        self,
        mut cmd_rx: mpsc::UnboundedReceiver<HubCommand>,
        ready_tx: oneshot::Sender<Result<()>>,
    ) {
        let mut ws = match connect_ws(&self.ws_url).await {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                let _ = self.events.send(ConnectionEvent::Connected);
                tracing::info!(hub = %self.label, url = %self.ws_url, "Streaming hub connected");
                Some(stream)
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        let mut subs: HashMap<Uuid, mpsc::UnboundedSender<StreamEvent>> = HashMap::new();
        let mut attempt: u32 = 0;

        loop {
            if let Some(socket) = ws.as_mut() {
                tokio::select! {
                    biased;

                    cmd = cmd_rx.recv() => match cmd {
                        Some(HubCommand::Subscribe { id, chat, cursor, event_tx, result_tx }) => {
                            let frame = ClientFrame::subscribe(id, &chat, &cursor);
                            match send_frame(socket, &frame).await {
                                Ok(()) => {
                                    subs.insert(id, event_tx);
                                    let _ = result_tx.send(Ok(()));
                                }
                                Err(e) => {
                                    tracing::warn!(
                                        hub = %self.label,
                                        error = %e,
                                        "Subscribe send failed; treating socket as lost"
                                    );
                                    let _ = result_tx.send(Err(e));
                                    ws = None;
                                }
                            }
                        }
                        Some(HubCommand::Unsubscribe { id }) => {
                            if subs.remove(&id).is_some() {
                                let frame = ClientFrame::Unsubscribe { subscription_id: id };
                                if let Err(e) = send_frame(socket, &frame).await {
                                    tracing::warn!(
                                        hub = %self.label,
                                        error = %e,
                                        "Unsubscribe send failed; treating socket as lost"
                                    );
                                    ws = None;
                                }
                            }
                        }
                        Some(HubCommand::Shutdown) | None => {
                            let _ = socket.close(None).await;
                            let _ = self.events.send(ConnectionEvent::Disconnected);
                            tracing::info!(hub = %self.label, "Streaming hub disconnected");
                            return;
                        }
                    },

                    frame = socket.next() => match frame {
                        Some(Ok(WsMessage::Text(text))) => self.route_frame(&text, &mut subs),
                        Some(Ok(WsMessage::Ping(payload))) => {
                            let _ = socket.send(WsMessage::Pong(payload)).await;
                        }
                        Some(Ok(WsMessage::Close(_))) => {
                            tracing::warn!(hub = %self.label, "Server closed the streaming hub");
                            ws = None;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(hub = %self.label, error = %e, "Streaming hub socket error");
                            ws = None;
                        }
                        None => {
                            tracing::warn!(hub = %self.label, "Streaming hub socket ended");
                            ws = None;
                        }
                    },
                }
            } else {
                // Socket lost. Dropping every routed sender is what tells the
                // consumers their streams broke; they re-subscribe with their
                // own cursors once the connection is back.
                if !subs.is_empty() {
                    tracing::debug!(
                        hub = %self.label,
                        dropped = subs.len(),
                        "Dropping subscriptions after socket loss"
                    );
                    subs.clear();
                }

                let delay = reconnect_delay(attempt, self.backoff_step, self.backoff_ceiling);
                attempt += 1;
                let _ = self.events.send(ConnectionEvent::Reconnecting { attempt });
                tracing::info!(
                    hub = %self.label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting to streaming hub"
                );

                // Serve commands while the backoff delay runs
                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        biased;

                        cmd = cmd_rx.recv() => match cmd {
                            Some(HubCommand::Subscribe { result_tx, .. }) => {
                                let _ = result_tx.send(Err(ClientError::SubscriptionDropped(
                                    "streaming hub is reconnecting".to_string(),
                                )));
                            }
                            Some(HubCommand::Unsubscribe { .. }) => {}
                            Some(HubCommand::Shutdown) | None => {
                                let _ = self.events.send(ConnectionEvent::Disconnected);
                                tracing::info!(
                                    hub = %self.label,
                                    "Streaming hub shut down while reconnecting"
                                );
                                return;
                            }
                        },

                        () = &mut sleep => break,
                    }
                }

                match connect_ws(&self.ws_url).await {
                    Ok(stream) => {
                        attempt = 0;
                        ws = Some(stream);
                        let _ = self.events.send(ConnectionEvent::Reconnected);
                        tracing::info!(hub = %self.label, "Streaming hub reconnected");
                    }
                    Err(e) => {
                        tracing::warn!(
                            hub = %self.label,
                            attempt,
                            error = %e,
                            "Reconnect attempt failed"
                        );
                    }
                }
            }
        }
    }

    /// Parse one inbound text frame and route it by subscription id
    fn route_frame(&self, text: &str, subs: &mut HashMap<Uuid, mpsc::UnboundedSender<StreamEvent>>) {
        let frame: ServerFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(hub = %self.label, error = %e, "Discarding unparseable hub frame");
                return;
            }
        };

        match frame {
            ServerFrame::Fragment {
                subscription_id,
                record,
            } => match subs.get(&subscription_id) {
                Some(event_tx) => {
                    if event_tx.send(StreamEvent::Fragment(record)).is_err() {
                        // Consumer went away without unsubscribing
                        subs.remove(&subscription_id);
                    }
                }
                None => {
                    tracing::debug!(
                        hub = %self.label,
                        %subscription_id,
                        "Fragment for unknown subscription"
                    );
                }
            },
            ServerFrame::Complete { subscription_id } => {
                if let Some(event_tx) = subs.remove(&subscription_id) {
                    let _ = event_tx.send(StreamEvent::Completed);
                }
            }
        }
    }
}

/// Dial the hub endpoint
async fn connect_ws(url: &str) -> Result<WsStream> {
    match tokio_tungstenite::connect_async(url).await {
        Ok((stream, _response)) => Ok(stream),
        Err(e) => Err(ClientError::TransportUnavailable {
            url: url.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Serialize and send one frame over the socket
async fn send_frame(socket: &mut WsStream, frame: &ClientFrame) -> Result<()> {
    let payload = serde_json::to_string(frame)
        .map_err(|e| ClientError::OperationFailed(format!("frame serialization failed: {e}")))?;
    socket.send(WsMessage::Text(payload.into())).await?;
    Ok(())
}

/// Hub endpoint for a REST base URL, with the scheme swapped to ws(s)
fn hub_url(base_url: &str) -> String {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    };
    format!("{ws_base}/stream")
}

/// Random label tying one hub task's log lines together across reconnects
fn hub_label() -> String {
    use rand::Rng;
    let bytes: [u8; 8] = rand::thread_rng().gen();
    format!("hub_{}", hex::encode(bytes))
}

/// Backoff before reconnect attempt `attempt` (zero-based), linear and capped
fn reconnect_delay(attempt: u32, step: Duration, ceiling: Duration) -> Duration {
    step.saturating_mul(attempt.saturating_add(1)).min(ceiling)
}
