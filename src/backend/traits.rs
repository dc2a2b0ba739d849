//! Chat Backend Traits
//!
//! Trait definitions for chat backends. This abstraction allows the client
//! core to work against the real HTTP/WebSocket backend or an in-process
//! double without changing session logic.
//!
//! # Design Philosophy
//!
//! The ChatBackend trait provides a common interface for:
//! - The REST surface (listing, history, create/delete, prompts)
//! - A liveness probe used to decide between live and fallback operation
//! - A persistent streaming connection with per-conversation subscriptions
//!
//! Implementations handle transport-specific details (routes, frames, auth).

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::error::Result;
use crate::messages::{
    Chat, ChatId, FragmentId, Message, MessageFragment, MessageId, ResumeCursor, Sender,
};

/// Lifecycle notifications of the persistent streaming connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// First successful establishment of the connection
    Connected,
    /// A reconnect attempt is about to run
    Reconnecting {
        /// How many attempts have already failed since the loss
        attempt: u32,
    },
    /// The connection was re-established after a loss
    ///
    /// Only this event invalidates live subscriptions; consumers close
    /// their delivery channels and resubscribe from their cursors.
    Reconnected,
    /// The connection was torn down deliberately
    Disconnected,
}

/// Wire-shaped reply fragment as the backend pushes it
///
/// Field names follow the backend payload casing. The sender arrives as a
/// free-form string and is mapped onto [`Sender`] by [`normalize`].
///
/// [`normalize`]: FragmentRecord::normalize
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentRecord {
    /// Identifier of the message this fragment belongs to
    pub id: String,
    /// Producer of the text ("user" or "assistant")
    pub sender: String,
    /// Text carried by this fragment
    pub text: String,
    /// Identifier of this fragment within the stream
    pub fragment_id: String,
    /// Whether this fragment completes its message (absent means false)
    #[serde(default)]
    pub is_final: bool,
}

impl FragmentRecord {
    /// Convert the wire record into the typed fragment
    ///
    /// Unknown sender strings map to [`Sender::Assistant`]; reply streams
    /// only ever carry assistant text.
    #[must_use]
    pub fn normalize(self) -> MessageFragment {
        MessageFragment {
            id: MessageId::from(self.id),
            sender: match self.sender.as_str() {
                "user" => Sender::User,
                _ => Sender::Assistant,
            },
            text: self.text,
            fragment_id: FragmentId::from(self.fragment_id),
            is_final: self.is_final,
        }
    }
}

/// Events delivered through one subscription
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// One reply fragment
    Fragment(FragmentRecord),
    /// The backend finished this reply stream normally
    Completed,
}

/// One live per-conversation subscription
///
/// Yields [`StreamEvent`]s until the backend completes the stream or the
/// subscription drops. Dropping (or calling [`dispose`]) releases the
/// backend-side registration; cleanup may finish in the background.
///
/// [`dispose`]: Subscription::dispose
pub struct Subscription {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    disposer: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a subscription from an event receiver and a disposer callback
    pub fn new(
        events: mpsc::UnboundedReceiver<StreamEvent>,
        disposer: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            disposer: Some(Box::new(disposer)),
        }
    }

    /// Receive the next event
    ///
    /// Returns `None` when the backend side dropped the subscription
    /// without sending [`StreamEvent::Completed`].
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Release the backend-side registration
    ///
    /// Safe to call more than once; only the first call runs the disposer.
    pub fn dispose(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.disposer.is_none())
            .finish()
    }
}

/// Chat backend trait
///
/// Implement this trait to connect the client core to a chat backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Get the backend name (e.g., "remote", "scripted")
    fn name(&self) -> &str;

    /// Base endpoint this backend talks to, for diagnostics and error text
    fn base_url(&self) -> &str;

    /// Probe whether the backend is reachable and answering
    ///
    /// `Ok(true)` means live. `Ok(false)` means the endpoint answered with a
    /// non-success status. `Err` means the endpoint could not be reached at
    /// the transport level at all; callers treat only that as grounds for
    /// permanent fallback.
    async fn probe(&self) -> Result<bool>;

    /// List all conversations
    async fn list_chats(&self) -> Result<Vec<Chat>>;

    /// Fetch the full message history of one conversation
    async fn history(&self, chat: &ChatId) -> Result<Vec<Message>>;

    /// Create a new conversation
    async fn create_chat(&self, name: &str) -> Result<Chat>;

    /// Delete a conversation
    async fn delete_chat(&self, chat: &ChatId) -> Result<()>;

    /// Submit a user prompt; returns the stored user message
    ///
    /// The assistant reply arrives through the streaming side, never here.
    async fn send_prompt(&self, chat: &ChatId, text: &str) -> Result<Message>;

    /// Ask the backend to stop generating the current reply
    async fn cancel_generation(&self, chat: &ChatId) -> Result<()>;

    /// Establish the persistent streaming connection
    ///
    /// Idempotent once the connection is up.
    async fn connect(&self) -> Result<()>;

    /// Tear down the persistent streaming connection
    async fn disconnect(&self);

    /// Open one push subscription for a conversation
    ///
    /// The cursor carries the resume position; the backend replays from
    /// after it. Delivery near the boundary is at-least-once.
    async fn subscribe(&self, chat: &ChatId, cursor: &ResumeCursor) -> Result<Subscription>;

    /// Subscribe to connection lifecycle notifications
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn record(sender: &str, is_final: bool) -> FragmentRecord {
        FragmentRecord {
            id: "m-1".to_string(),
            sender: sender.to_string(),
            text: "hello ".to_string(),
            fragment_id: "f-1".to_string(),
            is_final,
        }
    }

    #[test]
    fn test_normalize_maps_known_senders() {
        let fragment = record("user", false).normalize();
        assert_eq!(fragment.sender, Sender::User);
        assert_eq!(fragment.id, MessageId::from("m-1"));
        assert_eq!(fragment.fragment_id, FragmentId::from("f-1"));
        assert!(!fragment.is_final);

        let fragment = record("assistant", true).normalize();
        assert_eq!(fragment.sender, Sender::Assistant);
        assert!(fragment.is_final);
    }

    #[test]
    fn test_normalize_defaults_unknown_sender_to_assistant() {
        let fragment = record("system?", false).normalize();
        assert_eq!(fragment.sender, Sender::Assistant);
    }

    #[test]
    fn test_fragment_record_is_final_defaults_false() {
        let json = r#"{"id":"m-9","sender":"assistant","text":"hi ","fragmentId":"f-3"}"#;
        let record: FragmentRecord = serde_json::from_str(json).unwrap();
        assert!(!record.is_final);
        assert_eq!(record.fragment_id, "f-3");
    }

    #[tokio::test]
    async fn test_subscription_yields_events_then_none_on_sender_drop() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscription = Subscription::new(rx, || {});

        tx.send(StreamEvent::Fragment(record("assistant", false)))
            .unwrap();
        tx.send(StreamEvent::Completed).unwrap();
        drop(tx);

        assert!(matches!(
            subscription.next_event().await,
            Some(StreamEvent::Fragment(_))
        ));
        assert_eq!(subscription.next_event().await, Some(StreamEvent::Completed));
        assert_eq!(subscription.next_event().await, None);
    }

    #[tokio::test]
    async fn test_dispose_runs_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        let (_tx, rx) = mpsc::unbounded_channel();
        let mut subscription = Subscription::new(rx, move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        subscription.dispose();
        subscription.dispose();
        drop(subscription);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_runs_disposer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        let (_tx, rx) = mpsc::unbounded_channel();
        let subscription = Subscription::new(rx, move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        drop(subscription);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
