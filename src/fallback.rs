//! Offline Fallback Data Source
//!
//! In-memory stand-in for the real backend. Whenever the backend is
//! unreachable (permanently offline, or a single request failed) the client
//! serves conversations from here so the interface keeps working.
//!
//! The store starts with two seeded conversations and answers every
//! operation without error. Streamed replies are a fixed sentence delivered
//! word by word with a configurable pacing delay, so the consuming side
//! exercises the same fragment plumbing as a live stream.
//!
//! # Thread Safety
//!
//! `FallbackDataSource` is cheaply cloneable; clones share one store behind
//! a `parking_lot::RwLock`. Mutations complete before the call returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::messages::{Chat, ChatId, FragmentId, Message, MessageFragment, MessageId, Sender};

/// The reply streamed for every prompt while offline
const CANNED_REPLY: &str = "I'm operating in offline mode right now. This is a simulated \
                            response to demonstrate the streaming functionality. The actual \
                            AI responses will be available when the connection to the API is \
                            restored.";

/// Default pacing between canned reply words
const DEFAULT_WORD_DELAY: Duration = Duration::from_millis(100);

/// First id handed out for canned replies; ids look like `mock-100`
const FIRST_REPLY_ID: u64 = 100;

#[derive(Debug)]
struct Store {
    chats: Vec<Chat>,
    messages: HashMap<ChatId, Vec<Message>>,
}

impl Store {
    fn seeded() -> Self {
        let chats = vec![
            Chat::new("1", "Getting Started"),
            Chat::new("2", "Sample Conversation"),
        ];

        let mut messages = HashMap::new();
        messages.insert(
            ChatId::from("1"),
            vec![
                Message::new(
                    "1-1",
                    Sender::Assistant,
                    "Hello! I'm running in offline mode. How can I help you today?",
                ),
                Message::new("1-2", Sender::User, "What can you do?"),
                Message::new(
                    "1-3",
                    Sender::Assistant,
                    "I'm currently in offline mode, but I can show you how the interface \
                     works. You can send messages, and I'll respond with pre-defined \
                     responses to demonstrate the chat functionality.",
                ),
            ],
        );
        messages.insert(
            ChatId::from("2"),
            vec![
                Message::new("2-1", Sender::User, "Tell me about offline mode"),
                Message::new(
                    "2-2",
                    Sender::Assistant,
                    "This is a demonstration of the offline mode. When the API is \
                     unavailable, the chat interface continues to work with mock data to \
                     ensure a smooth user experience.",
                ),
            ],
        );

        Self { chats, messages }
    }
}

/// In-memory chat store plus canned reply streamer
#[derive(Clone, Debug)]
pub struct FallbackDataSource {
    store: Arc<RwLock<Store>>,
    /// Counter behind canned reply message ids, shared across clones
    next_reply_id: Arc<AtomicU64>,
    word_delay: Duration,
}

impl Default for FallbackDataSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackDataSource {
    /// Create a seeded store with the default word pacing
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::seeded())),
            next_reply_id: Arc::new(AtomicU64::new(FIRST_REPLY_ID)),
            word_delay: DEFAULT_WORD_DELAY,
        }
    }

    /// Set the pacing delay between canned reply words
    #[must_use]
    pub fn with_word_delay(mut self, delay: Duration) -> Self {
        self.word_delay = delay;
        self
    }

    /// List all conversations, seeds first, then creations in order
    #[must_use]
    pub fn list_chats(&self) -> Vec<Chat> {
        self.store.read().chats.clone()
    }

    /// Message history of one conversation; empty for an unknown id
    #[must_use]
    pub fn history(&self, chat: &ChatId) -> Vec<Message> {
        self.store
            .read()
            .messages
            .get(chat)
            .cloned()
            .unwrap_or_default()
    }

    /// Create a conversation with a wall-clock id and empty history
    pub fn create_chat(&self, name: &str) -> Chat {
        let chat = Chat::new(wall_clock_id(), name);
        let mut store = self.store.write();
        store.chats.push(chat.clone());
        store.messages.insert(chat.id.clone(), Vec::new());
        chat
    }

    /// Append a user message; an unknown conversation gets a fresh entry
    pub fn send_prompt(&self, chat: &ChatId, text: &str) -> Message {
        let message = Message::new(wall_clock_id(), Sender::User, text);
        self.store
            .write()
            .messages
            .entry(chat.clone())
            .or_default()
            .push(message.clone());
        message
    }

    /// Remove a conversation and its history; unknown ids are a no-op
    pub fn delete_chat(&self, chat: &ChatId) {
        let mut store = self.store.write();
        store.chats.retain(|c| &c.id != chat);
        store.messages.remove(chat);
    }

    /// Nothing generates while offline, so there is nothing to stop
    pub fn cancel_generation(&self, chat: &ChatId) {
        tracing::debug!(chat_id = %chat, "Cancel requested while offline; nothing to do");
    }

    /// Start a canned reply stream for a conversation
    ///
    /// Resume cursors are meaningless here; every stream delivers the full
    /// sentence from the start under a fresh message id.
    #[must_use]
    pub fn stream(&self, chat: &ChatId, cancel: CancellationToken) -> FallbackStream {
        let message_id = MessageId::from(format!(
            "mock-{}",
            self.next_reply_id.fetch_add(1, Ordering::Relaxed)
        ));
        tracing::debug!(chat_id = %chat, message_id = %message_id, "Starting canned reply stream");
        FallbackStream {
            message_id,
            words: CANNED_REPLY.split(' ').collect(),
            index: 0,
            word_delay: self.word_delay,
            cancel,
        }
    }
}

/// Milliseconds-since-epoch ids, matching the backend's `mock-` prefix
fn wall_clock_id() -> String {
    format!("mock-{}", chrono::Utc::now().timestamp_millis())
}

/// One in-flight canned reply
///
/// Yields one fragment per word of the sentence. The first fragment is
/// available immediately; each later one waits out the pacing delay. All
/// fragments share a single message id and only the last is final.
#[derive(Debug)]
pub struct FallbackStream {
    message_id: MessageId,
    words: Vec<&'static str>,
    index: usize,
    word_delay: Duration,
    cancel: CancellationToken,
}

impl FallbackStream {
    /// Next fragment, or `None` once the sentence ends or cancel fires
    ///
    /// After cancellation no further fragment is ever yielded, including
    /// ones that were already due.
    pub async fn next(&mut self) -> Option<MessageFragment> {
        if self.cancel.is_cancelled() || self.index >= self.words.len() {
            return None;
        }

        if self.index > 0 {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(self.word_delay) => {}
            }
        }

        let word = self.words[self.index];
        let fragment = MessageFragment {
            id: self.message_id.clone(),
            sender: Sender::Assistant,
            text: format!("{word} "),
            fragment_id: FragmentId::from(format!("{}-{}", self.message_id, self.index)),
            is_final: self.index == self.words.len() - 1,
        };
        self.index += 1;
        Some(fragment)
    }

    /// The message id shared by every fragment of this stream
    #[must_use]
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }
}
