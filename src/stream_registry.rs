//! Stream Registry - Live Reply Channel Table
//!
//! Tracks, per conversation, the [`Channel`] its stream session is
//! currently reading from. The registry exists so connection recovery can
//! reach into every live stream at once: after a reconnect, force-closing
//! all registered channels makes each session observe end-of-stream and
//! resubscribe from its cursor.
//!
//! # Thread Safety
//!
//! `StreamRegistry` is cheaply cloneable; clones share one table behind a
//! `parking_lot::RwLock`. Lock hold times are bounded to map operations.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::channel::Channel;
use crate::messages::{ChatId, MessageFragment};

/// Shared table of per-conversation delivery channels
#[derive(Clone, Default)]
pub struct StreamRegistry {
    channels: Arc<RwLock<HashMap<ChatId, Channel<MessageFragment>>>>,
}

impl StreamRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the delivery channel for a conversation
    ///
    /// Replaces any previous channel for the same conversation. The
    /// replaced channel is not closed here; its session tears it down.
    pub fn register(&self, chat: ChatId, channel: Channel<MessageFragment>) {
        tracing::debug!(chat_id = %chat, "Registered reply stream");
        self.channels.write().insert(chat, channel);
    }

    /// Remove a conversation's channel, returning it if one was registered
    pub fn unregister(&self, chat: &ChatId) -> Option<Channel<MessageFragment>> {
        let removed = self.channels.write().remove(chat);
        if removed.is_some() {
            tracing::debug!(chat_id = %chat, "Unregistered reply stream");
        }
        removed
    }

    /// Remove a conversation's entry only if it still holds this channel
    ///
    /// For backing out a registration whose owner no longer knows it is
    /// current: a replacement registered for the same conversation in the
    /// meantime stays put. Returns whether an entry was removed.
    pub fn unregister_if_same(&self, chat: &ChatId, channel: &Channel<MessageFragment>) -> bool {
        let mut channels = self.channels.write();
        match channels.get(chat) {
            Some(current) if current.same_channel(channel) => {
                channels.remove(chat);
                tracing::debug!(chat_id = %chat, "Unregistered reply stream");
                true
            }
            _ => false,
        }
    }

    /// Look up the channel registered for a conversation
    #[must_use]
    pub fn get(&self, chat: &ChatId) -> Option<Channel<MessageFragment>> {
        self.channels.read().get(chat).cloned()
    }

    /// Force-close every registered channel and clear the table
    ///
    /// Returns how many channels this call actually transitioned to
    /// closed. Channels that were already closed do not count.
    pub fn close_all(&self) -> usize {
        let drained: Vec<(ChatId, Channel<MessageFragment>)> =
            self.channels.write().drain().collect();

        let mut closed = 0;
        for (chat, channel) in drained {
            if channel.close() {
                closed += 1;
                tracing::debug!(chat_id = %chat, "Force-closed reply stream");
            }
        }
        closed
    }

    /// Number of registered conversations
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    /// Whether no conversation is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}
