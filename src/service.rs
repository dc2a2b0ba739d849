//! Chat Service - Resilient Facade over Live and Fallback Operation
//!
//! The one entry point consumers hold. Every operation succeeds from the
//! caller's point of view: when the backend cannot serve a call, the
//! fallback source answers instead and the failure is only logged.
//!
//! # Routing Rules
//!
//! - Once the offline latch has fired, everything goes straight to the
//!   fallback source without touching the network.
//! - Otherwise REST calls try the backend and, on any error, serve the
//!   fallback equivalent for that single call. The failure changes no
//!   global state.
//! - Reply streaming probes first (it is the only path that does): a live
//!   backend gets a resumable [`StreamSession`], anything else gets the
//!   canned fallback stream.
//!
//! Construct one service per backend endpoint and call [`shutdown`] when
//! done with it; there is no implicit global instance.
//!
//! [`shutdown`]: ChatService::shutdown

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::backend::ChatBackend;
#[cfg(feature = "websocket")]
use crate::backend::RemoteBackend;
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::fallback::{FallbackDataSource, FallbackStream};
use crate::messages::{Chat, ChatId, Message, MessageFragment, ResumeCursor};
use crate::session::StreamSession;
use crate::stream_registry::StreamRegistry;

/// Resilient chat client over one backend endpoint
pub struct ChatService<B> {
    manager: ConnectionManager<B>,
    fallback: FallbackDataSource,
    config: ClientConfig,
}

#[cfg(feature = "websocket")]
impl ChatService<RemoteBackend> {
    /// Build a service over the HTTP/WebSocket backend in the config
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let backend = RemoteBackend::new(&config);
        Self::with_backend(config, backend)
    }
}

impl<B: ChatBackend + 'static> ChatService<B> {
    /// Build a service over any backend implementation
    #[must_use]
    pub fn with_backend(config: ClientConfig, backend: B) -> Self {
        let registry = StreamRegistry::new();
        let manager = ConnectionManager::new(Arc::new(backend), registry);
        let fallback = FallbackDataSource::new().with_word_delay(config.fallback_word_delay);
        Self {
            manager,
            fallback,
            config,
        }
    }

    /// Whether the service has latched into offline operation
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.manager.is_offline()
    }

    /// Lifecycle state of the streaming connection
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// The configuration this service was built with
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The backend this service talks to
    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        self.manager.backend()
    }

    /// List all conversations
    pub async fn list_chats(&self) -> Vec<Chat> {
        if !self.manager.is_offline() {
            match self.manager.backend().list_chats().await {
                Ok(chats) => return chats,
                Err(e) => {
                    tracing::warn!(error = %e, "Listing chats failed; serving fallback for this call");
                }
            }
        }
        self.fallback.list_chats()
    }

    /// Full message history of one conversation
    pub async fn history(&self, chat: &ChatId) -> Vec<Message> {
        if !self.manager.is_offline() {
            match self.manager.backend().history(chat).await {
                Ok(messages) => return messages,
                Err(e) => {
                    tracing::warn!(
                        chat_id = %chat,
                        error = %e,
                        "Fetching history failed; serving fallback for this call"
                    );
                }
            }
        }
        self.fallback.history(chat)
    }

    /// Create a conversation
    pub async fn create_chat(&self, name: &str) -> Chat {
        if !self.manager.is_offline() {
            match self.manager.backend().create_chat(name).await {
                Ok(chat) => return chat,
                Err(e) => {
                    tracing::warn!(error = %e, "Creating chat failed; serving fallback for this call");
                }
            }
        }
        self.fallback.create_chat(name)
    }

    /// Delete a conversation
    pub async fn delete_chat(&self, chat: &ChatId) {
        if !self.manager.is_offline() {
            match self.manager.backend().delete_chat(chat).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(
                        chat_id = %chat,
                        error = %e,
                        "Deleting chat failed; serving fallback for this call"
                    );
                }
            }
        }
        self.fallback.delete_chat(chat);
    }

    /// Submit a user prompt; returns the stored user message
    ///
    /// The assistant reply arrives through [`stream_replies`], never here.
    ///
    /// [`stream_replies`]: ChatService::stream_replies
    pub async fn send_prompt(&self, chat: &ChatId, text: &str) -> Message {
        if !self.manager.is_offline() {
            match self.manager.backend().send_prompt(chat, text).await {
                Ok(message) => return message,
                Err(e) => {
                    tracing::warn!(
                        chat_id = %chat,
                        error = %e,
                        "Sending prompt failed; serving fallback for this call"
                    );
                }
            }
        }
        self.fallback.send_prompt(chat, text)
    }

    /// Ask the backend to stop generating the current reply
    pub async fn cancel_generation(&self, chat: &ChatId) {
        if !self.manager.is_offline() {
            match self.manager.backend().cancel_generation(chat).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(
                        chat_id = %chat,
                        error = %e,
                        "Cancelling generation failed; nothing to do for this call"
                    );
                }
            }
        }
        self.fallback.cancel_generation(chat);
    }

    /// Open the reply stream for a conversation
    ///
    /// Probes liveness and makes sure the streaming connection is up on
    /// every call. A live backend yields a resumable session that runs
    /// until cancelled; otherwise the canned fallback stream serves this
    /// call (a finite sequence).
    pub async fn stream_replies(
        &self,
        chat: &ChatId,
        resume: Option<ResumeCursor>,
        cancel: CancellationToken,
    ) -> ReplyStream<B> {
        if !self.manager.is_offline() {
            match self.manager.ensure_initialized().await {
                Ok(()) => {
                    let session = StreamSession::new(
                        self.manager.backend().clone(),
                        self.manager.registry().clone(),
                        chat.clone(),
                        resume.unwrap_or_default(),
                        cancel,
                        self.config.resubscribe_delay,
                    );
                    return ReplyStream::Live(session);
                }
                Err(e) => {
                    tracing::warn!(
                        chat_id = %chat,
                        error = %e,
                        "Live streaming unavailable; serving canned reply"
                    );
                }
            }
        }
        ReplyStream::Fallback(self.fallback.stream(chat, cancel))
    }

    /// Tear down the streaming connection and every live reply stream
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}

/// A reply fragment sequence, live or canned
///
/// Live sequences are infinite until cancelled; fallback sequences end with
/// the canned sentence.
pub enum ReplyStream<B> {
    /// Resumable stream session against the live backend
    Live(StreamSession<B>),
    /// Canned word-by-word reply from the fallback source
    Fallback(FallbackStream),
}

impl<B: ChatBackend + 'static> ReplyStream<B> {
    /// Pull the next fragment; `None` means the sequence is over
    pub async fn next(&mut self) -> Option<MessageFragment> {
        match self {
            ReplyStream::Live(session) => session.next().await,
            ReplyStream::Fallback(stream) => stream.next().await,
        }
    }

    /// Whether this sequence rides a live subscription
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, ReplyStream::Live(_))
    }

    /// Resume cursor snapshot; `None` for fallback sequences
    #[must_use]
    pub fn cursor(&self) -> Option<ResumeCursor> {
        match self {
            ReplyStream::Live(session) => Some(session.cursor()),
            ReplyStream::Fallback(_) => None,
        }
    }
}
