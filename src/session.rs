//! Stream Session - Resumable Per-Conversation Reply Stream
//!
//! One `StreamSession` follows the assistant replies of a single
//! conversation across subscription drops and transport reconnects. The
//! caller pulls fragments with [`next`]; everything about keeping the
//! subscription alive happens behind that call.
//!
//! # Architecture
//!
//! ```text
//!            +-------------+   subscribe ok    +-----------+
//!   start -> | Subscribing | ----------------> | Streaming | --> fragments
//!            +-------------+                   +-----------+
//!                  ^   | subscribe err               | channel closed
//!                  |   v                             v (complete / drop /
//!            +-----------+      delay over           |  forced reconnect)
//!            | Retrying  | <-------------------------+
//!            +-----------+
//!
//!   cancellation wins every race and leads to the terminal Cancelled state
//! ```
//!
//! A background pump task owns the backend subscription: it normalizes each
//! record, advances the shared resume cursor at receipt time and writes into
//! the session's [`Channel`]. End of stream for any reason closes the
//! channel; the session then waits out the retry delay and resubscribes from
//! the cursor. Completion is not terminal, because the same conversation can
//! stream again after the next prompt.
//!
//! [`next`]: StreamSession::next

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{ChatBackend, StreamEvent, Subscription};
use crate::channel::Channel;
use crate::error::{ClientError, Result};
use crate::messages::{ChatId, MessageFragment, ResumeCursor};
use crate::stream_registry::StreamRegistry;

/// Default pause before a resubscribe attempt
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Observable lifecycle state of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// About to open (or reopening) the subscription
    Subscribing,
    /// A live subscription is delivering fragments
    Streaming,
    /// Waiting out the delay before the next subscribe attempt
    Retrying,
    /// Terminal; the caller cancelled
    Cancelled,
}

enum SessionState {
    Subscribing,
    Streaming {
        channel: Channel<MessageFragment>,
        pump: JoinHandle<()>,
    },
    Retrying,
    Cancelled,
}

/// A resumable reply stream for one conversation
///
/// Yields fragments until cancelled. Subscription failures and drops are
/// retried forever; the caller only ever sees fragments or, after
/// cancellation, `None`.
pub struct StreamSession<B> {
    chat: ChatId,
    backend: Arc<B>,
    registry: StreamRegistry,
    cancel: CancellationToken,
    retry_delay: Duration,
    /// Shared with the pump task, which advances it at receipt time
    cursor: Arc<RwLock<ResumeCursor>>,
    /// Channel registered but not yet streaming. Set only across the
    /// subscribe await, so `Drop` can back the registration out if the
    /// caller abandons `next` there.
    pending: Option<Channel<MessageFragment>>,
    state: SessionState,
}

impl<B: ChatBackend + 'static> StreamSession<B> {
    /// Start a session from a resume position
    ///
    /// Nothing happens until the first [`next`] call.
    ///
    /// [`next`]: StreamSession::next
    pub fn new(
        backend: Arc<B>,
        registry: StreamRegistry,
        chat: ChatId,
        cursor: ResumeCursor,
        cancel: CancellationToken,
        retry_delay: Duration,
    ) -> Self {
        Self {
            chat,
            backend,
            registry,
            cancel,
            retry_delay,
            cursor: Arc::new(RwLock::new(cursor)),
            pending: None,
            state: SessionState::Subscribing,
        }
    }

    /// The conversation this session follows
    #[must_use]
    pub fn chat(&self) -> &ChatId {
        &self.chat
    }

    /// Snapshot of the resume cursor
    ///
    /// Persist this to resume the conversation's stream later. The cursor
    /// advances as fragments are received, not as they are consumed.
    #[must_use]
    pub fn cursor(&self) -> ResumeCursor {
        self.cursor.read().clone()
    }

    /// Observable state of the session
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        match self.state {
            SessionState::Subscribing => SessionStatus::Subscribing,
            SessionState::Streaming { .. } => SessionStatus::Streaming,
            SessionState::Retrying => SessionStatus::Retrying,
            SessionState::Cancelled => SessionStatus::Cancelled,
        }
    }

    /// Pull the next fragment
    ///
    /// Suspends while the stream is quiet. Returns `None` only after
    /// cancellation; from then on every call returns `None` immediately.
    /// Fragments that were queued but not yet consumed when cancellation
    /// fired are discarded, never delivered late.
    pub async fn next(&mut self) -> Option<MessageFragment> {
        loop {
            match &self.state {
                SessionState::Cancelled => return None,

                SessionState::Subscribing => {
                    if self.cancel.is_cancelled() {
                        self.state = SessionState::Cancelled;
                        return None;
                    }
                    match self.open_stream().await {
                        Ok((channel, pump)) => {
                            self.state = SessionState::Streaming { channel, pump };
                        }
                        Err(e) if e.is_cancelled() => {
                            self.state = SessionState::Cancelled;
                            return None;
                        }
                        Err(e) => {
                            tracing::warn!(
                                chat_id = %self.chat,
                                error = %e,
                                "Subscribe failed; will retry"
                            );
                            self.state = SessionState::Retrying;
                        }
                    }
                }

                SessionState::Streaming { channel, pump } => {
                    let channel = channel.clone();
                    let pump = pump.abort_handle();
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => {
                            channel.close();
                            pump.abort();
                            self.registry.unregister(&self.chat);
                            self.state = SessionState::Cancelled;
                            return None;
                        }
                        fragment = channel.recv() => match fragment {
                            Some(fragment) => return Some(fragment),
                            None => {
                                pump.abort();
                                self.registry.unregister(&self.chat);
                                tracing::debug!(
                                    chat_id = %self.chat,
                                    "Reply stream ended; scheduling resubscribe"
                                );
                                self.state = SessionState::Retrying;
                            }
                        }
                    }
                }

                SessionState::Retrying => {
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => {
                            self.state = SessionState::Cancelled;
                            return None;
                        }
                        () = tokio::time::sleep(self.retry_delay) => {
                            self.state = SessionState::Subscribing;
                        }
                    }
                }
            }
        }
    }

    /// Open a fresh channel, register it and subscribe from the cursor
    ///
    /// Cancellation during the subscribe call surfaces as
    /// [`ClientError::Cancelled`] so the caller goes terminal instead of
    /// retrying. The channel sits in `pending` while the subscribe call is
    /// in flight; every way out of this function clears it.
    async fn open_stream(&mut self) -> Result<(Channel<MessageFragment>, JoinHandle<()>)> {
        let channel: Channel<MessageFragment> = Channel::new();
        self.registry.register(self.chat.clone(), channel.clone());
        self.pending = Some(channel.clone());

        let snapshot = self.cursor.read().clone();
        let subscription = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.pending = None;
                self.registry.unregister(&self.chat);
                return Err(ClientError::Cancelled);
            }
            result = self.backend.subscribe(&self.chat, &snapshot) => match result {
                Ok(subscription) => subscription,
                Err(e) => {
                    self.pending = None;
                    self.registry.unregister(&self.chat);
                    return Err(e);
                }
            }
        };
        self.pending = None;

        tracing::debug!(
            chat_id = %self.chat,
            resume_fragment = ?snapshot.last_fragment_id,
            "Subscribed to reply stream"
        );

        let pump = tokio::spawn(pump_events(
            subscription,
            channel.clone(),
            self.cursor.clone(),
            self.chat.clone(),
        ));
        Ok((channel, pump))
    }
}

impl<B> Drop for StreamSession<B> {
    fn drop(&mut self) {
        // A caller that timed out of `next` can drop the session while a
        // subscribe is still in flight; the attempt's channel is then in
        // `pending` and never made it into the Streaming state.
        if let Some(channel) = self.pending.take() {
            channel.close();
            self.registry.unregister_if_same(&self.chat, &channel);
        }
        if let SessionState::Streaming { channel, pump } =
            std::mem::replace(&mut self.state, SessionState::Cancelled)
        {
            channel.close();
            pump.abort();
            self.registry.unregister_if_same(&self.chat, &channel);
        }
    }
}

/// Move subscription events into the session's channel
///
/// Runs until the stream ends or the channel reports closed. The cursor is
/// advanced before the write so a fragment is never delivered ahead of the
/// resume position that covers it.
async fn pump_events(
    mut subscription: Subscription,
    channel: Channel<MessageFragment>,
    cursor: Arc<RwLock<ResumeCursor>>,
    chat: ChatId,
) {
    loop {
        match subscription.next_event().await {
            Some(StreamEvent::Fragment(record)) => {
                let fragment = record.normalize();
                cursor.write().observe(&fragment);
                if !channel.write(fragment) {
                    // Closed under us by cancel or forced reconnect
                    break;
                }
            }
            Some(StreamEvent::Completed) => {
                tracing::debug!(chat_id = %chat, "Reply stream completed");
                channel.close();
                break;
            }
            None => {
                tracing::warn!(chat_id = %chat, "Reply subscription dropped");
                channel.close();
                break;
            }
        }
    }
    // Dropping the subscription here releases the backend registration
}
