//! Palaver Core - Resilient Chat Client over an Unreliable Backend
//!
//! This crate provides the streaming and session layer of a chat client,
//! completely independent of any UI framework. Every operation answers from
//! the caller's point of view: when the backend is down, a seeded offline
//! data source serves the call instead, and reply streams survive drops by
//! re-subscribing from a resume cursor.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Application                              │
//! │              (TUI, web view, tests, automation)                  │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │
//! ┌────────────────────────────┼────────────────────────────────────┐
//! │                       ChatService                                │
//! │  ┌──────────────┐  ┌───────────────┐  ┌──────────────────────┐  │
//! │  │  Connection  │  │ StreamSession │  │ FallbackDataSource   │  │
//! │  │  Manager     │  │  (per chat)   │  │ (seeded, offline)    │  │
//! │  └──────┬───────┘  └───────┬───────┘  └──────────────────────┘  │
//! │         │   StreamRegistry │                                    │
//! │         └────────┬─────────┘                                    │
//! └──────────────────┼──────────────────────────────────────────────┘
//!                    │
//!             ChatBackend trait
//!                    │
//!         ┌──────────┴──────────────┐
//!         │      RemoteBackend      │
//!         │  REST + WebSocket hub   │
//!         └─────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ChatService`]: The resilient facade applications hold
//! - [`StreamSession`]: Caller-driven reply stream that resumes after drops
//! - [`ResumeCursor`]: Persistable position within a reply stream
//! - [`ConnectionManager`]: Liveness probing and the one-way offline latch
//! - [`FallbackDataSource`]: Seeded offline chats and the canned reply
//! - [`ChatBackend`]: Transport boundary; [`RemoteBackend`] is the real one
//!
//! # Quick Start
//!
//! ```ignore
//! use palaver_core::{ChatService, ClientConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ClientConfig::load().unwrap_or_default();
//!     let service = ChatService::new(config);
//!
//!     // REST: never fails, served live or from the fallback source
//!     let chats = service.list_chats().await;
//!     service.send_prompt(&chats[0].id, "hello").await;
//!
//!     // Streaming: survives connection drops, resumes from its cursor
//!     let cancel = CancellationToken::new();
//!     let mut replies = service
//!         .stream_replies(&chats[0].id, None, cancel.clone())
//!         .await;
//!     while let Some(fragment) = replies.next().await {
//!         print!("{}", fragment.text);
//!     }
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Transport boundary and the HTTP/WebSocket implementation
//! - [`channel`]: Closable in-process fragment channel
//! - [`config`]: Client configuration (file, env, builders)
//! - [`connection`]: Connection lifecycle and the offline latch
//! - [`error`]: Error taxonomy of the client
//! - [`fallback`]: Seeded offline data source
//! - [`messages`]: Chat domain model (chats, messages, fragments, cursors)
//! - [`service`]: The `ChatService` facade
//! - [`session`]: Resumable per-chat stream sessions
//! - [`stream_registry`]: Registry of in-flight stream channels
//!
//! # No UI Dependencies
//!
//! This crate has **zero** dependencies on any rendering or UI framework.
//! It's pure client logic that can sit under a TUI, a web view, or a test
//! harness.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod fallback;
pub mod messages;
pub mod service;
pub mod session;
pub mod stream_registry;

// Re-exports for convenience
pub use backend::{ChatBackend, ConnectionEvent, FragmentRecord, StreamEvent, Subscription};
#[cfg(feature = "websocket")]
pub use backend::RemoteBackend;
pub use channel::Channel;
pub use config::{default_config_path, ClientConfig, ClientToml, ConfigError};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{ClientError, Result};
pub use fallback::{FallbackDataSource, FallbackStream};
pub use messages::{
    Chat, ChatId, FragmentId, Message, MessageFragment, MessageId, ResumeCursor, Sender,
};
pub use service::{ChatService, ReplyStream};
pub use session::{SessionStatus, StreamSession};
pub use stream_registry::StreamRegistry;
