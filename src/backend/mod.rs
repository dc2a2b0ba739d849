//! Chat Backend Abstraction
//!
//! This module defines the transport boundary the rest of the crate talks
//! through, plus the default HTTP/WebSocket implementation.
//!
//! # Available Backends
//!
//! - **`RemoteBackend`**: REST + WebSocket hub against a real server
//!   (behind the default-on `websocket` feature)
//! - Anything else that implements [`ChatBackend`] (tests use scripted
//!   in-memory doubles)
//!
//! # Usage
//!
//! ```ignore
//! use palaver_core::backend::{ChatBackend, RemoteBackend};
//!
//! let backend = RemoteBackend::new(&config);
//! backend.connect().await?;
//! let subscription = backend.subscribe(&chat, &cursor).await?;
//! ```

#[cfg(feature = "websocket")]
mod remote;
mod traits;
#[cfg(feature = "websocket")]
pub mod wire;

#[cfg(feature = "websocket")]
pub use remote::RemoteBackend;
pub use traits::{ChatBackend, ConnectionEvent, FragmentRecord, StreamEvent, Subscription};
