//! Async sync client for the Palaver chat core.
//!
//! Wires the sans-IO state machines from `palaver-core` to real I/O:
//!
//! - [`TransportClient`]: socket with auth handshake, automatic reconnect,
//!   and per-kind event fan-out
//! - [`ChatApi`]: REST seam for durable operations
//! - [`Session`]: single-task orchestrator that owns all mutable sync state
//!   and publishes derived views on watch channels
//! - [`NotificationBridge`]: filters inbound messages into OS notifications
//!
//! # Concurrency
//!
//! One session task owns all state; everything else communicates through
//! channels. Watch channels carry current-value views (room list, active
//! timeline), broadcast channels carry per-event streams.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod notify;
mod rest;
mod session;
mod transport;

pub use notify::{Notification, NotificationBridge, NotificationSink};
pub use rest::{ChatApi, MessageDraft};
pub use session::Session;
pub use transport::{ConnectionState, Socket, SocketConnector, TransportClient, TransportError};
