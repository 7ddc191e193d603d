//! Error taxonomy for the sync core.
//!
//! Connectivity faults (`Transport`) are absorbed and retried by the
//! transport layer; data faults (`KeyNotFound`, failed sends) are always
//! returned to the caller rather than silently dropped, because losing a
//! user's message or showing wrong content is worse than an explicit error
//! state.

use palaver_crypto::CryptoError;
use palaver_proto::{RoomId, UserId};
use thiserror::Error;

/// Errors surfaced by the sync core and its async layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Connection lost or unreachable. Recovered by automatic reconnect;
    /// surfaced as a degraded connection state, not fatal to callers.
    #[error("transport error: {reason}")]
    Transport {
        /// What failed.
        reason: String,
    },

    /// Publish attempted while offline. Callers decide whether to queue
    /// or drop.
    #[error("not connected")]
    NotConnected,

    /// Handshake rejected. Fatal; requires re-authentication upstream.
    #[error("authentication rejected: {reason}")]
    Auth {
        /// Rejection reason from the server.
        reason: String,
    },

    /// No local room key for this version. Non-fatal; the message renders
    /// as an undecryptable placeholder.
    #[error("no room key for room {room_id} at version {version}")]
    KeyNotFound {
        /// Room the key was missing for.
        room_id: RoomId,
        /// Encryption version requested.
        version: u32,
    },

    /// An event referenced a room the local snapshot doesn't know. Triggers
    /// a background resync, invisible to the caller.
    #[error("unknown room {room_id}, snapshot is stale")]
    StaleRoom {
        /// The unknown room.
        room_id: RoomId,
    },

    /// A participant has no registered public key, so a room key cannot be
    /// wrapped for them.
    #[error("participant {user} has no registered public key")]
    MissingPublicKey {
        /// The participant without a key.
        user: UserId,
    },

    /// The REST collaborator failed.
    #[error("api error: {reason}")]
    Api {
        /// What failed.
        reason: String,
    },

    /// A cryptographic operation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
