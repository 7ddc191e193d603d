//! Socket events.
//!
//! [`WireEvent`] covers everything the bidirectional socket carries, in both
//! directions. The serialized form tags each event with its logical name
//! (`chat:message`, `user:status`, ...) so a transport can route by name
//! without decoding the payload.

use serde::{Deserialize, Serialize};

use crate::{
    error::ProtoError,
    types::{Message, RoomId, Timestamp, UserId},
};

/// Logical event names, used for subscription routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Client handshake with an auth token.
    Auth,
    /// Server accepted the handshake.
    AuthAck,
    /// Server rejected the handshake.
    AuthRejected,
    /// New chat message.
    Message,
    /// Typing indicator change.
    Typing,
    /// A user joined a room channel.
    UserJoined,
    /// A user left a room channel.
    UserLeft,
    /// Online/offline status change.
    Status,
    /// Messages in a room were read on some device.
    Read,
    /// Client joins a room channel for live routing.
    Join,
    /// Client leaves a room channel.
    Leave,
}

impl EventKind {
    /// Every event kind, for subscription routing tables.
    pub const ALL: [Self; 11] = [
        Self::Auth,
        Self::AuthAck,
        Self::AuthRejected,
        Self::Message,
        Self::Typing,
        Self::UserJoined,
        Self::UserLeft,
        Self::Status,
        Self::Read,
        Self::Join,
        Self::Leave,
    ];

    /// The wire name for this event.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::AuthAck => "auth-ack",
            Self::AuthRejected => "auth-rejected",
            Self::Message => "chat:message",
            Self::Typing => "chat:typing",
            Self::UserJoined => "chat:user-joined",
            Self::UserLeft => "chat:user-left",
            Self::Status => "user:status",
            Self::Read => "notification:read",
            Self::Join => "chat:join",
            Self::Leave => "chat:leave",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ephemeral typing state for one user in one room. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingIndicator {
    /// Room the indicator applies to.
    pub room_id: RoomId,
    /// The typing (or no-longer-typing) user.
    pub user: UserId,
    /// `true` while the user is composing.
    pub typing: bool,
}

/// Every event the socket carries.
///
/// # Invariants
///
/// - Each variant maps to exactly one [`EventKind`] (enforced by the
///   exhaustive match in [`WireEvent::kind`]).
/// - Round-trip encoding must produce an equivalent value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum WireEvent {
    /// Client handshake. First event on every (re)connected socket.
    #[serde(rename = "auth")]
    Auth {
        /// Session token from the identity provider.
        token: String,
    },

    /// Handshake accepted.
    #[serde(rename = "auth-ack")]
    AuthAck {
        /// The authenticated user id, as the server resolved it.
        user: UserId,
    },

    /// Handshake rejected. The server closes the socket after sending this.
    #[serde(rename = "auth-rejected")]
    AuthRejected {
        /// Human-readable rejection reason.
        reason: String,
    },

    /// New chat message.
    #[serde(rename = "chat:message")]
    Message(Message),

    /// Typing indicator change.
    #[serde(rename = "chat:typing")]
    Typing(TypingIndicator),

    /// A user joined a room channel.
    #[serde(rename = "chat:user-joined")]
    UserJoined {
        /// Room that was joined.
        room_id: RoomId,
        /// Joining user.
        user: UserId,
    },

    /// A user left a room channel.
    #[serde(rename = "chat:user-left")]
    UserLeft {
        /// Room that was left.
        room_id: RoomId,
        /// Leaving user.
        user: UserId,
    },

    /// Online/offline status change for a user.
    #[serde(rename = "user:status")]
    Status {
        /// The user whose status changed.
        user: UserId,
        /// `true` when the user came online.
        online: bool,
    },

    /// Messages in a room were read, possibly on another device.
    #[serde(rename = "notification:read")]
    Read {
        /// Room that was read.
        room_id: RoomId,
        /// Reading user.
        user: UserId,
        /// When the read happened.
        read_at: Timestamp,
    },

    /// Join a room channel so the server routes its live events here.
    #[serde(rename = "chat:join")]
    Join {
        /// Room to join.
        room_id: RoomId,
    },

    /// Leave a room channel.
    #[serde(rename = "chat:leave")]
    Leave {
        /// Room to leave.
        room_id: RoomId,
    },
}

impl WireEvent {
    /// The logical event name for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Auth { .. } => EventKind::Auth,
            Self::AuthAck { .. } => EventKind::AuthAck,
            Self::AuthRejected { .. } => EventKind::AuthRejected,
            Self::Message(_) => EventKind::Message,
            Self::Typing(_) => EventKind::Typing,
            Self::UserJoined { .. } => EventKind::UserJoined,
            Self::UserLeft { .. } => EventKind::UserLeft,
            Self::Status { .. } => EventKind::Status,
            Self::Read { .. } => EventKind::Read,
            Self::Join { .. } => EventKind::Join,
            Self::Leave { .. } => EventKind::Leave,
        }
    }

    /// Encode as CBOR.
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| ProtoError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        ciborium::from_reader(bytes).map_err(|e| ProtoError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{MessageBody, MessageKind};

    use super::*;

    #[test]
    fn event_names_match_wire_protocol() {
        assert_eq!(EventKind::Message.as_str(), "chat:message");
        assert_eq!(EventKind::Typing.as_str(), "chat:typing");
        assert_eq!(EventKind::UserJoined.as_str(), "chat:user-joined");
        assert_eq!(EventKind::UserLeft.as_str(), "chat:user-left");
        assert_eq!(EventKind::Status.as_str(), "user:status");
        assert_eq!(EventKind::Read.as_str(), "notification:read");
    }

    #[test]
    fn typing_event_round_trips() {
        let event = WireEvent::Typing(TypingIndicator {
            room_id: "r1".into(),
            user: "u2".into(),
            typing: true,
        });

        let bytes = event.encode().unwrap();
        let decoded = WireEvent::decode(&bytes).unwrap();

        assert_eq!(decoded, event);
        assert_eq!(decoded.kind(), EventKind::Typing);
    }

    #[test]
    fn message_event_round_trips_with_encrypted_body() {
        let event = WireEvent::Message(Message {
            id: "m1".into(),
            room_id: "r1".into(),
            sender: "u1".into(),
            recipient: Some("u2".into()),
            body: MessageBody::Encrypted {
                version: 3,
                nonce: [7u8; 24],
                ciphertext: vec![1, 2, 3, 4],
            },
            kind: MessageKind::Text,
            attachments: Vec::new(),
            read: false,
            read_at: None,
            created_at: Timestamp::from_millis(1_700_000_000_000),
            expires_at: Some(Timestamp::from_millis(1_700_000_060_000)),
        });

        let bytes = event.encode().unwrap();
        assert_eq!(WireEvent::decode(&bytes).unwrap(), event);
    }

    #[test]
    fn truncated_input_fails_decode() {
        let event = WireEvent::Join { room_id: "r9".into() };
        let bytes = event.encode().unwrap();
        assert!(WireEvent::decode(&bytes[..bytes.len() / 2]).is_err());
    }
}
