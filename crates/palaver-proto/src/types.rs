//! Room and message entity types.
//!
//! These mirror the shapes the REST collaborator returns and the socket
//! carries. The backend historically exposed two incompatible message shapes
//! (`id` vs `_id`, object vs string sender); this crate normalizes on one
//! canonical [`Message`] with a plain [`UserId`] sender.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// The identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

id_newtype!(
    /// Stable room identifier.
    RoomId
);
id_newtype!(
    /// Stable user identifier.
    UserId
);
id_newtype!(
    /// Stable message identifier. Also used as the pagination cursor.
    MessageId
);

/// Milliseconds since the Unix epoch (UTC).
///
/// Matches the JSON timestamps the backend produces. Wall-clock time is used
/// only for display ordering and expiry checks, never for cryptography.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Construct from milliseconds since the Unix epoch.
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the Unix epoch.
    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// The timestamp shifted forward by `duration`.
    pub fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_millis() as i64))
    }

    /// Duration until `later`, or `None` if `later` is not in the future.
    pub fn until(self, later: Self) -> Option<Duration> {
        let delta = later.0.checked_sub(self.0)?;
        (delta > 0).then(|| Duration::from_millis(delta as u64))
    }
}

/// What kind of conversation a room is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoomKind {
    /// One-to-one conversation.
    Direct,
    /// Multi-party conversation.
    Group,
    /// Conversation attached to a listing.
    AdLinked,
}

/// Participant role within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Can change room settings and membership.
    Admin,
    /// Regular member.
    Member,
}

/// A room key encrypted under one participant's public key.
///
/// This is the only form of a room key that is safe to transmit or cache.
/// The unwrapped symmetric key exists only in process memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedRoomKey {
    /// Encryption version this wrapped copy belongs to.
    pub version: u32,
    /// Sender's ephemeral X25519 public key for the wrap.
    pub ephemeral_public: [u8; 32],
    /// Nonce used for the wrapping AEAD.
    pub nonce: [u8; 24],
    /// Wrapped key material including the authentication tag.
    pub ciphertext: Vec<u8>,
}

/// One member of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// The participant's user id.
    pub user: UserId,
    /// Role within the room.
    pub role: Role,
    /// When the participant joined.
    pub joined_at: Timestamp,
    /// Last time the participant marked the room read. `None` if never.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_read_at: Option<Timestamp>,
    /// X25519 public key for room-key wrapping. `None` if not registered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<[u8; 32]>,
    /// Room key wrapped for this participant. `None` for plaintext rooms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapped_room_key: Option<WrappedRoomKey>,
    /// Whether the participant is currently online.
    #[serde(default)]
    pub online: bool,
}

/// Time-limited message policy for a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EphemeralPolicy {
    /// Whether new messages receive an expiry.
    pub enabled: bool,
    /// Time-to-live stamped on new messages, in milliseconds.
    pub default_ttl_ms: u64,
}

impl EphemeralPolicy {
    /// The TTL as a [`Duration`].
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

/// Message content, plaintext or encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageBody {
    /// Unencrypted text.
    Plaintext(String),
    /// Ciphertext for an encrypted room.
    Encrypted {
        /// Room encryption version the key belongs to.
        version: u32,
        /// 24-byte XChaCha20 nonce (the IV).
        nonce: [u8; 24],
        /// Ciphertext with the 16-byte Poly1305 tag appended.
        ciphertext: Vec<u8>,
    },
}

/// High-level message category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Regular user text.
    Text,
    /// Image attachment message.
    Image,
    /// Video attachment message.
    Video,
    /// Generic file attachment message.
    File,
    /// Server-generated notice. Exempt from ephemeral expiry.
    System,
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Attachment category.
    pub kind: MessageKind,
    /// Download URL, or a ciphertext reference for encrypted rooms.
    pub url: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME type.
    pub mime: String,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id.
    pub id: MessageId,
    /// Room this message belongs to.
    pub room_id: RoomId,
    /// Sending user.
    pub sender: UserId,
    /// Explicit recipient, set for direct rooms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<UserId>,
    /// Message content.
    pub body: MessageBody,
    /// Message category.
    pub kind: MessageKind,
    /// Attached files, oldest-first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Whether the local user has read this message.
    #[serde(default)]
    pub read: bool,
    /// When the message was read. `None` while unread.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<Timestamp>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Expiry time for disappearing messages. `None` for permanent messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
}

impl Message {
    /// Whether the message has passed its expiry time.
    ///
    /// System messages never expire, even in rooms with an ephemeral policy.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.kind != MessageKind::System && self.expires_at.is_some_and(|at| now >= at)
    }
}

/// A conversation and its denormalized list metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Stable room id.
    pub id: RoomId,
    /// Conversation kind.
    pub kind: RoomKind,
    /// Display name. `None` for direct rooms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Members, in join order. Never empty.
    pub participants: Vec<Participant>,
    /// Whether message bodies are end-to-end encrypted.
    #[serde(default)]
    pub encryption_enabled: bool,
    /// Monotonic key version, bumped on every rekey.
    #[serde(default)]
    pub encryption_version: u32,
    /// Disappearing-message policy.
    #[serde(default)]
    pub ephemeral: EphemeralPolicy,
    /// Most recent message, for list sorting and previews.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    /// Time of the most recent activity.
    pub last_activity: Timestamp,
    /// Unread messages for the viewing user.
    #[serde(default)]
    pub unread_count: u32,
}

impl Room {
    /// Find a participant by user id.
    pub fn participant(&self, user: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.user == user)
    }

    /// Find a participant by user id, mutably.
    pub fn participant_mut(&mut self, user: &UserId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| &p.user == user)
    }
}
