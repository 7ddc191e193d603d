//! REST collaborator surface.
//!
//! Durable operations (history, sends, room lifecycle, read receipts, key
//! publication) go over request/response; the socket only carries live
//! fan-out. [`ChatApi`] is the seam the session talks through, implemented
//! over HTTP in production and in memory in tests.

use async_trait::async_trait;
use palaver_core::{ProvisionedKeys, SyncError};
use palaver_proto::{
    Attachment, Message, MessageBody, MessageId, MessageKind, Room, RoomId, Timestamp, UserId,
};

/// A message as handed to the backend for posting.
///
/// The server assigns the id and creation time; the draft carries
/// everything the client decides, including the expiry stamped from the
/// room's ephemeral policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    /// Target room.
    pub room_id: RoomId,
    /// Direct recipient, for rooms where the server wants it denormalized.
    pub recipient: Option<UserId>,
    /// Plaintext or encrypted body.
    pub body: MessageBody,
    /// Message kind.
    pub kind: MessageKind,
    /// Attached media.
    pub attachments: Vec<Attachment>,
    /// Expiry from the room's ephemeral policy; `None` for durable
    /// messages. System messages never carry one.
    pub expires_at: Option<Timestamp>,
}

/// Backend request/response surface used by the session.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Fetch the full room snapshot for the local user.
    async fn fetch_rooms(&self) -> Result<Vec<Room>, SyncError>;

    /// Fetch one history page, oldest-first.
    ///
    /// `before` pages backwards through history (the newest page when
    /// `None`); `after` fetches only messages newer than a cached id, used
    /// to fill the gap after a reconnect.
    async fn fetch_messages(
        &self,
        room_id: &RoomId,
        limit: usize,
        before: Option<&MessageId>,
        after: Option<&MessageId>,
    ) -> Result<Vec<Message>, SyncError>;

    /// Post a message. The response is the canonical stored message.
    async fn post_message(&self, draft: MessageDraft) -> Result<Message, SyncError>;

    /// Record that the local user read these messages.
    async fn mark_read(
        &self,
        room_id: &RoomId,
        message_ids: &[MessageId],
        read_at: Timestamp,
    ) -> Result<(), SyncError>;

    /// Create (or return the existing) one-to-one room with `peer`.
    async fn create_direct_room(&self, peer: &UserId) -> Result<Room, SyncError>;

    /// Create a named group room.
    async fn create_group_room(&self, name: &str, members: &[UserId])
    -> Result<Room, SyncError>;

    /// Create a room attached to a marketplace listing.
    async fn create_ad_room(
        &self,
        listing_ref: &str,
        seller: &UserId,
    ) -> Result<Room, SyncError>;

    /// Leave a room permanently.
    async fn leave_room(&self, room_id: &RoomId) -> Result<(), SyncError>;

    /// Publish freshly wrapped room keys for every participant.
    async fn publish_room_keys(
        &self,
        room_id: &RoomId,
        keys: &ProvisionedKeys,
    ) -> Result<(), SyncError>;

    /// Register the local user's public key so others can wrap for us.
    async fn register_public_key(&self, public_key: [u8; 32]) -> Result<(), SyncError>;
}
