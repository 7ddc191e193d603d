//! Wire events and entity types for the Palaver chat sync core.
//!
//! This crate defines the logical shapes shared between the transport layer
//! and the sync state machines: room and message entities, and the tagged
//! [`WireEvent`] enum covering every event the socket carries.
//!
//! Events are encoded as CBOR. We chose CBOR over alternatives because it's
//! self-describing (field names embedded), compact, and doesn't need code
//! generation. This is deliberately not a binary framing spec - the concrete
//! socket below these events is an external collaborator.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod event;
mod types;

pub use error::ProtoError;
pub use event::{EventKind, TypingIndicator, WireEvent};
pub use types::{
    Attachment, EphemeralPolicy, Message, MessageBody, MessageId, MessageKind, Participant, Role,
    Room, RoomId, RoomKind, Timestamp, UserId, WrappedRoomKey,
};
