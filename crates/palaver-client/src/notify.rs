//! Desktop/mobile notification bridge.
//!
//! Decides which inbound messages deserve an OS notification and builds
//! the preview text. Suppression rules:
//!
//! - never notify for the local user's own messages (echoes from other
//!   devices included)
//! - never notify for the room currently on screen
//!
//! Encrypted bodies are decrypted for the preview only when the key is
//! available; otherwise a generic preview is shown rather than nothing,
//! so the user still learns a message arrived.

use palaver_core::{KeyManager, RoomDirectory};
use palaver_proto::{Message, MessageKind, RoomId, UserId};
use tracing::debug;

/// One notification ready for the OS layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Room the message belongs to; tapping the notification opens it.
    pub room_id: RoomId,
    /// Sender, shown as the notification title.
    pub sender: UserId,
    /// Preview text.
    pub preview: String,
}

/// Delivers notifications to the platform. Implementations must not block.
pub trait NotificationSink: Send + Sync {
    /// Show one notification.
    fn notify(&self, notification: Notification);
}

/// Filters inbound messages into OS notifications.
pub struct NotificationBridge {
    sink: Box<dyn NotificationSink>,
}

impl NotificationBridge {
    /// Create a bridge over a platform sink.
    pub fn new(sink: Box<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Consider one inbound message for notification.
    pub fn observe(&self, directory: &RoomDirectory, keys: &KeyManager, message: &Message) {
        if &message.sender == directory.local_user() {
            return;
        }
        if directory.active_room_id() == Some(&message.room_id) {
            return;
        }
        if message.kind == MessageKind::System {
            return;
        }

        let preview = match keys.decrypt(&message.room_id, &message.body) {
            Ok(text) => truncate(&text, 120),
            Err(e) => {
                debug!(room = %message.room_id, error = %e, "preview decrypt unavailable");
                "New message".to_string()
            },
        };

        self.sink.notify(Notification {
            room_id: message.room_id.clone(),
            sender: message.sender.clone(),
            preview,
        });
    }
}

impl std::fmt::Debug for NotificationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBridge").finish_non_exhaustive()
    }
}

/// Cut preview text at a character boundary.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use palaver_proto::{EphemeralPolicy, MessageBody, Participant, Role, Room, RoomKind, Timestamp};

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        shown: Arc<Mutex<Vec<Notification>>>,
    }

    impl NotificationSink for RecordingSink {
        fn notify(&self, notification: Notification) {
            if let Ok(mut shown) = self.shown.lock() {
                shown.push(notification);
            }
        }
    }

    fn room(id: &str) -> Room {
        Room {
            id: id.into(),
            kind: RoomKind::Group,
            name: None,
            participants: vec![Participant {
                user: "me".into(),
                role: Role::Member,
                joined_at: Timestamp::from_millis(0),
                last_read_at: None,
                public_key: None,
                wrapped_room_key: None,
                online: false,
            }],
            encryption_enabled: false,
            encryption_version: 0,
            ephemeral: EphemeralPolicy::default(),
            last_message: None,
            last_activity: Timestamp::from_millis(0),
            unread_count: 0,
        }
    }

    fn message(room_id: &str, sender: &str, text: &str) -> Message {
        Message {
            id: "m1".into(),
            room_id: room_id.into(),
            sender: sender.into(),
            recipient: None,
            body: MessageBody::Plaintext(text.into()),
            kind: MessageKind::Text,
            attachments: Vec::new(),
            read: false,
            read_at: None,
            created_at: Timestamp::from_millis(100),
            expires_at: None,
        }
    }

    fn setup() -> (RoomDirectory, KeyManager, NotificationBridge, Arc<Mutex<Vec<Notification>>>) {
        let mut directory = RoomDirectory::new("me".into());
        directory.replace(vec![room("r1"), room("r2")]);
        let keys =
            KeyManager::new(palaver_crypto::ParticipantKeyPair::from_seed([1; 32]));
        let shown = Arc::new(Mutex::new(Vec::new()));
        let bridge =
            NotificationBridge::new(Box::new(RecordingSink { shown: Arc::clone(&shown) }));
        (directory, keys, bridge, shown)
    }

    #[test]
    fn notifies_for_inactive_room() {
        let (directory, keys, bridge, shown) = setup();
        bridge.observe(&directory, &keys, &message("r1", "other", "hello there"));

        let shown = shown.lock().unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].preview, "hello there");
    }

    #[test]
    fn suppresses_active_room() {
        let (mut directory, keys, bridge, shown) = setup();
        directory.set_active(&"r1".into()).unwrap();

        bridge.observe(&directory, &keys, &message("r1", "other", "hi"));
        assert!(shown.lock().unwrap().is_empty());

        // A different room still notifies.
        bridge.observe(&directory, &keys, &message("r2", "other", "hi"));
        assert_eq!(shown.lock().unwrap().len(), 1);
    }

    #[test]
    fn suppresses_own_messages() {
        let (directory, keys, bridge, shown) = setup();
        bridge.observe(&directory, &keys, &message("r1", "me", "from my phone"));
        assert!(shown.lock().unwrap().is_empty());
    }

    #[test]
    fn undecryptable_body_gets_generic_preview() {
        let (directory, keys, bridge, shown) = setup();
        let mut msg = message("r1", "other", "");
        msg.body = MessageBody::Encrypted { version: 1, nonce: [0; 24], ciphertext: vec![1, 2] };

        bridge.observe(&directory, &keys, &msg);
        assert_eq!(shown.lock().unwrap()[0].preview, "New message");
    }
}
