//! Ephemeral message expiry.
//!
//! The reaper sweeps all cached timelines on a fixed interval, removes
//! messages past their expiry time, and emits one-time warnings for
//! messages about to disappear. Expiry is local-first: a message vanishes
//! from view the moment the sweep observes it expired, without waiting for
//! a server round trip.
//!
//! A failure for one room never aborts the sweep for the others.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use palaver_proto::{Message, MessageId, RoomId, Timestamp};
use tracing::debug;

use crate::{directory::RoomDirectory, timeline::Timeline};

/// Something the sweep decided about an ephemeral message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaperEvent {
    /// The message expired and was removed from its timeline.
    Expired(Message),
    /// The message will expire within the warning threshold. Emitted at
    /// most once per message.
    ExpiringSoon {
        /// The message about to expire.
        message_id: MessageId,
        /// Its room.
        room_id: RoomId,
        /// When it expires.
        expires_at: Timestamp,
    },
}

/// Periodic sweeper for ephemeral messages.
#[derive(Debug)]
pub struct Reaper {
    /// Messages expiring within this window get an `ExpiringSoon` warning.
    warning_threshold: Duration,
    /// Ids already warned about, so each message warns at most once.
    warned: HashSet<MessageId>,
}

impl Reaper {
    /// Create a reaper with the given warning window.
    pub fn new(warning_threshold: Duration) -> Self {
        Self { warning_threshold, warned: HashSet::new() }
    }

    /// Sweep every cached timeline once.
    ///
    /// Removes expired messages, repairs the directory's denormalized
    /// last-message pointer when the removed message was the room's latest,
    /// and emits warnings for messages inside the warning window.
    pub fn sweep(
        &mut self,
        now: Timestamp,
        timelines: &mut HashMap<RoomId, Timeline>,
        directory: &mut RoomDirectory,
    ) -> Vec<ReaperEvent> {
        let mut events = Vec::new();

        for (room_id, timeline) in timelines.iter_mut() {
            let expired = timeline.take_expired(now);
            if !expired.is_empty() {
                debug!(room = %room_id, count = expired.len(), "reaped expired messages");
            }

            let last_reaped = directory.get(room_id).is_some_and(|room| {
                room.last_message
                    .as_ref()
                    .is_some_and(|last| expired.iter().any(|m| m.id == last.id))
            });
            if last_reaped {
                directory.set_last_message(room_id, timeline.last_message().cloned());
            }

            for message in expired {
                self.warned.remove(&message.id);
                events.push(ReaperEvent::Expired(message));
            }

            for message in timeline.messages() {
                let Some(expires_at) = message.expires_at else { continue };
                let within_window = now
                    .until(expires_at)
                    .is_some_and(|left| left <= self.warning_threshold);
                if within_window && self.warned.insert(message.id.clone()) {
                    events.push(ReaperEvent::ExpiringSoon {
                        message_id: message.id.clone(),
                        room_id: room_id.clone(),
                        expires_at,
                    });
                }
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use palaver_proto::{
        EphemeralPolicy, MessageBody, MessageKind, Participant, Role, Room, RoomKind, UserId,
    };

    use super::*;

    fn message(id: &str, room_id: &str, expires_at: Option<i64>) -> Message {
        Message {
            id: id.into(),
            room_id: room_id.into(),
            sender: "other".into(),
            recipient: None,
            body: MessageBody::Plaintext("hi".into()),
            kind: MessageKind::Text,
            attachments: Vec::new(),
            read: false,
            read_at: None,
            created_at: Timestamp::from_millis(0),
            expires_at: expires_at.map(Timestamp::from_millis),
        }
    }

    fn room(id: &str) -> Room {
        Room {
            id: id.into(),
            kind: RoomKind::Group,
            name: None,
            participants: vec![Participant {
                user: UserId::from("me"),
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

    fn setup(messages: Vec<Message>) -> (HashMap<RoomId, Timeline>, RoomDirectory) {
        let mut timeline = Timeline::new("r1".into(), 50);
        let mut dir = RoomDirectory::new("me".into());
        dir.replace(vec![room("r1")]);
        for message in messages {
            dir.set_last_message(&"r1".into(), Some(message.clone()));
            timeline.append_live(message);
        }
        let mut timelines = HashMap::new();
        timelines.insert(RoomId::from("r1"), timeline);
        (timelines, dir)
    }

    #[test]
    fn expired_message_is_removed_once() {
        let (mut timelines, mut dir) =
            setup(vec![message("m1", "r1", Some(1_000)), message("m2", "r1", None)]);
        let mut reaper = Reaper::new(Duration::from_secs(300));

        let events = reaper.sweep(Timestamp::from_millis(2_000), &mut timelines, &mut dir);
        let expired: Vec<&Message> = events
            .iter()
            .filter_map(|e| match e {
                ReaperEvent::Expired(m) => Some(m),
                ReaperEvent::ExpiringSoon { .. } => None,
            })
            .collect();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id.as_str(), "m1");
        assert_eq!(timelines[&RoomId::from("r1")].len(), 1);

        // A second sweep finds nothing.
        let again = reaper.sweep(Timestamp::from_millis(3_000), &mut timelines, &mut dir);
        assert!(again.is_empty());
    }

    #[test]
    fn message_without_expiry_is_never_removed() {
        let (mut timelines, mut dir) = setup(vec![message("m1", "r1", None)]);
        let mut reaper = Reaper::new(Duration::from_secs(300));

        let events = reaper.sweep(Timestamp::from_millis(i64::MAX), &mut timelines, &mut dir);
        assert!(events.is_empty());
        assert_eq!(timelines[&RoomId::from("r1")].len(), 1);
    }

    #[test]
    fn reaping_the_last_message_repairs_the_pointer() {
        let (mut timelines, mut dir) =
            setup(vec![message("m1", "r1", None), message("m2", "r1", Some(1_000))]);
        let mut reaper = Reaper::new(Duration::from_secs(300));

        reaper.sweep(Timestamp::from_millis(2_000), &mut timelines, &mut dir);

        let last = dir.get(&"r1".into()).unwrap().last_message.as_ref();
        assert_eq!(last.map(|m| m.id.as_str()), Some("m1"));
    }

    #[test]
    fn warning_fires_exactly_once() {
        let (mut timelines, mut dir) = setup(vec![message("m1", "r1", Some(100_000))]);
        let mut reaper = Reaper::new(Duration::from_secs(300));

        let first = reaper.sweep(Timestamp::from_millis(50_000), &mut timelines, &mut dir);
        assert_eq!(
            first,
            vec![ReaperEvent::ExpiringSoon {
                message_id: "m1".into(),
                room_id: "r1".into(),
                expires_at: Timestamp::from_millis(100_000),
            }]
        );

        let second = reaper.sweep(Timestamp::from_millis(60_000), &mut timelines, &mut dir);
        assert!(second.is_empty());
    }

    #[test]
    fn no_warning_outside_the_window() {
        let (mut timelines, mut dir) = setup(vec![message("m1", "r1", Some(1_000_000))]);
        let mut reaper = Reaper::new(Duration::from_secs(300));

        let events = reaper.sweep(Timestamp::from_millis(0), &mut timelines, &mut dir);
        assert!(events.is_empty());
    }
}
