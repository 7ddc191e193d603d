//! Per-room ordered message cache.
//!
//! The cache stores messages oldest-first; display layers read the slice
//! as-is and render bottom-up. Pagination backfills older pages using the
//! oldest cached id as the `before` cursor.
//!
//! # Invariants
//!
//! - Message ids are unique: a duplicate `append_live` (the server echoing
//!   an optimistic local send) is a no-op.
//! - `unread_count()` always equals the number of cached messages with
//!   `read == false`.
//! - Read transitions are idempotent: re-marking an already-read message
//!   leaves it untouched.

use std::collections::HashSet;

use palaver_proto::{Message, MessageId, RoomId, Timestamp};

/// Ordered message cache for one room.
#[derive(Debug)]
pub struct Timeline {
    room_id: RoomId,
    /// Messages, oldest first.
    messages: Vec<Message>,
    /// Ids present in `messages`, for O(1) de-duplication.
    ids: HashSet<MessageId>,
    /// Whether older pages may remain on the server.
    has_more: bool,
    /// Requested page size; short pages clear `has_more`.
    page_size: usize,
}

impl Timeline {
    /// Create an empty timeline for a room.
    pub fn new(room_id: RoomId, page_size: usize) -> Self {
        Self { room_id, messages: Vec::new(), ids: HashSet::new(), has_more: true, page_size }
    }

    /// The owning room.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Merge a history page fetched from the REST collaborator.
    ///
    /// The page arrives oldest-first (the API returns chronological order)
    /// and is prepended before the current cache. A page shorter than the
    /// requested size means the room's history is exhausted.
    pub fn merge_history(&mut self, page: Vec<Message>) {
        self.has_more = page.len() >= self.page_size;

        let mut fresh: Vec<Message> =
            page.into_iter().filter(|m| !self.ids.contains(&m.id)).collect();
        for message in &fresh {
            self.ids.insert(message.id.clone());
        }
        fresh.append(&mut self.messages);
        self.messages = fresh;
    }

    /// Cursor for the next older page: the oldest cached message id.
    pub fn oldest_id(&self) -> Option<&MessageId> {
        self.messages.first().map(|m| &m.id)
    }

    /// Whether older pages may remain on the server.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Insert a message arriving over the transport.
    ///
    /// Returns `false` when the id is already cached (duplicate echo).
    pub fn append_live(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            return false;
        }
        self.ids.insert(message.id.clone());
        self.messages.push(message);
        true
    }

    /// Mark every cached unread message as read at `now`.
    ///
    /// Returns the ids that transitioned; already-read messages are left
    /// untouched, so the empty result means the call was a no-op and the
    /// server does not need to be told again.
    pub fn mark_read(&mut self, now: Timestamp) -> Vec<MessageId> {
        let mut transitioned = Vec::new();
        for message in &mut self.messages {
            if !message.read {
                message.read = true;
                message.read_at = Some(now);
                transitioned.push(message.id.clone());
            }
        }
        transitioned
    }

    /// Remove and return every message past its expiry time.
    pub fn take_expired(&mut self, now: Timestamp) -> Vec<Message> {
        let mut expired = Vec::new();
        self.messages.retain(|m| {
            if m.is_expired(now) {
                expired.push(m.clone());
                false
            } else {
                true
            }
        });
        for message in &expired {
            self.ids.remove(&message.id);
        }
        expired
    }

    /// Cached messages with `read == false`.
    pub fn unread_count(&self) -> usize {
        self.messages.iter().filter(|m| !m.read).count()
    }

    /// All cached messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of cached messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The newest cached message, if any.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether a message id is cached.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use palaver_proto::{MessageBody, MessageKind};
    use proptest::prelude::{ProptestConfig, proptest};

    use super::*;

    fn message(id: &str, at: i64) -> Message {
        Message {
            id: id.into(),
            room_id: "r1".into(),
            sender: "u1".into(),
            recipient: None,
            body: MessageBody::Plaintext("hi".into()),
            kind: MessageKind::Text,
            attachments: Vec::new(),
            read: false,
            read_at: None,
            created_at: Timestamp::from_millis(at),
            expires_at: None,
        }
    }

    fn timeline() -> Timeline {
        Timeline::new("r1".into(), 3)
    }

    #[test]
    fn timeline_orders_oldest_first() {
        let mut tl = timeline();
        tl.merge_history(vec![message("m1", 100), message("m2", 200), message("m3", 300)]);
        tl.append_live(message("m4", 400));

        let ids: Vec<&str> = tl.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3", "m4"]);
        assert_eq!(tl.oldest_id(), Some(&"m1".into()));
        assert_eq!(tl.last_message().map(|m| m.id.as_str()), Some("m4"));
    }

    #[test]
    fn append_live_deduplicates_by_id() {
        let mut tl = timeline();
        assert!(tl.append_live(message("m1", 100)));
        assert!(!tl.append_live(message("m1", 100)));
        assert_eq!(tl.len(), 1);
    }

    #[test]
    fn older_page_prepends_before_cache() {
        let mut tl = timeline();
        tl.merge_history(vec![message("m4", 400), message("m5", 500), message("m6", 600)]);
        tl.merge_history(vec![message("m1", 100), message("m2", 200), message("m3", 300)]);

        let ids: Vec<&str> = tl.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3", "m4", "m5", "m6"]);
        assert!(tl.has_more());
    }

    #[test]
    fn short_page_exhausts_history() {
        let mut tl = timeline();
        tl.merge_history(vec![message("m1", 100)]);
        assert!(!tl.has_more());
    }

    #[test]
    fn history_page_skips_already_cached_ids() {
        let mut tl = timeline();
        tl.append_live(message("m2", 200));
        tl.merge_history(vec![message("m1", 100), message("m2", 200)]);
        assert_eq!(tl.len(), 2);
    }

    #[test]
    fn mark_read_is_idempotent() {
        let mut tl = timeline();
        tl.append_live(message("m1", 100));
        tl.append_live(message("m2", 200));

        let first = tl.mark_read(Timestamp::from_millis(300));
        assert_eq!(first.len(), 2);
        assert_eq!(tl.unread_count(), 0);

        let second = tl.mark_read(Timestamp::from_millis(400));
        assert!(second.is_empty());
        // First read_at survives the re-mark.
        assert_eq!(tl.messages()[0].read_at, Some(Timestamp::from_millis(300)));
    }

    #[test]
    fn take_expired_removes_only_expired() {
        let mut tl = timeline();
        let mut ephemeral = message("m1", 100);
        ephemeral.expires_at = Some(Timestamp::from_millis(500));
        tl.append_live(ephemeral);
        tl.append_live(message("m2", 200));

        let expired = tl.take_expired(Timestamp::from_millis(600));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id.as_str(), "m1");
        assert_eq!(tl.len(), 1);
        assert!(!tl.contains(&"m1".into()));

        // A removed id can arrive again without tripping de-duplication.
        assert!(tl.take_expired(Timestamp::from_millis(700)).is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Appending any sequence of ids (with duplicates) keeps the
        /// timeline length equal to the number of unique ids.
        #[test]
        fn length_reflects_unique_ids(ids in proptest::collection::vec(0u8..16, 0..64)) {
            let mut tl = Timeline::new("r1".into(), 50);
            for (i, id) in ids.iter().enumerate() {
                tl.append_live(message(&format!("m{id}"), i as i64));
            }

            let unique: HashSet<&u8> = ids.iter().collect();
            assert_eq!(tl.len(), unique.len());
        }

        /// The unread count always equals the number of cached unread
        /// messages, after any interleaving of appends and mark_read.
        #[test]
        fn unread_matches_cached_unread(ops in proptest::collection::vec(0u8..10, 0..64)) {
            let mut tl = Timeline::new("r1".into(), 50);
            for (i, op) in ops.iter().enumerate() {
                if *op == 0 {
                    tl.mark_read(Timestamp::from_millis(i as i64));
                } else {
                    tl.append_live(message(&format!("m{i}"), i as i64));
                }
                let cached_unread = tl.messages().iter().filter(|m| !m.read).count();
                assert_eq!(tl.unread_count(), cached_unread);
            }
        }
    }
}
