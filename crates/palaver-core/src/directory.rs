//! Authoritative in-memory cache of the local user's rooms.
//!
//! The directory merges REST snapshots with live transport events and keeps
//! the list ordered newest-activity-first. Rooms are never deleted locally;
//! they leave the cache only on an explicit leave.
//!
//! # Invariants
//!
//! - Rooms are ordered by `last_activity` descending; ties keep prior
//!   relative order (stable sort) to avoid visible list jitter.
//! - At most one room is active at a time.
//! - `unread_count` never goes negative and is suppressed for the active
//!   room and for the local user's own messages.

use palaver_proto::{Message, Room, RoomId, Timestamp, UserId};

use crate::error::SyncError;

/// Result of switching the active room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSwitch {
    /// The room that became active.
    pub entered: RoomId,
    /// The previously active room, now left. `None` if none was active.
    pub left: Option<RoomId>,
}

/// Ordered cache of all rooms the local user participates in.
#[derive(Debug)]
pub struct RoomDirectory {
    /// The viewing user. Own messages never bump unread counts.
    local_user: UserId,
    /// Rooms, newest activity first.
    rooms: Vec<Room>,
    /// The single room currently being viewed.
    active: Option<RoomId>,
    /// Messages that referenced unknown rooms, replayed after a refresh.
    pending: Vec<Message>,
}

impl RoomDirectory {
    /// Create an empty directory for the given local user.
    pub fn new(local_user: UserId) -> Self {
        Self { local_user, rooms: Vec::new(), active: None, pending: Vec::new() }
    }

    /// The viewing user.
    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    /// Replace the full cache with a server snapshot.
    ///
    /// Messages queued for rooms the previous snapshot didn't know are
    /// replayed against the new snapshot. A queued message already reflected
    /// in the snapshot (its creation time is not newer than the room's
    /// `last_activity`) is dropped instead of double-counted.
    pub fn replace(&mut self, mut rooms: Vec<Room>) {
        rooms.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        self.rooms = rooms;

        if self.active.as_ref().is_some_and(|id| self.get(id).is_none()) {
            self.active = None;
        }

        let pending = std::mem::take(&mut self.pending);
        for message in pending {
            let already_reflected = self
                .get(&message.room_id)
                .is_some_and(|room| message.created_at <= room.last_activity);
            if already_reflected {
                continue;
            }
            // Still-unknown rooms re-queue; the caller triggers another
            // refresh when that surfaces as StaleRoom again.
            let _ = self.apply_incoming_message(&message);
        }
    }

    /// Apply a live inbound message to the room list.
    ///
    /// Updates the denormalized last-message pointer, bumps the unread count
    /// (unless the room is active or the sender is the local user), and
    /// floats the room to its sorted position.
    ///
    /// # Errors
    ///
    /// [`SyncError::StaleRoom`] if the room is unknown: the message is
    /// queued for replay and the caller should trigger a background
    /// room refresh.
    pub fn apply_incoming_message(&mut self, message: &Message) -> Result<(), SyncError> {
        let active = self.active.clone();
        let local_user = self.local_user.clone();

        let Some(room) = self.get_mut(&message.room_id) else {
            let room_id = message.room_id.clone();
            self.pending.push(message.clone());
            return Err(SyncError::StaleRoom { room_id });
        };

        let is_active = active.as_ref() == Some(&room.id);
        let own_message = message.sender == local_user;
        if !is_active && !own_message {
            room.unread_count += 1;
        }

        room.last_activity = room.last_activity.max(message.created_at);
        room.last_message = Some(message.clone());

        self.resort();
        Ok(())
    }

    /// Make `room_id` the single active room.
    ///
    /// Returns which channels to enter and leave. Setting the already-active
    /// room is a no-op switch (no channel churn) that still clears unread.
    ///
    /// # Errors
    ///
    /// [`SyncError::StaleRoom`] if the room is unknown.
    pub fn set_active(&mut self, room_id: &RoomId) -> Result<ActiveSwitch, SyncError> {
        if self.get(room_id).is_none() {
            return Err(SyncError::StaleRoom { room_id: room_id.clone() });
        }

        let left = match self.active.take() {
            Some(prev) if &prev == room_id => None,
            other => other,
        };
        self.active = Some(room_id.clone());
        self.clear_unread(room_id);

        Ok(ActiveSwitch { entered: room_id.clone(), left })
    }

    /// Clear the active room. Returns the room that was active.
    pub fn clear_active(&mut self) -> Option<RoomId> {
        self.active.take()
    }

    /// Zero the unread count for a room (idempotent).
    pub fn clear_unread(&mut self, room_id: &RoomId) {
        if let Some(room) = self.get_mut(room_id) {
            room.unread_count = 0;
        }
    }

    /// Update the online flag on every participant entry matching `user`.
    pub fn apply_participant_status(&mut self, user: &UserId, online: bool) {
        for room in &mut self.rooms {
            if let Some(participant) = room.participant_mut(user) {
                participant.online = online;
            }
        }
    }

    /// Apply a cross-device read event.
    ///
    /// Updates the participant's `last_read_at`; when the reader is the
    /// local user (read on another device), the unread count also clears.
    pub fn apply_read(&mut self, room_id: &RoomId, user: &UserId, read_at: Timestamp) {
        let is_local = user == &self.local_user;
        if let Some(room) = self.get_mut(room_id) {
            if let Some(participant) = room.participant_mut(user) {
                participant.last_read_at = Some(read_at);
            }
            if is_local {
                room.unread_count = 0;
            }
        }
    }

    /// Apply a membership event from the transport.
    ///
    /// Leaves remove the participant entry. Joins for users the cached room
    /// doesn't know mean the snapshot is stale.
    ///
    /// # Errors
    ///
    /// [`SyncError::StaleRoom`] if the room is unknown or a join referenced
    /// an unknown participant.
    pub fn apply_membership(
        &mut self,
        room_id: &RoomId,
        user: &UserId,
        joined: bool,
    ) -> Result<(), SyncError> {
        let Some(room) = self.get_mut(room_id) else {
            return Err(SyncError::StaleRoom { room_id: room_id.clone() });
        };

        if joined {
            if room.participant(user).is_none() {
                // Membership grew beyond our snapshot; refresh to pick up
                // the new participant's key material.
                return Err(SyncError::StaleRoom { room_id: room_id.clone() });
            }
            if let Some(participant) = room.participant_mut(user) {
                participant.online = true;
            }
        } else {
            room.participants.retain(|p| &p.user != user);
        }
        Ok(())
    }

    /// Replace a room's denormalized last-message pointer.
    ///
    /// Used by the reaper when the previous last message expired.
    pub fn set_last_message(&mut self, room_id: &RoomId, last: Option<Message>) {
        if let Some(room) = self.get_mut(room_id) {
            room.last_message = last;
        }
    }

    /// Remove a room on explicit leave. Returns the removed room.
    pub fn remove(&mut self, room_id: &RoomId) -> Option<Room> {
        if self.active.as_ref() == Some(room_id) {
            self.active = None;
        }
        let index = self.rooms.iter().position(|r| &r.id == room_id)?;
        Some(self.rooms.remove(index))
    }

    /// Insert or update a single room, keeping the order invariant.
    pub fn upsert(&mut self, room: Room) {
        if let Some(existing) = self.get_mut(&room.id) {
            *existing = room;
        } else {
            self.rooms.push(room);
        }
        self.resort();
    }

    /// Sum of unread counts across all rooms.
    pub fn total_unread(&self) -> u32 {
        self.rooms.iter().map(|r| r.unread_count).sum()
    }

    /// All rooms, newest activity first.
    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    /// Look up a room by id.
    pub fn get(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| &r.id == room_id)
    }

    /// Look up a room by id, mutably.
    pub fn get_mut(&mut self, room_id: &RoomId) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|r| &r.id == room_id)
    }

    /// The currently active room id, if any.
    pub fn active_room_id(&self) -> Option<&RoomId> {
        self.active.as_ref()
    }

    /// The currently active room, if any.
    pub fn active_room(&self) -> Option<&Room> {
        self.active.as_ref().and_then(|id| self.get(id))
    }

    /// Stable sort by last activity, newest first. Ties keep prior order.
    fn resort(&mut self) {
        self.rooms.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    }
}

#[cfg(test)]
mod tests {
    use palaver_proto::{
        EphemeralPolicy, MessageBody, MessageKind, Participant, Role, RoomKind,
    };

    use super::*;

    fn participant(user: &str) -> Participant {
        Participant {
            user: user.into(),
            role: Role::Member,
            joined_at: Timestamp::from_millis(0),
            last_read_at: None,
            public_key: None,
            wrapped_room_key: None,
            online: false,
        }
    }

    fn room(id: &str, last_activity: i64) -> Room {
        Room {
            id: id.into(),
            kind: RoomKind::Group,
            name: None,
            participants: vec![participant("me"), participant("other")],
            encryption_enabled: false,
            encryption_version: 0,
            ephemeral: EphemeralPolicy::default(),
            last_message: None,
            last_activity: Timestamp::from_millis(last_activity),
            unread_count: 0,
        }
    }

    fn message(id: &str, room_id: &str, sender: &str, at: i64) -> Message {
        Message {
            id: id.into(),
            room_id: room_id.into(),
            sender: sender.into(),
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

    fn directory_with(rooms: Vec<Room>) -> RoomDirectory {
        let mut dir = RoomDirectory::new("me".into());
        dir.replace(rooms);
        dir
    }

    #[test]
    fn replace_orders_newest_first() {
        let dir = directory_with(vec![room("a", 100), room("b", 300), room("c", 200)]);
        let ids: Vec<&str> = dir.rooms().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
    }

    #[test]
    fn incoming_message_floats_room_and_bumps_unread() {
        let mut dir = directory_with(vec![room("a", 100), room("b", 300)]);

        dir.apply_incoming_message(&message("m1", "a", "other", 400)).unwrap();

        assert_eq!(dir.rooms()[0].id.as_str(), "a");
        assert_eq!(dir.get(&"a".into()).unwrap().unread_count, 1);
        assert_eq!(dir.total_unread(), 1);
    }

    #[test]
    fn own_message_does_not_bump_unread() {
        let mut dir = directory_with(vec![room("a", 100)]);
        dir.apply_incoming_message(&message("m1", "a", "me", 400)).unwrap();
        assert_eq!(dir.total_unread(), 0);
    }

    #[test]
    fn active_room_suppresses_unread() {
        let mut dir = directory_with(vec![room("a", 100)]);
        dir.set_active(&"a".into()).unwrap();

        dir.apply_incoming_message(&message("m1", "a", "other", 400)).unwrap();
        assert_eq!(dir.total_unread(), 0);
    }

    #[test]
    fn equal_timestamps_keep_prior_relative_order() {
        let mut dir = directory_with(vec![room("a", 100), room("b", 100)]);
        let before: Vec<String> = dir.rooms().iter().map(|r| r.id.to_string()).collect();

        // Both rooms updated to the same newer timestamp; order must hold.
        dir.apply_incoming_message(&message("m1", "a", "other", 500)).unwrap();
        dir.apply_incoming_message(&message("m2", "b", "other", 500)).unwrap();

        let after: Vec<String> = dir.rooms().iter().map(|r| r.id.to_string()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn unknown_room_queues_and_replays_after_refresh() {
        let mut dir = directory_with(vec![room("a", 100)]);

        let result = dir.apply_incoming_message(&message("m1", "ghost", "other", 400));
        assert!(matches!(result, Err(SyncError::StaleRoom { .. })));

        // Refresh brings the room in with the message not yet reflected.
        dir.replace(vec![room("a", 100), room("ghost", 50)]);
        let ghost = dir.get(&"ghost".into()).unwrap();
        assert_eq!(ghost.unread_count, 1);
        assert_eq!(ghost.last_message.as_ref().map(|m| m.id.as_str()), Some("m1"));
    }

    #[test]
    fn replayed_message_already_in_snapshot_is_dropped() {
        let mut dir = directory_with(vec![room("a", 100)]);
        let _ = dir.apply_incoming_message(&message("m1", "ghost", "other", 400));

        // Snapshot already reflects activity at 400.
        dir.replace(vec![room("ghost", 400)]);
        assert_eq!(dir.get(&"ghost".into()).unwrap().unread_count, 0);
    }

    #[test]
    fn set_active_reports_left_room() {
        let mut dir = directory_with(vec![room("a", 100), room("b", 200)]);

        let first = dir.set_active(&"a".into()).unwrap();
        assert_eq!(first.left, None);

        let second = dir.set_active(&"b".into()).unwrap();
        assert_eq!(second.left, Some("a".into()));
        assert_eq!(dir.active_room_id(), Some(&RoomId::from("b")));
    }

    #[test]
    fn set_active_same_room_is_no_churn() {
        let mut dir = directory_with(vec![room("a", 100)]);
        dir.set_active(&"a".into()).unwrap();
        let switch = dir.set_active(&"a".into()).unwrap();
        assert_eq!(switch.left, None);
    }

    #[test]
    fn participant_status_updates_all_rooms() {
        let mut dir = directory_with(vec![room("a", 100), room("b", 200)]);
        dir.apply_participant_status(&"other".into(), true);

        for room in dir.rooms() {
            assert!(room.participant(&"other".into()).unwrap().online);
        }
    }

    #[test]
    fn read_event_from_local_user_clears_unread() {
        let mut dir = directory_with(vec![room("a", 100)]);
        dir.apply_incoming_message(&message("m1", "a", "other", 400)).unwrap();
        assert_eq!(dir.total_unread(), 1);

        dir.apply_read(&"a".into(), &"me".into(), Timestamp::from_millis(500));
        assert_eq!(dir.total_unread(), 0);
    }

    #[test]
    fn leave_removes_room_and_active_state() {
        let mut dir = directory_with(vec![room("a", 100)]);
        dir.set_active(&"a".into()).unwrap();

        let removed = dir.remove(&"a".into());
        assert!(removed.is_some());
        assert_eq!(dir.active_room_id(), None);
        assert_eq!(dir.rooms().len(), 0);
    }

    #[test]
    fn membership_leave_removes_participant() {
        let mut dir = directory_with(vec![room("a", 100)]);
        dir.apply_membership(&"a".into(), &"other".into(), false).unwrap();
        assert!(dir.get(&"a".into()).unwrap().participant(&"other".into()).is_none());
    }

    #[test]
    fn membership_join_of_unknown_user_is_stale() {
        let mut dir = directory_with(vec![room("a", 100)]);
        let result = dir.apply_membership(&"a".into(), &"newcomer".into(), true);
        assert!(matches!(result, Err(SyncError::StaleRoom { .. })));
    }
}
