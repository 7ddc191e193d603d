//! Ephemeral typing state.
//!
//! Inbound indicators live in [`TypingTracker`], a per-(room, user) state
//! machine: `idle -> typing -> idle`. The transition back to idle happens on
//! an explicit stop event or after a local inactivity timeout, because the
//! network cannot be trusted to always deliver the stop. This makes the
//! stuck-indicator bug class structurally impossible.
//!
//! Outbound signals go through [`TypingDebouncer`]: a burst of keystrokes
//! inside one debounce window produces at most one `typing=true` per window,
//! plus one trailing `typing=false` once input pauses long enough.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use palaver_proto::{RoomId, TypingIndicator, UserId};

/// Outbound typing signal decided by the debouncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    /// Publish `typing=true` for the active room.
    Started,
    /// Publish `typing=false` for the active room.
    Stopped,
}

/// Tracks who is currently typing, per room.
#[derive(Debug)]
pub struct TypingTracker {
    /// Entries older than this are dropped by [`TypingTracker::sweep`].
    timeout: Duration,
    /// (room, user) -> deadline after which the entry is stale.
    deadlines: HashMap<RoomId, HashMap<UserId, Instant>>,
}

impl TypingTracker {
    /// Create a tracker with the given stale-entry timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, deadlines: HashMap::new() }
    }

    /// Apply an inbound typing indicator.
    ///
    /// A `typing=true` event refreshes the entry's deadline; `typing=false`
    /// removes it immediately.
    pub fn apply(&mut self, indicator: &TypingIndicator, now: Instant) {
        if indicator.typing {
            self.deadlines
                .entry(indicator.room_id.clone())
                .or_default()
                .insert(indicator.user.clone(), now + self.timeout);
        } else if let Some(room) = self.deadlines.get_mut(&indicator.room_id) {
            room.remove(&indicator.user);
        }
    }

    /// Drop entries whose refresh never arrived.
    ///
    /// Returns the (room, user) pairs that went stale, so the caller can
    /// push updated typing snapshots.
    pub fn sweep(&mut self, now: Instant) -> Vec<(RoomId, UserId)> {
        let mut stale = Vec::new();
        for (room_id, users) in &mut self.deadlines {
            users.retain(|user, deadline| {
                if *deadline <= now {
                    stale.push((room_id.clone(), user.clone()));
                    false
                } else {
                    true
                }
            });
        }
        self.deadlines.retain(|_, users| !users.is_empty());
        stale
    }

    /// Users currently typing in a room.
    pub fn typing_users(&self, room_id: &RoomId) -> Vec<UserId> {
        let Some(users) = self.deadlines.get(room_id) else {
            return Vec::new();
        };
        let mut typing: Vec<UserId> = users.keys().cloned().collect();
        typing.sort();
        typing
    }

    /// Drop all state for a room (on leaving it).
    pub fn clear_room(&mut self, room_id: &RoomId) {
        self.deadlines.remove(room_id);
    }
}

/// Coalesces local keystrokes into at most one signal per debounce window.
#[derive(Debug)]
pub struct TypingDebouncer {
    /// Minimum gap between outbound `typing=true` refreshes.
    window: Duration,
    /// Input pause after which the trailing stop fires.
    stop_after: Duration,
    /// When the last `typing=true` went out. `None` before the first.
    last_sent: Option<Instant>,
    /// Most recent keystroke.
    last_keystroke: Option<Instant>,
    /// Whether the remote side currently believes we are typing.
    active: bool,
}

impl TypingDebouncer {
    /// Create a debouncer with the given window and trailing-stop pause.
    pub fn new(window: Duration, stop_after: Duration) -> Self {
        Self { window, stop_after, last_sent: None, last_keystroke: None, active: false }
    }

    /// Record a keystroke; returns a signal when one should go out.
    pub fn keystroke(&mut self, now: Instant) -> Option<TypingSignal> {
        self.last_keystroke = Some(now);

        let due = match self.last_sent {
            None => true,
            Some(sent) => now.duration_since(sent) >= self.window,
        };
        if !self.active || due {
            self.active = true;
            self.last_sent = Some(now);
            return Some(TypingSignal::Started);
        }
        None
    }

    /// Periodic check; returns the trailing stop once input has paused.
    pub fn tick(&mut self, now: Instant) -> Option<TypingSignal> {
        if !self.active {
            return None;
        }
        let paused = self
            .last_keystroke
            .is_some_and(|last| now.duration_since(last) >= self.stop_after);
        if paused {
            self.active = false;
            self.last_sent = None;
            return Some(TypingSignal::Stopped);
        }
        None
    }

    /// Force an immediate stop (on send or when leaving the room).
    ///
    /// Returns the stop signal if the remote side thought we were typing.
    pub fn reset(&mut self) -> Option<TypingSignal> {
        if self.active {
            self.active = false;
            self.last_sent = None;
            return Some(TypingSignal::Stopped);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicator(room: &str, user: &str, typing: bool) -> TypingIndicator {
        TypingIndicator { room_id: room.into(), user: user.into(), typing }
    }

    #[test]
    fn typing_starts_and_explicit_stop_clears() {
        let mut tracker = TypingTracker::new(Duration::from_secs(5));
        let now = Instant::now();

        tracker.apply(&indicator("r1", "u1", true), now);
        assert_eq!(tracker.typing_users(&"r1".into()), vec![UserId::from("u1")]);

        tracker.apply(&indicator("r1", "u1", false), now);
        assert!(tracker.typing_users(&"r1".into()).is_empty());
    }

    #[test]
    fn missing_stop_event_expires_locally() {
        let mut tracker = TypingTracker::new(Duration::from_secs(5));
        let start = Instant::now();

        tracker.apply(&indicator("r1", "u1", true), start);

        // Not yet stale.
        assert!(tracker.sweep(start + Duration::from_secs(4)).is_empty());
        assert_eq!(tracker.typing_users(&"r1".into()).len(), 1);

        // Past the timeout with no refresh.
        let stale = tracker.sweep(start + Duration::from_secs(6));
        assert_eq!(stale, vec![("r1".into(), "u1".into())]);
        assert!(tracker.typing_users(&"r1".into()).is_empty());
    }

    #[test]
    fn refresh_extends_the_deadline() {
        let mut tracker = TypingTracker::new(Duration::from_secs(5));
        let start = Instant::now();

        tracker.apply(&indicator("r1", "u1", true), start);
        tracker.apply(&indicator("r1", "u1", true), start + Duration::from_secs(4));

        assert!(tracker.sweep(start + Duration::from_secs(6)).is_empty());
        assert_eq!(tracker.typing_users(&"r1".into()).len(), 1);
    }

    #[test]
    fn burst_of_keystrokes_sends_one_signal_per_window() {
        let mut debouncer =
            TypingDebouncer::new(Duration::from_secs(2), Duration::from_secs(3));
        let start = Instant::now();

        let mut sent = 0;
        for i in 0..10 {
            let at = start + Duration::from_millis(i * 100);
            if debouncer.keystroke(at) == Some(TypingSignal::Started) {
                sent += 1;
            }
        }
        assert_eq!(sent, 1);

        // Next window refreshes exactly once more.
        assert_eq!(
            debouncer.keystroke(start + Duration::from_secs(2)),
            Some(TypingSignal::Started)
        );
    }

    #[test]
    fn pause_produces_exactly_one_trailing_stop() {
        let mut debouncer =
            TypingDebouncer::new(Duration::from_secs(2), Duration::from_secs(3));
        let start = Instant::now();

        debouncer.keystroke(start);
        assert_eq!(debouncer.tick(start + Duration::from_secs(1)), None);
        assert_eq!(
            debouncer.tick(start + Duration::from_secs(3)),
            Some(TypingSignal::Stopped)
        );
        assert_eq!(debouncer.tick(start + Duration::from_secs(4)), None);
    }

    #[test]
    fn reset_stops_only_when_active() {
        let mut debouncer =
            TypingDebouncer::new(Duration::from_secs(2), Duration::from_secs(3));
        assert_eq!(debouncer.reset(), None);

        debouncer.keystroke(Instant::now());
        assert_eq!(debouncer.reset(), Some(TypingSignal::Stopped));
        assert_eq!(debouncer.reset(), None);
    }
}
