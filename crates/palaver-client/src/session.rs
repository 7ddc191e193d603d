//! Session orchestration.
//!
//! One [`Session`] per signed-in user owns the single mutable instance of
//! every sync component: directory, timelines, typing state, keys, reaper.
//! All mutation flows through `&mut self`, so the state machines never need
//! internal locking; the run loop serializes transport events, timer ticks,
//! and user intents.
//!
//! Derived views (room list, active timeline, typing users, unread total)
//! are published on `tokio::sync::watch` channels: late subscribers always
//! observe the current value, and intermediate states may be skipped.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use palaver_core::{
    KeyManager, Reaper, ReaperEvent, RoomDirectory, SyncConfig, SyncError, Timeline,
    TypingDebouncer, TypingSignal, TypingTracker,
};
use palaver_crypto::ParticipantKeyPair;
use palaver_proto::{
    Message, MessageBody, MessageKind, Room, RoomId, Timestamp, TypingIndicator, UserId,
    WireEvent,
};
use rand::rngs::OsRng;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::{
    notify::NotificationBridge,
    rest::{ChatApi, MessageDraft},
    transport::{ConnectionState, TransportClient},
};

/// How often the run loop polls typing timers.
const TIMER_RESOLUTION: Duration = Duration::from_millis(500);

/// Wall-clock now, in epoch milliseconds.
fn now_ts() -> Timestamp {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64);
    Timestamp::from_millis(millis)
}

/// The user-facing sync session.
pub struct Session {
    config: SyncConfig,
    api: Arc<dyn ChatApi>,
    transport: TransportClient,
    directory: RoomDirectory,
    timelines: HashMap<RoomId, Timeline>,
    typing: TypingTracker,
    debouncer: TypingDebouncer,
    keys: KeyManager,
    reaper: Reaper,
    notifier: Option<NotificationBridge>,

    rooms_tx: watch::Sender<Vec<Room>>,
    active_tx: watch::Sender<Option<RoomId>>,
    messages_tx: watch::Sender<Vec<Message>>,
    typing_tx: watch::Sender<Vec<UserId>>,
    unread_tx: watch::Sender<u32>,
}

impl Session {
    /// Create a session for one signed-in user.
    pub fn new(
        local_user: UserId,
        key_pair: ParticipantKeyPair,
        api: Arc<dyn ChatApi>,
        transport: TransportClient,
        notifier: Option<NotificationBridge>,
        config: SyncConfig,
    ) -> Self {
        let (rooms_tx, _) = watch::channel(Vec::new());
        let (active_tx, _) = watch::channel(None);
        let (messages_tx, _) = watch::channel(Vec::new());
        let (typing_tx, _) = watch::channel(Vec::new());
        let (unread_tx, _) = watch::channel(0);

        Self {
            typing: TypingTracker::new(config.typing_timeout),
            debouncer: TypingDebouncer::new(config.typing_debounce, config.typing_stop_after),
            reaper: Reaper::new(config.expiry_warning),
            directory: RoomDirectory::new(local_user),
            keys: KeyManager::new(key_pair),
            timelines: HashMap::new(),
            config,
            api,
            transport,
            notifier,
            rooms_tx,
            active_tx,
            messages_tx,
            typing_tx,
            unread_tx,
        }
    }

    // ------------------------------------------------------------------
    // Observable views
    // ------------------------------------------------------------------

    /// Room list, newest activity first.
    pub fn watch_rooms(&self) -> watch::Receiver<Vec<Room>> {
        self.rooms_tx.subscribe()
    }

    /// The active room id.
    pub fn watch_active(&self) -> watch::Receiver<Option<RoomId>> {
        self.active_tx.subscribe()
    }

    /// The active room's timeline, oldest first.
    pub fn watch_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.messages_tx.subscribe()
    }

    /// Users typing in the active room.
    pub fn watch_typing(&self) -> watch::Receiver<Vec<UserId>> {
        self.typing_tx.subscribe()
    }

    /// Total unread count across all rooms, for the app badge.
    pub fn watch_unread(&self) -> watch::Receiver<u32> {
        self.unread_tx.subscribe()
    }

    /// Connection state of the underlying socket.
    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.transport.state()
    }

    /// Direct read access for callers that pull instead of watch.
    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    // ------------------------------------------------------------------
    // Bootstrap and refresh
    // ------------------------------------------------------------------

    /// Initial sync: register our public key and load the room snapshot.
    pub async fn bootstrap(&mut self) -> Result<(), SyncError> {
        self.api.register_public_key(self.keys.public_key()).await?;
        self.refresh_rooms().await
    }

    /// Re-fetch the full room snapshot and replay anything queued against it.
    pub async fn refresh_rooms(&mut self) -> Result<(), SyncError> {
        let rooms = self.api.fetch_rooms().await?;

        for room in &rooms {
            if !room.encryption_enabled {
                continue;
            }
            let own = room.participant(self.directory.local_user());
            if let Some(wrapped) = own.and_then(|p| p.wrapped_room_key.as_ref()) {
                if let Err(e) = self.keys.install_wrapped(&room.id, wrapped) {
                    warn!(room = %room.id, error = %e, "failed to install room key");
                }
            }
        }

        self.directory.replace(rooms);
        info!(rooms = self.directory.rooms().len(), "room snapshot refreshed");
        self.publish_rooms();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Active room
    // ------------------------------------------------------------------

    /// Switch the active room.
    ///
    /// Joins the room's live channel, leaves the previous one, loads the
    /// first history page on first visit, and marks everything read.
    pub async fn set_active_room(
        &mut self,
        room_id: &RoomId,
        now: Timestamp,
    ) -> Result<(), SyncError> {
        let switch = self.directory.set_active(room_id)?;

        if let Some(left) = switch.left {
            self.transport.leave_room(left.clone()).await?;
            self.typing.clear_room(&left);
            self.flush_typing_stop(&left).await;
        }
        self.transport.join_room(switch.entered).await?;

        // The timeline is cached only once the first page loaded; a failed
        // fetch leaves the room unvisited so the next activation retries.
        if !self.timelines.contains_key(room_id) {
            let page =
                self.api.fetch_messages(room_id, self.config.page_size, None, None).await?;
            let mut timeline = Timeline::new(room_id.clone(), self.config.page_size);
            timeline.merge_history(page);
            self.timelines.insert(room_id.clone(), timeline);
        }

        self.mark_active_read(now).await?;
        self.active_tx.send_replace(Some(room_id.clone()));
        self.publish_rooms();
        self.publish_active_messages();
        self.publish_typing();
        Ok(())
    }

    /// Leave the active-room view (navigated away from the chat screen).
    pub async fn clear_active_room(&mut self) -> Result<(), SyncError> {
        if let Some(left) = self.directory.clear_active() {
            self.transport.leave_room(left.clone()).await?;
            self.typing.clear_room(&left);
            self.flush_typing_stop(&left).await;
        }
        self.active_tx.send_replace(None);
        self.publish_typing();
        Ok(())
    }

    /// Mark the active room's cached messages read, locally and remotely.
    async fn mark_active_read(&mut self, now: Timestamp) -> Result<(), SyncError> {
        let Some(room_id) = self.directory.active_room_id().cloned() else {
            return Ok(());
        };
        let Some(timeline) = self.timelines.get_mut(&room_id) else {
            return Ok(());
        };

        let transitioned = timeline.mark_read(now);
        self.directory.clear_unread(&room_id);
        if transitioned.is_empty() {
            return Ok(());
        }

        self.api.mark_read(&room_id, &transitioned, now).await?;
        // Best effort: other devices learn immediately over the socket;
        // offline is fine, the server fans out the REST receipt anyway.
        let read = WireEvent::Read {
            room_id,
            user: self.directory.local_user().clone(),
            read_at: now,
        };
        if let Err(SyncError::NotConnected) = self.transport.publish(read).await {
            debug!("read receipt not published, socket offline");
        }
        Ok(())
    }

    /// Load the next older history page for the active room.
    ///
    /// Mutation happens through one `&mut Session`, so a room switch cannot
    /// interleave with a load; it cancels one by dropping its future.
    pub async fn load_older_messages(&mut self) -> Result<(), SyncError> {
        let Some(room_id) = self.directory.active_room_id().cloned() else {
            return Ok(());
        };
        let Some(timeline) = self.timelines.get(&room_id) else {
            return Ok(());
        };
        if !timeline.has_more() {
            return Ok(());
        }

        let before = timeline.oldest_id().cloned();
        let page = self
            .api
            .fetch_messages(&room_id, self.config.page_size, before.as_ref(), None)
            .await?;

        if let Some(timeline) = self.timelines.get_mut(&room_id) {
            timeline.merge_history(page);
        }
        self.publish_active_messages();
        Ok(())
    }

    /// Reconcile state after the socket reconnects.
    ///
    /// Events that fired while offline are gone; the snapshot refresh
    /// recovers room-level state, and the `after` fetch fills the gap in
    /// the active timeline. Duplicates fall out of the id de-duplication.
    pub async fn resync_after_reconnect(&mut self) -> Result<(), SyncError> {
        self.refresh_rooms().await?;

        let Some(room_id) = self.directory.active_room_id().cloned() else {
            return Ok(());
        };
        let newest = self
            .timelines
            .get(&room_id)
            .and_then(|tl| tl.last_message().map(|m| m.id.clone()));
        let Some(after) = newest else {
            return Ok(());
        };

        let page = self
            .api
            .fetch_messages(&room_id, self.config.page_size, None, Some(&after))
            .await?;
        if let Some(timeline) = self.timelines.get_mut(&room_id) {
            let mut appended = 0_usize;
            for message in page {
                if timeline.append_live(message) {
                    appended += 1;
                }
            }
            if appended > 0 {
                debug!(room = %room_id, appended, "filled reconnect gap");
            }
        }
        self.publish_active_messages();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Send a text message to a room.
    ///
    /// The REST response is the canonical message and is appended
    /// immediately; the socket echo de-duplicates by id. On failure the
    /// caller still owns the draft text and can retry.
    pub async fn send_message(
        &mut self,
        room_id: &RoomId,
        text: &str,
        now: Timestamp,
    ) -> Result<Message, SyncError> {
        let room = self
            .directory
            .get(room_id)
            .ok_or_else(|| SyncError::StaleRoom { room_id: room_id.clone() })?;

        let body = if room.encryption_enabled {
            self.keys.encrypt(room_id, text, &mut OsRng)?
        } else {
            MessageBody::Plaintext(text.to_string())
        };
        let recipient = direct_peer(room, self.directory.local_user());
        let expires_at = room
            .ephemeral
            .enabled
            .then(|| now.saturating_add(room.ephemeral.default_ttl()));

        let draft = MessageDraft {
            room_id: room_id.clone(),
            recipient,
            body,
            kind: MessageKind::Text,
            attachments: Vec::new(),
            expires_at,
        };
        let posted = self.api.post_message(draft).await?;

        if let Some(timeline) = self.timelines.get_mut(room_id) {
            timeline.append_live(posted.clone());
        }
        if let Err(SyncError::StaleRoom { .. }) =
            self.directory.apply_incoming_message(&posted)
        {
            self.refresh_rooms().await?;
        }
        self.flush_typing_stop(room_id).await;
        self.publish_rooms();
        self.publish_active_messages();
        Ok(posted)
    }

    /// Record a local keystroke in the active room's composer.
    pub async fn keystroke(&mut self, now: Instant) -> Result<(), SyncError> {
        let Some(room_id) = self.directory.active_room_id().cloned() else {
            return Ok(());
        };
        if let Some(TypingSignal::Started) = self.debouncer.keystroke(now) {
            self.publish_typing_signal(&room_id, true).await;
        }
        Ok(())
    }

    /// Send the trailing typing stop if the remote side thinks we type.
    async fn flush_typing_stop(&mut self, room_id: &RoomId) {
        if let Some(TypingSignal::Stopped) = self.debouncer.reset() {
            self.publish_typing_signal(room_id, false).await;
        }
    }

    async fn publish_typing_signal(&self, room_id: &RoomId, typing: bool) {
        let event = WireEvent::Typing(TypingIndicator {
            room_id: room_id.clone(),
            user: self.directory.local_user().clone(),
            typing,
        });
        // Typing is ephemeral; losing it while offline is correct.
        if let Err(e) = self.transport.publish(event).await {
            debug!(error = %e, "typing signal dropped");
        }
    }

    // ------------------------------------------------------------------
    // Room lifecycle
    // ------------------------------------------------------------------

    /// Create (or reuse) the direct room with `peer`.
    pub async fn create_direct_room(&mut self, peer: &UserId) -> Result<RoomId, SyncError> {
        let room = self.api.create_direct_room(peer).await?;
        self.adopt_new_room(room).await
    }

    /// Create a named group room.
    pub async fn create_group_room(
        &mut self,
        name: &str,
        members: &[UserId],
    ) -> Result<RoomId, SyncError> {
        let room = self.api.create_group_room(name, members).await?;
        self.adopt_new_room(room).await
    }

    /// Open a conversation attached to a marketplace listing.
    pub async fn create_ad_room(
        &mut self,
        listing_ref: &str,
        seller: &UserId,
    ) -> Result<RoomId, SyncError> {
        let room = self.api.create_ad_room(listing_ref, seller).await?;
        self.adopt_new_room(room).await
    }

    /// Install a freshly created room: provision keys if it is encrypted
    /// and no key exists yet, then add it to the directory.
    async fn adopt_new_room(&mut self, room: Room) -> Result<RoomId, SyncError> {
        let room_id = room.id.clone();
        if room.encryption_enabled && self.keys.current_version(&room_id).is_none() {
            match self.keys.provision(&room, &mut OsRng) {
                Ok(provisioned) => {
                    self.api.publish_room_keys(&room_id, &provisioned).await?;
                },
                // A member without a registered key blocks provisioning,
                // not room creation; retry happens on the next rekey.
                Err(SyncError::MissingPublicKey { user }) => {
                    warn!(room = %room_id, user = %user, "skipping key provision");
                },
                Err(e) => return Err(e),
            }
        }
        self.directory.upsert(room);
        self.publish_rooms();
        Ok(room_id)
    }

    /// Leave a room permanently.
    pub async fn leave_room(&mut self, room_id: &RoomId) -> Result<(), SyncError> {
        self.api.leave_room(room_id).await?;
        self.transport.leave_room(room_id.clone()).await?;
        self.directory.remove(room_id);
        self.timelines.remove(room_id);
        self.typing.clear_room(room_id);
        self.keys.forget_room(room_id);
        if self.directory.active_room_id().is_none() {
            self.active_tx.send_replace(None);
        }
        self.publish_rooms();
        self.publish_active_messages();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inbound events
    // ------------------------------------------------------------------

    /// Apply one transport event.
    ///
    /// # Errors
    ///
    /// Only [`SyncError::Auth`] is fatal. Stale-room conditions trigger a
    /// snapshot refresh internally; other failures are logged upstream and
    /// the loop continues.
    pub async fn handle_event(
        &mut self,
        event: WireEvent,
        now: Timestamp,
        mono: Instant,
    ) -> Result<(), SyncError> {
        match event {
            WireEvent::Message(message) => self.handle_message(message, now).await,
            WireEvent::Typing(indicator) => {
                self.typing.apply(&indicator, mono);
                self.publish_typing();
                Ok(())
            },
            WireEvent::UserJoined { room_id, user } => {
                self.handle_membership(&room_id, &user, true).await
            },
            WireEvent::UserLeft { room_id, user } => {
                self.typing.apply(
                    &TypingIndicator { room_id: room_id.clone(), user: user.clone(), typing: false },
                    mono,
                );
                self.handle_membership(&room_id, &user, false).await
            },
            WireEvent::Status { user, online } => {
                self.directory.apply_participant_status(&user, online);
                self.publish_rooms();
                Ok(())
            },
            WireEvent::Read { room_id, user, read_at } => {
                let is_local = &user == self.directory.local_user();
                self.directory.apply_read(&room_id, &user, read_at);
                if is_local {
                    // Read on another device; reconcile the local cache.
                    if let Some(timeline) = self.timelines.get_mut(&room_id) {
                        timeline.mark_read(read_at);
                    }
                }
                self.publish_rooms();
                self.publish_active_messages();
                Ok(())
            },
            WireEvent::AuthRejected { reason } => Err(SyncError::Auth { reason }),
            WireEvent::Auth { .. }
            | WireEvent::AuthAck { .. }
            | WireEvent::Join { .. }
            | WireEvent::Leave { .. } => {
                debug!(kind = %event.kind(), "ignoring unexpected inbound event");
                Ok(())
            },
        }
    }

    async fn handle_message(&mut self, message: Message, now: Timestamp) -> Result<(), SyncError> {
        if let Some(timeline) = self.timelines.get_mut(&message.room_id) {
            if !timeline.append_live(message.clone()) {
                // Echo of our own optimistic append.
                return Ok(());
            }
        }

        if let Err(SyncError::StaleRoom { room_id }) =
            self.directory.apply_incoming_message(&message)
        {
            debug!(room = %room_id, "message for unknown room, refreshing snapshot");
            self.refresh_rooms().await?;
        }

        if self.directory.active_room_id() == Some(&message.room_id) {
            self.mark_active_read(now).await?;
        }

        if let Some(notifier) = &self.notifier {
            notifier.observe(&self.directory, &self.keys, &message);
        }

        self.publish_rooms();
        self.publish_active_messages();
        Ok(())
    }

    async fn handle_membership(
        &mut self,
        room_id: &RoomId,
        user: &UserId,
        joined: bool,
    ) -> Result<(), SyncError> {
        if let Err(SyncError::StaleRoom { .. }) =
            self.directory.apply_membership(room_id, user, joined)
        {
            self.refresh_rooms().await?;
        }
        self.rekey(room_id).await;
        self.publish_rooms();
        Ok(())
    }

    /// Rotate the room key after a membership change.
    ///
    /// Only runs when we already hold the room's key (otherwise another
    /// participant owns the rotation). Leavers lose access to the new
    /// version; joiners gain it.
    async fn rekey(&mut self, room_id: &RoomId) {
        let Some(room) = self.directory.get(room_id) else {
            return;
        };
        if !room.encryption_enabled || self.keys.current_version(room_id).is_none() {
            return;
        }

        let provisioned = match self.keys.provision(room, &mut OsRng) {
            Ok(p) => p,
            Err(e) => {
                warn!(room = %room_id, error = %e, "rekey failed");
                return;
            },
        };
        let version = provisioned.version;
        if let Err(e) = self.api.publish_room_keys(room_id, &provisioned).await {
            warn!(room = %room_id, error = %e, "publishing rotated keys failed");
            return;
        }
        if let Some(room) = self.directory.get_mut(room_id) {
            room.encryption_version = version;
        }
        info!(room = %room_id, version, "room key rotated");
    }

    /// Decrypt a cached message body for display.
    ///
    /// # Errors
    ///
    /// [`SyncError::KeyNotFound`] renders as a placeholder upstream.
    pub fn decrypt_body(&self, message: &Message) -> Result<String, SyncError> {
        self.keys.decrypt(&message.room_id, &message.body)
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Run one ephemeral-message sweep.
    pub fn sweep_expired(&mut self, now: Timestamp) -> Vec<ReaperEvent> {
        let events = self.reaper.sweep(now, &mut self.timelines, &mut self.directory);
        if !events.is_empty() {
            self.publish_rooms();
            self.publish_active_messages();
        }
        events
    }

    /// Expire stale typing indicators and flush the trailing stop signal.
    pub async fn poll_timers(&mut self, mono: Instant) {
        let stale = self.typing.sweep(mono);
        if !stale.is_empty() {
            self.publish_typing();
        }

        if let Some(TypingSignal::Stopped) = self.debouncer.tick(mono) {
            if let Some(room_id) = self.directory.active_room_id().cloned() {
                self.publish_typing_signal(&room_id, false).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Run loop
    // ------------------------------------------------------------------

    /// Drive the session until the transport fails fatally or shuts down.
    ///
    /// # Errors
    ///
    /// [`SyncError::Auth`] when the server rejects our credentials.
    pub async fn run(mut self) -> Result<(), SyncError> {
        // One ordered stream of every inbound event. Events for the same
        // room must apply in delivery order (a message and its cross-device
        // read receipt, say), so the kinds are never re-merged from
        // separate subscriptions.
        let mut events = self.transport.subscribe_all();
        let mut connection = self.transport.state();
        // Consume the initial state; only transitions trigger a resync.
        let _ = *connection.borrow_and_update();
        let mut reap = tokio::time::interval(self.config.reaper_interval);
        let mut timers = tokio::time::interval(TIMER_RESOLUTION);

        loop {
            tokio::select! {
                changed = connection.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    let state = *connection.borrow_and_update();
                    if state == ConnectionState::Connected {
                        if let Err(e) = self.resync_after_reconnect().await {
                            warn!(error = %e, "post-reconnect resync failed");
                        }
                    }
                },
                inbound = events.recv() => match inbound {
                    Ok(event) => {
                        match self.handle_event(event, now_ts(), Instant::now()).await {
                            Ok(()) => {},
                            Err(e @ SyncError::Auth { .. }) => return Err(e),
                            Err(e) => warn!(error = %e, "event handling failed"),
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event stream lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
                _ = reap.tick() => {
                    let reaped = self.sweep_expired(now_ts());
                    if !reaped.is_empty() {
                        debug!(events = reaped.len(), "reaper sweep");
                    }
                },
                _ = timers.tick() => self.poll_timers(Instant::now()).await,
            }
        }
    }

    // ------------------------------------------------------------------
    // Watch publication
    // ------------------------------------------------------------------

    // `send_replace` stores the value whether or not anyone is watching
    // yet; a plain `send` fails without receivers, which would lose every
    // update made before the first subscriber attaches.

    fn publish_rooms(&self) {
        self.rooms_tx.send_replace(self.directory.rooms().to_vec());
        self.unread_tx.send_replace(self.directory.total_unread());
    }

    fn publish_active_messages(&self) {
        let messages = self
            .directory
            .active_room_id()
            .and_then(|id| self.timelines.get(id))
            .map(|tl| tl.messages().to_vec())
            .unwrap_or_default();
        self.messages_tx.send_replace(messages);
    }

    fn publish_typing(&self) {
        let typing = self
            .directory
            .active_room_id()
            .map(|id| self.typing.typing_users(id))
            .unwrap_or_default();
        self.typing_tx.send_replace(typing);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", self.directory.local_user())
            .field("rooms", &self.directory.rooms().len())
            .finish_non_exhaustive()
    }
}

/// The other participant of a direct room, denormalized onto messages.
fn direct_peer(room: &Room, local_user: &UserId) -> Option<UserId> {
    if room.kind != palaver_proto::RoomKind::Direct {
        return None;
    }
    room.participants.iter().map(|p| &p.user).find(|u| *u != local_user).cloned()
}
