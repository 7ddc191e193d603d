//! Per-room encryption key management.
//!
//! The manager holds the local user's X25519 key pair and the unwrapped
//! symmetric room keys, indexed by room and encryption version. Old versions
//! stay available so ciphertext recorded under a prior version keeps
//! decrypting after a rekey; only the current version encrypts new messages.
//!
//! Unwrapped keys never leave process memory. The wrapped per-participant
//! copies produced by [`KeyManager::provision`] are the only form handed to
//! the transport or the REST collaborator.

use std::collections::HashMap;

use palaver_crypto::{
    NONCE_SIZE, ParticipantKeyPair, ROOM_KEY_SIZE, RoomKey, SealedBody, WrappedKey, decrypt_body,
    encrypt_body, unwrap_key, wrap_key,
};
use palaver_proto::{MessageBody, Room, RoomId, UserId, WrappedRoomKey};
use rand::{CryptoRng, RngCore};

use crate::error::SyncError;

/// Result of provisioning (or rotating) a room key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedKeys {
    /// The new encryption version.
    pub version: u32,
    /// One wrapped copy per participant, to publish to the backend.
    pub wrapped: Vec<(UserId, WrappedRoomKey)>,
}

/// Key ring for one room: every version we can still decrypt.
#[derive(Debug, Default)]
struct RoomKeyRing {
    current_version: u32,
    keys: HashMap<u32, RoomKey>,
}

/// Holds room keys and the local participant key pair.
pub struct KeyManager {
    key_pair: ParticipantKeyPair,
    rings: HashMap<RoomId, RoomKeyRing>,
}

impl KeyManager {
    /// Create a manager around the local user's key pair.
    pub fn new(key_pair: ParticipantKeyPair) -> Self {
        Self { key_pair, rings: HashMap::new() }
    }

    /// The local public key, for registration with the backend.
    pub fn public_key(&self) -> [u8; 32] {
        self.key_pair.public_bytes()
    }

    /// Generate a fresh room key and wrap it for every participant.
    ///
    /// Re-run whenever membership changes (rekey): the version increments
    /// past both the room's advertised version and anything we hold, the
    /// new key becomes current for outgoing messages, and prior versions
    /// remain decryptable.
    ///
    /// # Errors
    ///
    /// [`SyncError::MissingPublicKey`] if any participant has not registered
    /// a public key; the room key invariant requires exactly one wrapped
    /// copy per participant.
    pub fn provision(
        &mut self,
        room: &Room,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<ProvisionedKeys, SyncError> {
        let ring = self.rings.entry(room.id.clone()).or_default();
        let version = room.encryption_version.max(ring.current_version) + 1;

        let mut key_bytes = [0u8; ROOM_KEY_SIZE];
        rng.fill_bytes(&mut key_bytes);
        let room_key = RoomKey::from_bytes(key_bytes);

        let mut wrapped = Vec::with_capacity(room.participants.len());
        for participant in &room.participants {
            let Some(public_key) = participant.public_key else {
                return Err(SyncError::MissingPublicKey { user: participant.user.clone() });
            };

            let mut ephemeral_seed = [0u8; 32];
            rng.fill_bytes(&mut ephemeral_seed);
            let mut nonce = [0u8; NONCE_SIZE];
            rng.fill_bytes(&mut nonce);

            let wrap = wrap_key(&room_key, public_key, ephemeral_seed, nonce);
            wrapped.push((
                participant.user.clone(),
                WrappedRoomKey {
                    version,
                    ephemeral_public: wrap.ephemeral_public,
                    nonce: wrap.nonce,
                    ciphertext: wrap.ciphertext,
                },
            ));
        }

        ring.keys.insert(version, room_key);
        ring.current_version = version;

        Ok(ProvisionedKeys { version, wrapped })
    }

    /// Unwrap and install a room key addressed to the local user.
    ///
    /// Called when a room snapshot carries our wrapped copy. Installing a
    /// version newer than the current one makes it current.
    pub fn install_wrapped(
        &mut self,
        room_id: &RoomId,
        wrapped: &WrappedRoomKey,
    ) -> Result<(), SyncError> {
        let wrap = WrappedKey {
            ephemeral_public: wrapped.ephemeral_public,
            nonce: wrapped.nonce,
            ciphertext: wrapped.ciphertext.clone(),
        };
        let room_key = unwrap_key(&wrap, &self.key_pair)?;

        let ring = self.rings.entry(room_id.clone()).or_default();
        ring.keys.insert(wrapped.version, room_key);
        ring.current_version = ring.current_version.max(wrapped.version);
        Ok(())
    }

    /// Whether we hold a key for this room at any version.
    pub fn has_room_key(&self, room_id: &RoomId) -> bool {
        self.rings.get(room_id).is_some_and(|ring| !ring.keys.is_empty())
    }

    /// The version new messages will be encrypted under. `None` before
    /// provisioning.
    pub fn current_version(&self, room_id: &RoomId) -> Option<u32> {
        let ring = self.rings.get(room_id)?;
        ring.keys.contains_key(&ring.current_version).then_some(ring.current_version)
    }

    /// Encrypt a message body under the room's current key.
    ///
    /// # Errors
    ///
    /// [`SyncError::KeyNotFound`] if the room has no provisioned key.
    pub fn encrypt(
        &self,
        room_id: &RoomId,
        plaintext: &str,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<MessageBody, SyncError> {
        let ring = self.rings.get(room_id);
        let (version, key) = ring
            .and_then(|r| r.keys.get(&r.current_version).map(|k| (r.current_version, k)))
            .ok_or_else(|| SyncError::KeyNotFound { room_id: room_id.clone(), version: 0 })?;

        let mut nonce = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut nonce);

        let sealed = encrypt_body(plaintext.as_bytes(), key, nonce);
        Ok(MessageBody::Encrypted { version, nonce: sealed.nonce, ciphertext: sealed.ciphertext })
    }

    /// Decrypt a message body recorded under a specific version.
    ///
    /// # Errors
    ///
    /// - [`SyncError::KeyNotFound`] if we never received a wrapped copy for
    ///   that version (the caller renders a placeholder, not a fatal error)
    /// - [`SyncError::Crypto`] if authentication fails
    pub fn decrypt(&self, room_id: &RoomId, body: &MessageBody) -> Result<String, SyncError> {
        // Plaintext passes through untouched.
        let (version, nonce, ciphertext) = match body {
            MessageBody::Plaintext(text) => return Ok(text.clone()),
            MessageBody::Encrypted { version, nonce, ciphertext } => (version, nonce, ciphertext),
        };

        let key = self
            .rings
            .get(room_id)
            .and_then(|ring| ring.keys.get(version))
            .ok_or_else(|| SyncError::KeyNotFound { room_id: room_id.clone(), version: *version })?;

        let sealed = SealedBody { nonce: *nonce, ciphertext: ciphertext.clone() };
        let plaintext = decrypt_body(&sealed, key)?;
        String::from_utf8(plaintext).map_err(|_| {
            SyncError::Crypto(palaver_crypto::CryptoError::DecryptionFailed {
                reason: "plaintext is not valid UTF-8".to_string(),
            })
        })
    }

    /// Drop all key material for a room (on explicit leave).
    pub fn forget_room(&mut self, room_id: &RoomId) {
        self.rings.remove(room_id);
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager").field("rooms", &self.rings.len()).finish()
    }
}
