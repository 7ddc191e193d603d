//! Room-key wrapping for participants.
//!
//! A room key is wrapped for each participant with an ephemeral X25519
//! ECDH agreement against that participant's static public key. The shared
//! secret is run through HKDF-SHA256 to produce a key-encryption key, which
//! seals the room key with XChaCha20-Poly1305. One ephemeral key per wrap:
//! compromise of a later room key does not expose earlier wraps.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::{
    error::CryptoError,
    room_key::{NONCE_SIZE, ROOM_KEY_SIZE, RoomKey},
};

/// Domain separation label for the wrapping KEK derivation.
const WRAP_KDF_INFO: &[u8] = b"palaver room key wrap v1";

/// A participant's long-lived X25519 key pair.
///
/// The public half is registered with the backend so other participants can
/// wrap room keys for this user. The secret half never leaves the process;
/// `x25519_dalek::StaticSecret` zeroizes its memory on drop.
pub struct ParticipantKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl ParticipantKeyPair {
    /// Construct from 32 bytes of caller-provided CSPRNG output.
    ///
    /// Clamping is performed internally by `x25519-dalek` during scalar
    /// multiplication, so the raw bytes are stored as-is.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let secret = StaticSecret::from(seed);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The raw 32-byte public key, safe to publish.
    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }
}

impl std::fmt::Debug for ParticipantKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantKeyPair").field("public", &self.public_bytes()).finish()
    }
}

/// A room key sealed for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    /// The wrap's ephemeral X25519 public key.
    pub ephemeral_public: [u8; 32],
    /// Nonce for the wrapping AEAD.
    pub nonce: [u8; NONCE_SIZE],
    /// Wrapped key material with the 16-byte Poly1305 tag appended.
    pub ciphertext: Vec<u8>,
}

/// Wrap a room key for a participant's public key.
///
/// `ephemeral_seed` and `nonce` MUST come from a CSPRNG and MUST NOT be
/// reused across wraps.
pub fn wrap_key(
    room_key: &RoomKey,
    recipient_public: [u8; 32],
    ephemeral_seed: [u8; 32],
    nonce: [u8; NONCE_SIZE],
) -> WrappedKey {
    let ephemeral = StaticSecret::from(ephemeral_seed);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&PublicKey::from(recipient_public));

    let kek = derive_kek(shared.as_bytes(), ephemeral_public.as_bytes(), &recipient_public);
    let cipher = XChaCha20Poly1305::new(kek.as_slice().into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), room_key.as_bytes().as_slice())
    else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    WrappedKey { ephemeral_public: *ephemeral_public.as_bytes(), nonce, ciphertext }
}

/// Unwrap a room key using this participant's secret key.
///
/// # Errors
///
/// - `UnwrapFailed`: the wrap was not addressed to this key pair, or the
///   ciphertext was tampered with
/// - `InvalidKeyMaterial`: the recovered plaintext is not a room key
pub fn unwrap_key(
    wrapped: &WrappedKey,
    key_pair: &ParticipantKeyPair,
) -> Result<RoomKey, CryptoError> {
    let shared = key_pair.secret.diffie_hellman(&PublicKey::from(wrapped.ephemeral_public));

    let kek = derive_kek(shared.as_bytes(), &wrapped.ephemeral_public, &key_pair.public_bytes());
    let cipher = XChaCha20Poly1305::new(kek.as_slice().into());

    let plaintext = Zeroizing::new(
        cipher
            .decrypt(XNonce::from_slice(&wrapped.nonce), wrapped.ciphertext.as_slice())
            .map_err(|_| CryptoError::UnwrapFailed {
                reason: "authentication failed".to_string(),
            })?,
    );

    let bytes: [u8; ROOM_KEY_SIZE] =
        plaintext.as_slice().try_into().map_err(|_| CryptoError::InvalidKeyMaterial {
            expected: ROOM_KEY_SIZE,
            actual: plaintext.len(),
        })?;

    Ok(RoomKey::from_bytes(bytes))
}

/// Derive the key-encryption key from the ECDH shared secret.
///
/// Both public keys are bound into the salt so a wrap cannot be replayed
/// against a different recipient.
fn derive_kek(shared: &[u8; 32], ephemeral_public: &[u8; 32], recipient_public: &[u8; 32]) -> Zeroizing<[u8; 32]> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral_public);
    salt[32..].copy_from_slice(recipient_public);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut kek = Zeroizing::new([0u8; 32]);
    let Ok(()) = hk.expand(WRAP_KDF_INFO, kek.as_mut()) else {
        unreachable!("HKDF expand cannot fail for a 32-byte output");
    };
    kek
}
