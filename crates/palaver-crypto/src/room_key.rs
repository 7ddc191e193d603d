//! Message body encryption using XChaCha20-Poly1305.
//!
//! One symmetric [`RoomKey`] per room and encryption version. Nonces are
//! caller-provided 24-byte values; the 192-bit space makes accidental
//! collision negligible as long as callers draw them from a CSPRNG.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Size of a room key in bytes.
pub const ROOM_KEY_SIZE: usize = 32;

/// Size of an XChaCha20 nonce in bytes.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes).
const POLY1305_TAG_SIZE: usize = 16;

/// Symmetric key for one room at one encryption version.
///
/// Held unwrapped only in process memory; zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RoomKey([u8; ROOM_KEY_SIZE]);

impl RoomKey {
    /// Construct from raw key material.
    pub fn from_bytes(bytes: [u8; ROOM_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; ROOM_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("RoomKey(..)")
    }
}

/// An encrypted message body: nonce plus tagged ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBody {
    /// The 24-byte XChaCha20 nonce (the IV).
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the 16-byte Poly1305 tag appended.
    pub ciphertext: Vec<u8>,
}

impl SealedBody {
    /// Plaintext length (ciphertext length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(POLY1305_TAG_SIZE)
    }
}

/// Encrypt a message body under a room key.
///
/// # Security
///
/// - Caller MUST provide a fresh nonce from a CSPRNG per call
/// - Authenticated encryption prevents tampering
pub fn encrypt_body(plaintext: &[u8], key: &RoomKey, nonce: [u8; NONCE_SIZE]) -> SealedBody {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    SealedBody { nonce, ciphertext }
}

/// Decrypt a message body under a room key.
///
/// # Errors
///
/// - `DecryptionFailed`: if the authentication tag or key is incorrect
pub fn decrypt_body(sealed: &SealedBody, key: &RoomKey) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = XNonce::from_slice(&sealed.nonce);

    cipher.decrypt(nonce, sealed.ciphertext.as_slice()).map_err(|_| {
        CryptoError::DecryptionFailed { reason: "authentication failed".to_string() }
    })
}
