//! Room-key cryptography for Palaver.
//!
//! Two concerns live here, both pure - random bytes must be provided by the
//! caller, which enables deterministic testing:
//!
//! - Message body encryption with XChaCha20-Poly1305 under a per-room
//!   symmetric [`RoomKey`].
//! - Wrapping a [`RoomKey`] for one participant using X25519 ECDH with an
//!   ephemeral sender key and HKDF-SHA256, so only the holder of the matching
//!   secret can recover it.
//!
//! Unwrapped room keys are zeroized on drop and must never leave process
//! memory; the wrapped form is the only one safe to transmit or cache.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod room_key;
mod wrap;

pub use error::CryptoError;
pub use room_key::{NONCE_SIZE, ROOM_KEY_SIZE, RoomKey, SealedBody, decrypt_body, encrypt_body};
pub use wrap::{ParticipantKeyPair, WrappedKey, unwrap_key, wrap_key};
