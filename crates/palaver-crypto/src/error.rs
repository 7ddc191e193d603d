//! Crypto error types.

use thiserror::Error;

/// Errors from room-key operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Authentication failed on a message body (tampering or wrong key).
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// What went wrong.
        reason: String,
    },

    /// A wrapped room key could not be recovered.
    #[error("key unwrap failed: {reason}")]
    UnwrapFailed {
        /// What went wrong.
        reason: String,
    },

    /// Key material had the wrong length.
    #[error("invalid key material: expected {expected} bytes, got {actual}")]
    InvalidKeyMaterial {
        /// Required length in bytes.
        expected: usize,
        /// Provided length in bytes.
        actual: usize,
    },
}
