//! Wire encoding errors.

use thiserror::Error;

/// Errors from encoding or decoding wire events.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// CBOR encoding failed.
    #[error("event encode failed: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("event decode failed: {0}")]
    Decode(String),
}
