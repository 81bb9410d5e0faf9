//! Error types for protocol encoding and decoding.

use thiserror::Error;

use crate::kinds::MessageKind;

/// Errors that can occur while reading, writing, or decoding frames.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame exceeded the maximum allowed size.
    #[error("frame of {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// A frame or payload was not valid JSON for its type.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A payload was decoded against the wrong message kind.
    #[error("expected {expected} payload, got {actual}")]
    UnexpectedKind {
        expected: MessageKind,
        actual: String,
    },
}
