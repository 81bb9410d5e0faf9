//! Error types for reference parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating references.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The reference string is empty.
    #[error("reference cannot be empty")]
    Empty,

    /// The reference contains a character that cannot appear in a path segment.
    #[error("invalid character {character:?} in {kind} reference '{actual}'")]
    InvalidCharacter {
        kind: &'static str,
        character: char,
        actual: String,
    },

    /// The UUID portion of an identity is invalid.
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }
}
