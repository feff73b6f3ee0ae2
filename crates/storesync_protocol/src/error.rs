//! Error types for protocol encoding and decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The input ended before a complete frame was read.
    #[error("truncated frame: needed {needed} bytes, had {available}")]
    Truncated {
        /// Bytes required to finish the current field.
        needed: usize,
        /// Bytes remaining in the input.
        available: usize,
    },

    /// A length prefix exceeded the sanity limit.
    #[error("length {length} exceeds maximum of {max}")]
    LengthOverflow {
        /// The declared length.
        length: usize,
        /// The allowed maximum.
        max: usize,
    },

    /// A field held bytes that are not valid UTF-8.
    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 {
        /// Name of the offending field.
        field: &'static str,
    },

    /// The frame's structure did not match the declared record type.
    #[error("invalid structure: {0}")]
    InvalidStructure(String),
}

impl ProtocolError {
    /// Creates an invalid-structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure(message.into())
    }
}
