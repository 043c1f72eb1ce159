//! Protocol error types.
//!
//! Two layers: [`DecodeError`] covers structural failures while parsing bytes
//! (truncation, unknown tags, version mismatch). [`ProtocolError`] wraps it
//! and adds envelope validation and catalog-level failures.

use std::fmt;

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Structural failure while parsing a byte sequence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before a value was complete
    #[error("input truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the value being decoded
        needed: usize,
        /// Bytes left in the input
        remaining: usize,
    },

    /// Leading version token did not match
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version token this decoder speaks
        expected: &'static str,
        /// Token found in the input
        actual: String,
    },

    /// Value type tag has no decoder
    #[error("unknown value type tag {0:#04x}")]
    UnknownTag(u8),

    /// String bytes were not valid UTF-8
    #[error("invalid UTF-8 in string value")]
    InvalidUtf8,

    /// Header field carried a value of the wrong kind
    #[error("header field '{field}' has unexpected type {actual}")]
    HeaderField {
        /// Header field name
        field: &'static str,
        /// Kind that was found
        actual: &'static str,
    },

    /// Declared payload field count was negative
    #[error("negative payload field count: {0}")]
    NegativeFieldCount(i32),
}

/// Envelope validation check that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// Payload length against the expected arity
    PayloadArity,
    /// Payload element at this index was the absent marker
    AbsentField(usize),
    /// Message type tag
    MessageType,
    /// Receiver identity
    Receiver,
    /// Declared field count against the values actually present
    FieldCount,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadArity => write!(f, "payload arity"),
            Self::AbsentField(index) => write!(f, "payload field {index}"),
            Self::MessageType => write!(f, "message type"),
            Self::Receiver => write!(f, "receiver id"),
            Self::FieldCount => write!(f, "payload field count"),
        }
    }
}

/// Errors raised by the envelope codec and the message catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A value could not be encoded (unsupported or absent)
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The byte sequence could not be decoded
    #[error("decoding error: {0}")]
    Decoding(#[from] DecodeError),

    /// A decoded envelope failed validation
    #[error("protocol violation: {check} expected {expected}, got {actual}")]
    Violation {
        /// Which check failed
        check: Check,
        /// Expected value
        expected: String,
        /// Observed value
        actual: String,
    },

    /// Message type tag is not in the catalog
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// Known message type with missing or mistyped fields
    #[error("schema violation in {message_type}: {reason}")]
    SchemaViolation {
        /// Catalog tag of the message
        message_type: &'static str,
        /// What was wrong
        reason: String,
    },
}

impl ProtocolError {
    /// Build a validation failure.
    pub fn violation(check: Check, expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::Violation { check, expected: expected.to_string(), actual: actual.to_string() }
    }

    /// Build a schema failure for the given catalog tag.
    pub fn schema(message_type: &'static str, reason: impl Into<String>) -> Self {
        Self::SchemaViolation { message_type, reason: reason.into() }
    }

    /// Returns true for failures raised while parsing raw bytes.
    pub fn is_decoding(&self) -> bool {
        matches!(self, Self::Decoding(_))
    }
}
