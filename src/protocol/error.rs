//! Protocol error types

use std::fmt;

/// Errors that can occur while parsing a subscriber request.
///
/// All of these are recoverable: the decoder discards the offending bytes and
/// the connection stays open for subsequent requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Inline request exceeds the configured maximum length
    InlineTooLarge,
    /// Multibulk element count line is not a valid number or exceeds the limit
    InvalidMultibulkLength,
    /// Bulk length line is not a valid number or exceeds the limit
    InvalidBulkLength,
    /// Expected a `$<len>` bulk header, got something else
    ExpectedBulkHeader(u8),
    /// Inline request has an unterminated quoted token
    UnbalancedQuotes,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InlineTooLarge => write!(f, "too big inline request"),
            Self::InvalidMultibulkLength => write!(f, "invalid multibulk length"),
            Self::InvalidBulkLength => write!(f, "invalid bulk length"),
            Self::ExpectedBulkHeader(b) => {
                write!(f, "expected '$', got '{}'", char::from(*b).escape_default())
            }
            Self::UnbalancedQuotes => write!(f, "unbalanced quotes in request"),
        }
    }
}

impl std::error::Error for ProtocolError {}
