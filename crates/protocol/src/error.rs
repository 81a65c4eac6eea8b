//! Protocol error types

use thiserror::Error;

/// Wire-level decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A response buffer was shorter than the structure it should carry
    #[error("Short {what} data: needed {needed} bytes, got {available}")]
    ShortData {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    /// Target id outside the addressable range of a bus
    #[error("Invalid target id {0} (valid: 0-15)")]
    InvalidTarget(u8),

    /// Unknown transfer mode name or code
    #[error("Invalid transfer mode: {0}")]
    InvalidTransferMode(String),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
