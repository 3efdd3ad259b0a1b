//! Error types for corebus.

use thiserror::Error;

/// Main error type for all corebus operations.
///
/// Framing-level anomalies (bad checksum, truncated frame, unmatched bytes)
/// are recovered locally by the frame router and never surface here; callers
/// see either a decoded field mapping or a timeout-kind error.
#[derive(Debug, Error)]
pub enum CorebusError {
    /// No matching response within the timeout window, or the primary
    /// channel itself timed out.
    #[error("Communication timed out: {0}")]
    Timeout(String),

    /// An addressed call was attempted while transparent mode was inactive.
    #[error("Transparent mode not active")]
    TransparentModeInactive,

    /// A dotted-decimal address string could not be parsed.
    #[error("Invalid address `{0}`: expected {1} dot-separated parts, 0 <= part <= 255")]
    InvalidAddress(String, usize),

    /// A field value was missing, of the wrong type, or out of limits.
    #[error("Invalid field value: {0}")]
    InvalidValue(String),

    /// Protocol error (malformed spec, out-of-bounds memory address, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error from the primary channel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using CorebusError.
pub type Result<T> = std::result::Result<T, CorebusError>;
