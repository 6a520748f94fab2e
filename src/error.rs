//! Crate-wide error types
//!
//! Codec errors are always recovered locally: the dispatch loop converts
//! them into a well-formed error reply and keeps serving. `BrokerError`
//! covers the few conditions that are fatal for the broker process itself
//! (endpoint creation and child spawn at startup).

use std::path::PathBuf;

/// Convenience result alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Wire-level decode failure
///
/// Produced by the codecs in `protocol` and `xpc::wire`. Never propagated
/// as a crash; the dispatcher answers the offending client and moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Declared length disagrees with the bytes actually received
    Truncated { declared: usize, actual: usize },
    /// Structurally invalid message (bad descriptor count, bad magic, ...)
    Malformed(&'static str),
    /// Unknown type marker in a self-describing payload
    UnknownMarker(u32),
    /// Message ID outside every recognized protocol family
    BadMessageId(i32),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Truncated { declared, actual } => {
                write!(f, "truncated message: declared {declared} bytes, got {actual}")
            }
            CodecError::Malformed(what) => write!(f, "malformed message: {what}"),
            CodecError::UnknownMarker(marker) => {
                write!(f, "unknown payload type marker 0x{marker:x}")
            }
            CodecError::BadMessageId(id) => write!(f, "unrecognized message id {id}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Process-level broker failure
#[derive(Debug)]
pub enum BrokerError {
    /// I/O failure outside the spawn path
    Io(std::io::Error),
    /// The supervised child could not be spawned
    Spawn { path: PathBuf, source: std::io::Error },
    /// The broker's primary endpoint is gone (all send rights dropped)
    EndpointClosed,
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::Io(e) => write!(f, "i/o error: {e}"),
            BrokerError::Spawn { path, source } => {
                write!(f, "failed to spawn {}: {source}", path.display())
            }
            BrokerError::EndpointClosed => write!(f, "broker endpoint closed"),
        }
    }
}

impl std::error::Error for BrokerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BrokerError::Io(e) => Some(e),
            BrokerError::Spawn { source, .. } => Some(source),
            BrokerError::EndpointClosed => None,
        }
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self {
        BrokerError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_display() {
        let e = CodecError::Truncated { declared: 160, actual: 40 };
        assert_eq!(e.to_string(), "truncated message: declared 160 bytes, got 40");
    }

    #[test]
    fn test_bad_message_id_display() {
        let e = CodecError::BadMessageId(999);
        assert!(e.to_string().contains("999"));
    }
}
