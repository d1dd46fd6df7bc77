//! Error types for avsync-player
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use avsync_common::events::TransportState;
use thiserror::Error;

/// Main error type for the playback engine
#[derive(Error, Debug)]
pub enum Error {
    /// Decoder reported an audio format outside the supported range
    #[error("Malformed audio format: {0}")]
    MalformedFormat(String),

    /// Audio device rejected a write (negative result code)
    #[error("Audio device write failed with code {code}")]
    DeviceWrite { code: isize },

    /// Audio device could not be opened for a format
    #[error("Failed to open audio device: {0}")]
    DeviceOpen(String),

    /// Transport operation not permitted in the current state
    #[error("Cannot {operation} while {state}")]
    IllegalTransition {
        operation: &'static str,
        state: TransportState,
    },

    /// Decoder errors
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Sample source errors
    #[error("Sample source error: {0}")]
    Source(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(#[from] avsync_common::Error),

    /// A mutex guarding engine state was poisoned by a panicking thread
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    /// Worker thread could not be started or stopped
    #[error("Worker thread error: {0}")]
    Worker(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using avsync-player Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_transition_message() {
        let err = Error::IllegalTransition {
            operation: "flush",
            state: TransportState::Playing,
        };
        assert_eq!(err.to_string(), "Cannot flush while playing");
    }

    #[test]
    fn test_common_error_converts() {
        let err: Error = avsync_common::Error::Config("bad value".to_string()).into();
        assert!(matches!(err, Error::Config(_)));
    }
}
