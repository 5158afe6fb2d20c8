//! Error types for the camlink-rpc crate.
//!
//! Codec and registry failures are local and recoverable: the codec reports
//! them as [`CodecError`], the registry as [`RegistryError`], and
//! [`Error`] unifies both for callers that do not care which layer failed.

use crate::codec::MAX_FRAME_SIZE;

/// Errors produced while decoding a frame or a command payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Truncated buffer: need at least {needed} bytes, got {available}")]
    TruncatedBuffer { needed: usize, available: usize },

    #[error("Invalid {field} length {declared} ({remaining} bytes remaining)")]
    InvalidLength {
        field: &'static str,
        declared: i64,
        remaining: usize,
    },

    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("Invalid value {value} for {field}")]
    InvalidValue { field: &'static str, value: i32 },

    #[error("Unexpected command: expected {expected}, got {actual:?}")]
    UnexpectedCommand {
        expected: &'static str,
        actual: String,
    },
}

/// Errors produced by the command registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// Unified error type for camlink-rpc operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_buffer_display() {
        let err = CodecError::TruncatedBuffer {
            needed: 8,
            available: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("Truncated"));
        assert!(msg.contains('8'));
        assert!(msg.contains('4'));
    }

    #[test]
    fn test_invalid_length_display() {
        let err = CodecError::InvalidLength {
            field: "command",
            declared: -1,
            remaining: 12,
        };
        assert_eq!(
            err.to_string(),
            "Invalid command length -1 (12 bytes remaining)"
        );
    }

    #[test]
    fn test_frame_too_large_display() {
        let err = CodecError::FrameTooLarge(20_000_000);
        let msg = err.to_string();
        assert!(msg.contains("20000000"));
        assert!(msg.contains("too large"));
    }

    #[test]
    fn test_unexpected_command_display() {
        let err = CodecError::UnexpectedCommand {
            expected: "open_camera",
            actual: "ping".to_string(),
        };
        assert!(err.to_string().contains("open_camera"));
        assert!(err.to_string().contains("\"ping\""));
    }

    #[test]
    fn test_error_from_codec_error() {
        let err: Error = CodecError::InvalidUtf8 { field: "command" }.into();
        assert!(matches!(err, Error::Codec(_)));
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn test_error_from_registry_error() {
        let err: Error = RegistryError::InvalidArgument("command name cannot be empty").into();
        assert!(matches!(err, Error::Registry(_)));
        assert_eq!(
            err.to_string(),
            "Registry error: Invalid argument: command name cannot be empty"
        );
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_error() -> Result<()> {
            Err(RegistryError::InvalidArgument("x").into())
        }

        assert!(matches!(returns_error(), Err(Error::Registry(_))));
    }
}
