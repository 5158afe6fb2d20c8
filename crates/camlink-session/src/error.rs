//! Error types for camlink sessions.

use std::time::Duration;

use crate::transport::TransportError;

/// Errors that can occur while configuring or establishing a session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] camlink_rpc::CodecError),

    #[error("Registry error: {0}")]
    Registry(#[from] camlink_rpc::RegistryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Config error: {0}")]
    Config(String),

    /// The transport raised an error notification
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Timed out after {after:?} waiting for {stage}")]
    Timeout {
        stage: &'static str,
        after: Duration,
    },
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ConnectionStatus;

    #[test]
    fn test_error_display_config() {
        let err = SessionError::Config("width must be positive".to_string());
        assert_eq!(err.to_string(), "Config error: width must be positive");
    }

    #[test]
    fn test_error_display_timeout() {
        let err = SessionError::Timeout {
            stage: "client connection",
            after: Duration::from_millis(500),
        };
        assert_eq!(
            err.to_string(),
            "Timed out after 500ms waiting for client connection"
        );
    }

    #[test]
    fn test_error_from_transport() {
        let err: SessionError = TransportError::NotConnected(ConnectionStatus::Stopped).into();
        assert!(matches!(err, SessionError::Transport(_)));
        assert!(err.to_string().contains("stopped"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: SessionError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
        assert!(err.to_string().contains("file missing"));
    }
}
