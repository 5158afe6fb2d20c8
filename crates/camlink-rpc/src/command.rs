//! Typed command payloads.
//!
//! The wire only knows `(command, bytes)`. Commands owned by camlink get a
//! Rust type implementing [`CommandPayload`]; anything else stays raw in
//! [`Command::Other`].

use bytes::Bytes;

use crate::camera::CameraConfig;
use crate::codec::Message;
use crate::error::CodecError;

/// Ask the peer to start its camera and stream to the embedded address
pub const OPEN_CAMERA: &str = "open_camera";

/// A payload type bound to a single command name.
pub trait CommandPayload: Sized {
    const COMMAND: &'static str;

    fn encode_payload(&self) -> Bytes;

    /// # Errors
    ///
    /// Returns a [`CodecError`] if `payload` is not a valid encoding.
    fn decode_payload(payload: &[u8]) -> Result<Self, CodecError>;

    fn to_message(&self) -> Message {
        Message::new(Self::COMMAND, self.encode_payload())
    }

    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedCommand`] if `message` carries another
    /// command, or the payload decode error.
    fn from_message(message: &Message) -> Result<Self, CodecError> {
        if message.command() != Self::COMMAND {
            return Err(CodecError::UnexpectedCommand {
                expected: Self::COMMAND,
                actual: message.command().to_string(),
            });
        }
        Self::decode_payload(message.payload())
    }
}

/// A decoded control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    OpenCamera(CameraConfig),
    /// Command not owned by camlink, kept as raw bytes
    Other { name: String, payload: Bytes },
}

impl Command {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::OpenCamera(_) => OPEN_CAMERA,
            Self::Other { name, .. } => name,
        }
    }

    /// # Errors
    ///
    /// Returns a [`CodecError`] if the message names a known command but its
    /// payload does not decode.
    pub fn from_message(message: Message) -> Result<Self, CodecError> {
        match message.command() {
            OPEN_CAMERA => Ok(Self::OpenCamera(CameraConfig::decode_payload(
                message.payload(),
            )?)),
            _ => {
                let (name, payload) = message.into_parts();
                Ok(Self::Other { name, payload })
            }
        }
    }

    #[must_use]
    pub fn into_message(self) -> Message {
        match self {
            Self::OpenCamera(config) => config.to_message(),
            Self::Other { name, payload } => Message::new(name, payload),
        }
    }
}

impl From<CameraConfig> for Command {
    fn from(config: CameraConfig) -> Self {
        Self::OpenCamera(config)
    }
}
