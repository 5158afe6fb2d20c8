//! Control protocol shared by camlink peers.
//!
//! Peers exchange length-prefixed `(command, payload)` frames over a TCP
//! control connection. This crate owns everything that does not touch a
//! socket:
//!
//! - [`codec`]: frame encoding, decoding and splitting
//! - [`camera`]: the `open_camera` request payload
//! - [`command`]: typed command payloads and the [`Command`] union
//! - [`registry`]: routing of decoded frames to handlers
//! - [`error`]: error types and the `Result` alias
//!
//! # Example
//!
//! ```
//! use camlink_rpc::{CameraConfig, CommandRegistry, RenderMode, StreamParameters, CommandPayload};
//!
//! let mut registry = CommandRegistry::new();
//! registry
//!     .register_typed(|config: CameraConfig| {
//!         println!("stream to {}:{}", config.ip, config.port);
//!     })
//!     .unwrap();
//!
//! let request = CameraConfig::from_parameters(
//!     StreamParameters::default(),
//!     false,
//!     RenderMode::Stereo,
//!     "PICO4U",
//!     "192.168.1.20",
//!     12345,
//! );
//! let frame = request.to_message().encode().unwrap();
//! assert!(registry.dispatch_serialized(&frame));
//! ```

pub mod camera;
pub mod codec;
pub mod command;
pub mod error;
pub mod registry;

pub use camera::{CameraConfig, RenderMode, StreamParameters};
pub use codec::{
    HEADER_SIZE, MAX_FRAME_SIZE, Message, decode, encode, frame_len, is_complete_message,
    minimum_size, split_frame,
};
pub use command::{Command, CommandPayload, OPEN_CAMERA};
pub use error::{CodecError, Error, RegistryError, Result};
pub use registry::{CommandHandler, CommandRegistry};
