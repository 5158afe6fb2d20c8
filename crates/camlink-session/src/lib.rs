//! Camera stream session establishment over a TCP control connection.
//!
//! A device holds a [`TransportServer`] and a [`TransportClient`], at most one
//! of them active. The [`SessionHost`] drains their notifications on one task
//! and dispatches inbound frames through its command registry. The
//! [`SessionOrchestrator`] runs the requesting side: release the server,
//! arm the local video receiver, dial the peer and send `open_camera`.

pub mod config;
pub mod error;
pub mod host;
pub mod media;
pub mod orchestrator;
pub mod transport;

pub use config::Config;
pub use error::{Result, SessionError};
pub use host::SessionHost;
pub use media::{LogOnlyReceiver, LogOnlySender, VideoReceiver, VideoSender};
pub use orchestrator::SessionOrchestrator;
pub use transport::{
    ConnectionStatus, Role, TransportClient, TransportError, TransportEvent, TransportServer,
};
