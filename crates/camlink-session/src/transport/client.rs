//! Dialing transport role.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::info;

use super::{ConnectionEnd, ConnectionStatus, Link, Role, TransportError, TransportEvent};

/// Dials a single peer and carries bytes to and from it.
///
/// The client does not reconnect. A peer hang-up leaves it `Stopped`, a
/// refused or failed connection leaves it `Errored`.
#[derive(Debug, Clone)]
pub struct TransportClient {
    link: Arc<Link>,
}

impl TransportClient {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (link, events) = Link::new(Role::Client);
        (Self { link }, events)
    }

    /// Begin connecting to `host:port`. Returns once the attempt is underway;
    /// the outcome arrives as [`TransportEvent::Connected`] or
    /// [`TransportEvent::Error`].
    pub async fn start(&self, host: impl Into<String>, port: u16) {
        let host = host.into();
        info!("Connecting to {}:{}", host, port);
        self.link
            .start(move |link| async move { connect(link, host, port).await })
            .await;
    }

    pub async fn stop(&self) {
        self.link.stop().await;
    }

    /// Queue `bytes` for the peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] unless connected.
    pub async fn send(&self, bytes: impl Into<Bytes>) -> Result<(), TransportError> {
        self.link.send(bytes.into()).await
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.link.status()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.link.status.subscribe()
    }

    /// Address of our end of the connection, while connected.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.link.state.lock().await.local_addr
    }

    pub async fn peer_addr(&self) -> Option<SocketAddr> {
        self.link.state.lock().await.peer_addr
    }

    pub async fn last_error(&self) -> Option<String> {
        self.link.state.lock().await.last_error.clone()
    }

    /// Hang up connection number `connection`, numbered from 1 in the order
    /// connections were established. Returns `false` if that connection is
    /// already gone.
    pub async fn close_connection(&self, connection: u64) -> bool {
        self.link.close_connection(connection).await
    }
}

async fn connect(link: Arc<Link>, host: String, port: u16) {
    let stream = match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => stream,
        Err(e) => {
            link.fail(format!("connect to {host}:{port} failed: {e}")).await;
            return;
        }
    };

    match link.run_connection(stream).await {
        ConnectionEnd::PeerClosed | ConnectionEnd::Dropped => {
            link.connection_closed(ConnectionStatus::Stopped).await;
        }
        ConnectionEnd::Failed(message) => link.fail(message).await,
    }
}
