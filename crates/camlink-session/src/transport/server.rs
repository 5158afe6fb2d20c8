//! Listening transport role.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::{ConnectionEnd, ConnectionStatus, Link, Role, TransportError, TransportEvent};

/// Accepts one peer at a time on a TCP port.
///
/// When a peer hangs up the server raises `Disconnected`, goes back to
/// `Starting` and waits for the next peer on the same listening socket.
#[derive(Debug, Clone)]
pub struct TransportServer {
    link: Arc<Link>,
}

impl TransportServer {
    /// Create an idle server and the receiver for its notifications.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (link, events) = Link::new(Role::Server);
        (Self { link }, events)
    }

    /// Listen on `port` on all interfaces. Port 0 picks a free port, reported
    /// through [`TransportEvent::Started`].
    ///
    /// Bind and accept failures are reported as [`TransportEvent::Error`].
    pub async fn start(&self, port: u16) {
        info!("Starting server on port {}", port);
        self.link
            .start(move |link| async move { listen(link, port).await })
            .await;
    }

    pub async fn stop(&self) {
        self.link.stop().await;
    }

    /// Queue `bytes` for the connected peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] unless a peer is connected.
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

    pub async fn listening_port(&self) -> Option<u16> {
        self.link.state.lock().await.listening_port
    }

    pub async fn peer_addr(&self) -> Option<SocketAddr> {
        self.link.state.lock().await.peer_addr
    }

    pub async fn last_error(&self) -> Option<String> {
        self.link.state.lock().await.last_error.clone()
    }

    /// Hang up on the peer of connection number `connection` and go back
    /// to accepting, leaving the listening socket open. Connections are
    /// numbered from 1 in the order they were accepted. Returns `false` if
    /// that connection is already gone.
    pub async fn close_connection(&self, connection: u64) -> bool {
        self.link.close_connection(connection).await
    }
}

async fn listen(link: Arc<Link>, port: u16) {
    let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
        Ok(listener) => listener,
        Err(e) => {
            link.fail(format!("bind to port {port} failed: {e}")).await;
            return;
        }
    };

    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            link.fail(format!("listener address unavailable: {e}")).await;
            return;
        }
    };

    link.state.lock().await.listening_port = Some(port);
    info!("Server listening on port {}", port);
    link.emit(TransportEvent::Started { port });

    loop {
        let stream = match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Accepted connection from {}", addr);
                stream
            }
            Err(e) => {
                link.fail(format!("accept failed: {e}")).await;
                return;
            }
        };

        match link.run_connection(stream).await {
            ConnectionEnd::PeerClosed | ConnectionEnd::Dropped => {
                link.connection_closed(ConnectionStatus::Starting).await;
            }
            ConnectionEnd::Failed(message) => {
                link.fail(message).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

    async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(EVENT_TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn started_server() -> (TransportServer, mpsc::UnboundedReceiver<TransportEvent>, u16) {
        let (server, mut events) = TransportServer::new();
        server.start(0).await;
        let TransportEvent::Started { port } = next_event(&mut events).await else {
            panic!("Expected Started");
        };
        (server, events, port)
    }

    #[tokio::test]
    async fn test_server_lifecycle() {
        let (server, mut events, port) = started_server().await;
        assert_ne!(port, 0);
        assert_eq!(server.status(), ConnectionStatus::Starting);
        assert_eq!(server.listening_port().await, Some(port));

        let mut peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
        assert_eq!(server.status(), ConnectionStatus::Connected);
        assert!(server.peer_addr().await.is_some());

        peer.write_all(b"hello").await.unwrap();
        let mut received = Vec::new();
        while received.len() < 5 {
            let TransportEvent::DataReceived(bytes) = next_event(&mut events).await else {
                panic!("Expected DataReceived");
            };
            received.extend_from_slice(&bytes);
        }
        assert_eq!(received, b"hello");

        drop(peer);
        assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);
        assert_eq!(server.status(), ConnectionStatus::Starting);

        server.stop().await;
        assert_eq!(next_event(&mut events).await, TransportEvent::Stopped);
        assert_eq!(server.status(), ConnectionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_server_send_to_peer() {
        let (server, mut events, port) = started_server().await;
        let mut peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

        server.send(&b"ab"[..]).await.unwrap();
        server.send(&b"cd"[..]).await.unwrap();

        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abcd");
    }

    #[tokio::test]
    async fn test_server_send_before_connected() {
        let (server, _events, _port) = started_server().await;
        let result = server.send(&b"early"[..]).await;
        assert_eq!(
            result,
            Err(TransportError::NotConnected(ConnectionStatus::Starting))
        );
    }

    #[tokio::test]
    async fn test_server_stop_releases_port() {
        let (server, mut events, port) = started_server().await;
        let _peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

        server.stop().await;
        assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);
        assert_eq!(next_event(&mut events).await, TransportEvent::Stopped);
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
        assert_eq!(server.listening_port().await, None);

        // Idempotent
        server.stop().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_server_close_connection_keeps_listening() {
        let (server, mut events, port) = started_server().await;
        let mut first = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

        assert!(server.close_connection(1).await);
        assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);
        assert_eq!(server.status(), ConnectionStatus::Starting);
        let mut buf = [0u8; 1];
        assert_eq!(first.read(&mut buf).await.unwrap(), 0);

        let _second = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
        assert!(!server.close_connection(1).await);
        assert_eq!(server.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_server_bind_failure_is_reported() {
        let occupied = TcpListener::bind(("0.0.0.0", 0)).await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let (server, mut events) = TransportServer::new();
        server.start(port).await;

        let TransportEvent::Error(message) = next_event(&mut events).await else {
            panic!("Expected Error");
        };
        assert!(message.contains("bind"));
        assert_eq!(server.status(), ConnectionStatus::Errored);
        assert_eq!(server.last_error().await, Some(message));
    }

    #[tokio::test]
    async fn test_server_restart_after_error() {
        let occupied = TcpListener::bind(("0.0.0.0", 0)).await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let (server, mut events) = TransportServer::new();
        server.start(port).await;
        assert!(matches!(next_event(&mut events).await, TransportEvent::Error(_)));

        drop(occupied);
        server.start(port).await;
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Started { port }
        );
        assert_eq!(server.last_error().await, None);
        server.stop().await;
    }
}
