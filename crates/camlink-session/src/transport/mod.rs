//! TCP control transport roles.
//!
//! A device holds one [`TransportServer`] and one [`TransportClient`]. Each
//! role owns at most one TCP connection, reports its lifecycle through a
//! channel of [`TransportEvent`]s and exposes its [`ConnectionStatus`] through
//! a watch channel so callers can wait on transitions instead of sleeping.
//!
//! Notifications are produced on the role's own I/O task. They reach the
//! owner only through the event channel, so handling them is always
//! marshalled onto whichever task drains that channel.
//!
//! ```text
//! Idle --start--> Starting --connected--> Connected --stop/peer close--> Stopped
//!                    |                        |
//!                    +-------- error ---------+--> Errored (until next start)
//! ```
//!
//! Nothing here prevents both roles from being active at once. The session
//! orchestrator keeps them mutually exclusive.

mod client;
mod server;

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{BytesCodec, Framed};
use tracing::{debug, info, trace, warn};

pub use client::TransportClient;
pub use server::TransportServer;

/// Connection status of a transport role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    /// Listening for a peer (server) or dialing one (client)
    Starting,
    Connected,
    Stopped,
    Errored,
}

impl ConnectionStatus {
    /// Whether the role currently holds a socket.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Connected => "connected",
            Self::Stopped => "stopped",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Notifications raised by a transport role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Server is listening on `port`
    Started { port: u16 },
    Connected,
    /// Bytes in arrival order, not aligned to message frames
    DataReceived(Bytes),
    Disconnected,
    /// Server released its listening socket
    Stopped,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}

/// Identifies one TCP connection in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors returned synchronously by transport operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Not connected (status: {0})")]
    NotConnected(ConnectionStatus),

    #[error("Connection closed")]
    Closed,
}

/// Mutable per-role state, guarded by [`Link::state`].
#[derive(Debug, Default)]
struct LinkState {
    task: Option<JoinHandle<()>>,
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    listening_port: Option<u16>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    last_error: Option<String>,
    /// Connections established since the link was created
    connections: u64,
}

/// State and notification plumbing shared by a role handle and its I/O task.
#[derive(Debug)]
struct Link {
    role: Role,
    status: watch::Sender<ConnectionStatus>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Mutex<LinkState>,
}

/// How a connected session ended.
enum ConnectionEnd {
    PeerClosed,
    /// Closed locally through [`Link::close_connection`]
    Dropped,
    Failed(String),
}

impl Link {
    fn new(role: Role) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        let link = Arc::new(Self {
            role,
            status,
            events,
            state: Mutex::new(LinkState::default()),
        });
        (link, events_rx)
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            trace!("{} status: {} -> {}", self.role, previous, status);
        }
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            trace!("{} event dropped, no listener", self.role);
        }
    }

    /// Replace any running I/O task with `run` and enter `Starting`.
    async fn start<F, Fut>(self: &Arc<Self>, run: F)
    where
        F: FnOnce(Arc<Link>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.status().is_active() {
            warn!("{} restarted while {}", self.role, self.status());
            self.stop().await;
        }

        let mut state = self.state.lock().await;
        if let Some(task) = state.task.take() {
            task.abort();
            let _ = task.await;
        }
        state.last_error = None;
        self.set_status(ConnectionStatus::Starting);
        state.task = Some(tokio::spawn(run(self.clone())));
    }

    /// Tear down the connection and release the socket. Idempotent.
    ///
    /// Returns once the I/O task is gone, so the socket is closed and any
    /// listening port is free again.
    async fn stop(&self) {
        let mut state = self.state.lock().await;
        if let Some(task) = state.task.take() {
            task.abort();
            let _ = task.await;
        }
        // Queued but unsent bytes go down with the channel
        state.outbound = None;
        state.listening_port = None;
        state.local_addr = None;
        state.peer_addr = None;

        match self.status() {
            ConnectionStatus::Connected => {
                self.set_status(ConnectionStatus::Stopped);
                self.emit(TransportEvent::Disconnected);
            }
            ConnectionStatus::Starting => self.set_status(ConnectionStatus::Stopped),
            status => {
                debug!("{} stop ignored, already {}", self.role, status);
                return;
            }
        }

        if self.role == Role::Server {
            self.emit(TransportEvent::Stopped);
        }
        info!("{} stopped", self.role);
    }

    async fn send(&self, bytes: Bytes) -> Result<(), TransportError> {
        let state = self.state.lock().await;
        let status = self.status();
        if status != ConnectionStatus::Connected {
            return Err(TransportError::NotConnected(status));
        }
        let Some(outbound) = &state.outbound else {
            return Err(TransportError::NotConnected(status));
        };

        trace!("{} queued {} bytes", self.role, bytes.len());
        outbound.send(bytes).map_err(|_| TransportError::Closed)
    }

    /// Record a terminal failure and notify.
    async fn fail(&self, message: String) {
        warn!("{} error: {}", self.role, message);
        let mut state = self.state.lock().await;
        state.outbound = None;
        state.listening_port = None;
        state.local_addr = None;
        state.peer_addr = None;
        state.last_error = Some(message.clone());
        self.set_status(ConnectionStatus::Errored);
        self.emit(TransportEvent::Error(message));
    }

    /// Pump one connected stream until it closes or fails.
    ///
    /// Queued sends are written in FIFO order. Inbound bytes are forwarded as
    /// [`TransportEvent::DataReceived`] exactly as they come off the socket.
    async fn run_connection(&self, stream: TcpStream) -> ConnectionEnd {
        let id = ConnectionId::new();
        if let Err(e) = stream.set_nodelay(true) {
            debug!("[{}] Failed to set TCP_NODELAY: {}", id, e);
        }
        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();
        let (tx, mut outbound) = mpsc::unbounded_channel::<Bytes>();

        {
            let mut state = self.state.lock().await;
            state.outbound = Some(tx);
            state.connections += 1;
            state.local_addr = local_addr;
            state.peer_addr = peer_addr;
            self.set_status(ConnectionStatus::Connected);
            self.emit(TransportEvent::Connected);
        }
        info!("[{}] {} connected to {:?}", id, self.role, peer_addr);

        let (mut sink, mut stream) = Framed::new(stream, BytesCodec::new()).split();

        let end = loop {
            tokio::select! {
                queued = outbound.recv() => match queued {
                    Some(bytes) => {
                        trace!("[{}] sending {} bytes", id, bytes.len());
                        if let Err(e) = sink.send(bytes).await {
                            break ConnectionEnd::Failed(format!("send failed: {e}"));
                        }
                    }
                    None => break ConnectionEnd::Dropped,
                },
                frame = stream.next() => match frame {
                    Some(Ok(data)) => {
                        trace!("[{}] received {} bytes", id, data.len());
                        self.emit(TransportEvent::DataReceived(data.freeze()));
                    }
                    Some(Err(e)) => break ConnectionEnd::Failed(format!("read failed: {e}")),
                    None => break ConnectionEnd::PeerClosed,
                },
            }
        };

        match end {
            ConnectionEnd::PeerClosed => {
                info!("[{}] {} peer closed the connection", id, self.role);
            }
            ConnectionEnd::Dropped => info!("[{}] {} dropped the connection", id, self.role),
            ConnectionEnd::Failed(_) => {}
        }
        end
    }

    /// Drop connection number `connection` (1-based, counted from link
    /// creation) if it is still the current one. Returns whether it was.
    ///
    /// Closing the outbound queue ends the connection loop once everything
    /// already queued has been written.
    async fn close_connection(&self, connection: u64) -> bool {
        let mut state = self.state.lock().await;
        if state.connections != connection || state.outbound.is_none() {
            debug!(
                "{} connection {} already gone, nothing to close",
                self.role, connection
            );
            return false;
        }
        state.outbound = None;
        true
    }

    /// Clear connection state after the connection ended cleanly and enter
    /// `status`.
    async fn connection_closed(&self, status: ConnectionStatus) {
        let mut state = self.state.lock().await;
        state.outbound = None;
        state.local_addr = None;
        state.peer_addr = None;
        self.set_status(status);
        self.emit(TransportEvent::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_active() {
        assert!(ConnectionStatus::Starting.is_active());
        assert!(ConnectionStatus::Connected.is_active());
        assert!(!ConnectionStatus::Idle.is_active());
        assert!(!ConnectionStatus::Stopped.is_active());
        assert!(!ConnectionStatus::Errored.is_active());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
        assert_eq!(ConnectionStatus::Errored.to_string(), "errored");
    }

    #[test]
    fn test_not_connected_display() {
        let err = TransportError::NotConnected(ConnectionStatus::Idle);
        assert_eq!(err.to_string(), "Not connected (status: idle)");
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[tokio::test]
    async fn test_link_send_requires_connection() {
        let (link, _events) = Link::new(Role::Client);
        let result = link.send(Bytes::from_static(b"x")).await;
        assert_eq!(result, Err(TransportError::NotConnected(ConnectionStatus::Idle)));
    }

    #[tokio::test]
    async fn test_link_stop_is_idempotent() {
        let (link, mut events) = Link::new(Role::Server);
        link.stop().await;
        link.stop().await;
        assert_eq!(link.status(), ConnectionStatus::Idle);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_connection_ignores_stale_number() {
        let (link, _events) = Link::new(Role::Client);
        assert!(!link.close_connection(0).await);
        assert!(!link.close_connection(1).await);

        let (tx, _rx) = mpsc::unbounded_channel();
        {
            let mut state = link.state.lock().await;
            state.connections = 2;
            state.outbound = Some(tx);
        }
        assert!(!link.close_connection(1).await);
        assert!(link.close_connection(2).await);
        assert!(link.state.lock().await.outbound.is_none());
        assert!(!link.close_connection(2).await);
    }

    #[tokio::test]
    async fn test_link_fail_records_error() {
        let (link, mut events) = Link::new(Role::Client);
        link.fail("connection refused".to_string()).await;

        assert_eq!(link.status(), ConnectionStatus::Errored);
        assert_eq!(
            link.state.lock().await.last_error.as_deref(),
            Some("connection refused")
        );
        assert_eq!(
            events.try_recv().unwrap(),
            TransportEvent::Error("connection refused".to_string())
        );
    }
}
