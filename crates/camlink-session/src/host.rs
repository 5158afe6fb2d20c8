//! Control loop that turns transport notifications into command dispatches.
//!
//! Both transport roles deliver notifications from their own I/O tasks. The
//! host drains both channels on a single task, so the [`CommandRegistry`] and
//! every handler it invokes only ever run there.
//!
//! `DataReceived` carries raw TCP segments. The host keeps one reassembly
//! buffer per role, splits complete frames off it and dispatches them in
//! arrival order. A malformed length field means the stream has lost its
//! frame boundaries, so the rest of that connection is ignored and, when the
//! transports are attached, the connection is hung up.

use std::sync::Arc;

use bytes::BytesMut;
use camlink_rpc::{CameraConfig, CommandRegistry, split_frame};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::media::{self, VideoSender};
use crate::transport::{Role, TransportClient, TransportEvent, TransportServer};

/// Inbound stream state for one role.
#[derive(Debug, Default)]
struct Inbound {
    buffer: BytesMut,
    /// Number of the current connection, counted from `Connected` events
    connection: u64,
    /// Set by a framing error until the next connection
    rejected: bool,
}

pub struct SessionHost {
    registry: CommandRegistry,
    server_events: mpsc::UnboundedReceiver<TransportEvent>,
    client_events: mpsc::UnboundedReceiver<TransportEvent>,
    server_inbound: Inbound,
    client_inbound: Inbound,
    server: Option<TransportServer>,
    client: Option<TransportClient>,
    /// Rejected connections still to be hung up
    to_close: Vec<(Role, u64)>,
}

impl SessionHost {
    #[must_use]
    pub fn new(
        server_events: mpsc::UnboundedReceiver<TransportEvent>,
        client_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self {
            registry: CommandRegistry::new(),
            server_events,
            client_events,
            server_inbound: Inbound::default(),
            client_inbound: Inbound::default(),
            server: None,
            client: None,
            to_close: Vec::new(),
        }
    }

    /// Let [`run`](Self::run) hang up connections that send malformed
    /// frames.
    ///
    /// Attach before starting either transport: connections are matched by
    /// counting `Connected` notifications.
    #[must_use]
    pub fn with_transports(mut self, server: TransportServer, client: TransportClient) -> Self {
        self.server = Some(server);
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut CommandRegistry {
        &mut self.registry
    }

    /// Answer `open_camera` requests by streaming from `sender`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handler cannot be registered.
    pub fn serve_camera(&mut self, sender: Arc<dyn VideoSender>) -> Result<()> {
        self.registry
            .register_typed(move |config: CameraConfig| media::open_camera(&sender, config))?;
        Ok(())
    }

    /// Process notifications until both roles' channels are closed.
    pub async fn run(mut self) {
        info!("Session host running");
        let mut server_open = true;
        let mut client_open = true;

        while server_open || client_open {
            tokio::select! {
                event = self.server_events.recv(), if server_open => match event {
                    Some(event) => {
                        self.handle_event(Role::Server, event);
                    }
                    None => server_open = false,
                },
                event = self.client_events.recv(), if client_open => match event {
                    Some(event) => {
                        self.handle_event(Role::Client, event);
                    }
                    None => client_open = false,
                },
            }
            self.close_rejected().await;
        }

        debug!("Session host stopped, all transports gone");
    }

    /// Apply one notification from `role`. Returns how many commands were
    /// handled as a result.
    pub fn handle_event(&mut self, role: Role, event: TransportEvent) -> usize {
        let inbound = match role {
            Role::Server => &mut self.server_inbound,
            Role::Client => &mut self.client_inbound,
        };

        match event {
            TransportEvent::DataReceived(bytes) => {
                if inbound.rejected {
                    trace!(
                        "Ignoring {} bytes from rejected {} connection {}",
                        bytes.len(),
                        role,
                        inbound.connection
                    );
                    return 0;
                }
                trace!("{} delivered {} bytes", role, bytes.len());
                inbound.buffer.extend_from_slice(&bytes);
            }
            TransportEvent::Connected => {
                inbound.connection += 1;
                inbound.rejected = false;
                inbound.buffer.clear();
                info!("{} connection {} established", role, inbound.connection);
                return 0;
            }
            TransportEvent::Disconnected => {
                info!("{} connection {} closed", role, inbound.connection);
                discard(role, &mut inbound.buffer);
                return 0;
            }
            TransportEvent::Error(message) => {
                warn!("{} error: {}", role, message);
                discard(role, &mut inbound.buffer);
                return 0;
            }
            TransportEvent::Started { port } => {
                info!("{} listening on port {}", role, port);
                return 0;
            }
            TransportEvent::Stopped => {
                debug!("{} stopped", role);
                return 0;
            }
        }

        let mut handled = 0;
        loop {
            match split_frame(&mut inbound.buffer) {
                Ok(Some(frame)) => {
                    if self.registry.dispatch_serialized(&frame) {
                        handled += 1;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        "Rejecting {} connection {}, malformed frame: {}",
                        role, inbound.connection, e
                    );
                    discard(role, &mut inbound.buffer);
                    inbound.rejected = true;
                    self.to_close.push((role, inbound.connection));
                    break;
                }
            }
        }
        handled
    }

    async fn close_rejected(&mut self) {
        for (role, connection) in std::mem::take(&mut self.to_close) {
            let closed = match (role, &self.server, &self.client) {
                (Role::Server, Some(server), _) => server.close_connection(connection).await,
                (Role::Client, _, Some(client)) => client.close_connection(connection).await,
                _ => false,
            };
            if closed {
                info!("Hung up {} connection {}", role, connection);
            }
        }
    }
}

fn discard(role: Role, buffer: &mut BytesMut) {
    if !buffer.is_empty() {
        debug!("Discarding {} buffered bytes from {}", buffer.len(), role);
        buffer.clear();
    }
}
