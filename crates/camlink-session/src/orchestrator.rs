//! Session establishment: ask a peer to stream its camera to us.
//!
//! The sequence is strictly ordered:
//!
//! 1. Release the server role. A device holds one control role at a time,
//!    and the peer is about to be dialed from this side.
//! 2. Arm the video receiver and show it. The peer sends nothing until it
//!    gets our request, so arming first means no frame is lost.
//! 3. Let the receiver settle, then connect the client role to the peer.
//! 4. Send an `open_camera` request naming our address and streaming port.
//!
//! Each wait is bounded by the configured timing ceilings and resolves as
//! soon as the transport reports the transition.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use camlink_rpc::{CameraConfig, CommandPayload};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, SessionError};
use crate::media::VideoReceiver;
use crate::transport::{ConnectionStatus, TransportClient, TransportError, TransportServer};

pub struct SessionOrchestrator {
    server: TransportServer,
    client: TransportClient,
    receiver: Arc<dyn VideoReceiver>,
    config: Config,
}

impl SessionOrchestrator {
    #[must_use]
    pub fn new(
        server: TransportServer,
        client: TransportClient,
        receiver: Arc<dyn VideoReceiver>,
        config: Config,
    ) -> Self {
        Self {
            server,
            client,
            receiver,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn client(&self) -> &TransportClient {
        &self.client
    }

    /// Run the establishment sequence against `peer` and return the request
    /// that was sent.
    ///
    /// Nothing is retried. If any step after arming fails, the receiver is
    /// stopped and hidden again before the error is returned.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Timeout`] if the server does not stop or the client
    ///   does not connect within the configured ceilings
    /// - [`SessionError::ConnectFailed`] if the client reports an error or
    ///   the peer closes the connection
    /// - [`SessionError::Transport`] if the request cannot be queued
    pub async fn request_camera_stream(&self, peer: &str) -> Result<CameraConfig> {
        info!("Requesting camera stream from {}", peer);
        self.release_server().await?;

        let params = self.config.camera.parameters();
        let streaming_port = self.config.network.streaming_port;
        info!(
            "Arming receiver on port {} for {}x{}@{}",
            streaming_port, params.width, params.height, params.fps
        );
        self.receiver.start_listen(params, streaming_port);
        self.receiver.set_visible(true);

        match self.connect_and_request(peer).await {
            Ok(request) => {
                info!(
                    "Camera request sent to {}, expecting video on {}:{}",
                    peer, request.ip, request.port
                );
                Ok(request)
            }
            Err(e) => {
                warn!("Camera request to {} failed: {}", peer, e);
                self.disarm_receiver();
                Err(e)
            }
        }
    }

    /// Hide and stop the receiver and drop the control connection.
    pub async fn stop_stream(&self) {
        info!("Stopping camera stream");
        self.disarm_receiver();
        self.client.stop().await;
    }

    async fn release_server(&self) -> Result<()> {
        if !self.server.status().is_active() {
            return Ok(());
        }

        debug!("Stopping server before dialing out");
        self.server.stop().await;
        wait_for_status(
            self.server.subscribe_status(),
            "server stop",
            self.config.timing.server_stop_timeout(),
            |status| !status.is_active(),
        )
        .await?;
        Ok(())
    }

    async fn connect_and_request(&self, peer: &str) -> Result<CameraConfig> {
        tokio::time::sleep(self.config.timing.receiver_settle()).await;

        if self.connected_to(peer).await {
            debug!("Client already connected to {}, reusing connection", peer);
        } else {
            self.connect(peer).await?;
        }

        let ip = self.advertised_ip().await?;
        let camera = &self.config.camera;
        let request = CameraConfig::from_parameters(
            camera.parameters(),
            camera.enable_mv_hevc,
            camera.render_mode,
            camera.source.clone(),
            ip,
            self.config.network.streaming_port,
        );

        self.client.send(request.to_message().encode()?).await?;
        Ok(request)
    }

    /// Whether the client holds a connection to `peer` on the control port.
    ///
    /// Host names are not resolved, so a peer given by name always gets a
    /// fresh connection.
    async fn connected_to(&self, peer: &str) -> bool {
        if self.client.status() != ConnectionStatus::Connected {
            return false;
        }
        let Some(addr) = self.client.peer_addr().await else {
            return false;
        };
        addr.port() == self.config.network.control_port
            && peer.parse::<IpAddr>().is_ok_and(|ip| ip == addr.ip())
    }

    async fn connect(&self, peer: &str) -> Result<()> {
        let port = self.config.network.control_port;
        if self.client.status().is_active() {
            debug!("Dropping client connection to dial {}:{}", peer, port);
            self.client.stop().await;
        }
        self.client.start(peer, port).await;

        let timeout = self.config.timing.connect_timeout();
        let status = match wait_for_status(
            self.client.subscribe_status(),
            "client connection",
            timeout,
            |status| *status != ConnectionStatus::Starting,
        )
        .await
        {
            Ok(status) => status,
            Err(e) => {
                self.client.stop().await;
                return Err(e);
            }
        };

        match status {
            ConnectionStatus::Connected => Ok(()),
            ConnectionStatus::Errored => {
                let message = self
                    .client
                    .last_error()
                    .await
                    .unwrap_or_else(|| format!("connect to {peer}:{port} failed"));
                Err(SessionError::ConnectFailed(message))
            }
            status => Err(SessionError::ConnectFailed(format!(
                "connection to {peer}:{port} ended early ({status})"
            ))),
        }
    }

    async fn advertised_ip(&self) -> Result<String> {
        if let Some(ip) = &self.config.network.advertise_ip {
            return Ok(ip.clone());
        }

        self.client
            .local_addr()
            .await
            .map(|addr| addr.ip().to_string())
            .ok_or(SessionError::Transport(TransportError::Closed))
    }

    fn disarm_receiver(&self) {
        self.receiver.set_visible(false);
        self.receiver.stop_listen();
    }
}

/// Wait until `done` holds for the watched status, for at most `after`.
async fn wait_for_status(
    mut status: watch::Receiver<ConnectionStatus>,
    stage: &'static str,
    after: Duration,
    done: impl FnMut(&ConnectionStatus) -> bool,
) -> Result<ConnectionStatus> {
    match tokio::time::timeout(after, status.wait_for(done)).await {
        Ok(Ok(reached)) => Ok(*reached),
        Ok(Err(_)) => Err(SessionError::Transport(TransportError::Closed)),
        Err(_) => Err(SessionError::Timeout { stage, after }),
    }
}
