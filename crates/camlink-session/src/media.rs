//! Video pipeline collaborators.
//!
//! The control protocol only arms and triggers the media side; frames travel
//! on a separate channel owned by whatever implements these traits. The
//! log-only implementations let the binary run without a linked pipeline.

use std::sync::Arc;

use camlink_rpc::{CameraConfig, RenderMode, StreamParameters};
use tracing::{debug, info};

/// Callback fired by the sender once its capture pipeline is producing frames.
pub type OnReady = Box<dyn FnOnce() + Send>;

/// Receives and displays a peer's video stream.
pub trait VideoReceiver: Send + Sync {
    /// Start listening for video on `port`. Must return before the peer is
    /// asked to stream; frames that arrive earlier are lost.
    fn start_listen(&self, params: StreamParameters, port: u16);

    fn set_visible(&self, visible: bool);

    fn stop_listen(&self);
}

/// Captures the local camera and sends it to a peer.
pub trait VideoSender: Send + Sync {
    /// `enable_mv_hevc` selects the multiview encoder format.
    fn start_camera_preview(
        &self,
        params: StreamParameters,
        enable_mv_hevc: bool,
        render_mode: RenderMode,
        on_ready: OnReady,
    );

    fn start_send_image(&self, ip: &str, port: u16);

    fn stop_preview(&self);

    fn close_camera(&self);
}

/// Start capturing and send the result where `config` asks.
///
/// Sending begins from the preview's ready callback, never before.
pub fn open_camera(sender: &Arc<dyn VideoSender>, config: CameraConfig) {
    info!(
        "Opening camera {} ({}x{}@{} {}bps) for {}:{}",
        config.source, config.width, config.height, config.fps, config.bitrate, config.ip, config.port
    );

    let params = config.parameters();
    let CameraConfig {
        enable_mv_hevc,
        render_mode,
        ip,
        port,
        ..
    } = config;

    let ready_sender = Arc::clone(sender);
    sender.start_camera_preview(
        params,
        enable_mv_hevc,
        render_mode,
        Box::new(move || {
            debug!("Camera preview ready, sending to {}:{}", ip, port);
            ready_sender.start_send_image(&ip, port);
        }),
    );
}

pub fn stop_camera(sender: &dyn VideoSender) {
    info!("Closing camera");
    sender.stop_preview();
    sender.close_camera();
}

/// Receiver that only logs what it is asked to do.
#[derive(Debug, Default)]
pub struct LogOnlyReceiver;

impl VideoReceiver for LogOnlyReceiver {
    fn start_listen(&self, params: StreamParameters, port: u16) {
        info!(
            "Receiver listening on port {} for {}x{}@{}",
            port, params.width, params.height, params.fps
        );
    }

    fn set_visible(&self, visible: bool) {
        debug!("Receiver visible: {}", visible);
    }

    fn stop_listen(&self) {
        info!("Receiver stopped");
    }
}

/// Sender that logs requests and reports ready immediately.
#[derive(Debug, Default)]
pub struct LogOnlySender;

impl VideoSender for LogOnlySender {
    fn start_camera_preview(
        &self,
        params: StreamParameters,
        enable_mv_hevc: bool,
        render_mode: RenderMode,
        on_ready: OnReady,
    ) {
        info!(
            "Camera preview {}x{}@{} {}bps mode={:?} mv_hevc={}",
            params.width, params.height, params.fps, params.bitrate, render_mode, enable_mv_hevc
        );
        on_ready();
    }

    fn start_send_image(&self, ip: &str, port: u16) {
        info!("Sending camera images to {}:{}", ip, port);
    }

    fn stop_preview(&self) {
        debug!("Camera preview stopped");
    }

    fn close_camera(&self) {
        debug!("Camera closed");
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{MediaCall, RecordingSender};
    use super::*;

    fn request() -> CameraConfig {
        CameraConfig::from_parameters(
            StreamParameters::default(),
            true,
            RenderMode::Interleave,
            "PICO4U",
            "192.168.1.20",
            12345,
        )
    }

    #[test]
    fn test_open_camera_sends_only_after_ready() {
        let recording = Arc::new(RecordingSender::default());
        let sender: Arc<dyn VideoSender> = recording.clone();

        open_camera(&sender, request());
        assert_eq!(
            recording.recorder.calls(),
            vec![MediaCall::StartPreview(
                StreamParameters::default(),
                true,
                RenderMode::Interleave
            )]
        );

        recording.fire_ready();
        assert_eq!(
            recording.recorder.calls()[1],
            MediaCall::StartSend("192.168.1.20".to_string(), 12345)
        );
    }

    #[test]
    fn test_stop_camera() {
        let recording = RecordingSender::default();
        stop_camera(&recording);
        assert_eq!(
            recording.recorder.calls(),
            vec![MediaCall::StopPreview, MediaCall::CloseCamera]
        );
    }

    #[test]
    fn test_log_only_sender_fires_ready() {
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_clone = fired.clone();
        LogOnlySender.start_camera_preview(
            StreamParameters::default(),
            false,
            RenderMode::Stereo,
            Box::new(move || fired_clone.store(true, std::sync::atomic::Ordering::SeqCst)),
        );
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
