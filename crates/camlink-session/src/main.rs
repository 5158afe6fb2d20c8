//! camlink entry point.
//!
//! `camlink serve` waits for a peer to ask for the local camera.
//! `camlink request <peer>` asks a serving peer to stream its camera here.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use camlink_rpc::RenderMode;
use camlink_session::{
    Config, LogOnlyReceiver, LogOnlySender, SessionHost, SessionOrchestrator, TransportClient,
    TransportServer, VideoSender, media,
};
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Camera stream sessions between headsets
#[derive(Parser, Debug)]
#[command(name = "camlink")]
#[command(version, about, long_about = None)]
#[command(after_help = "\
Examples:
  camlink serve                       Serve the local camera on the control port
  camlink request 192.168.1.20        Ask a peer to stream its camera here
  camlink request 192.168.1.20 --width 1280 --height 720 --fps 60
  camlink config                      Print the effective configuration
")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen for peers and stream the local camera on request
    Serve {
        /// Control port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Ask a peer to stream its camera to this device
    Request {
        /// Address of the serving peer
        peer: String,

        /// Peer control port
        #[arg(long)]
        port: Option<u16>,

        /// Camera identifier on the peer
        #[arg(long)]
        camera: Option<String>,

        #[arg(long)]
        width: Option<i32>,

        #[arg(long)]
        height: Option<i32>,

        #[arg(long)]
        fps: Option<i32>,

        /// Bits per second
        #[arg(long)]
        bitrate: Option<i32>,

        #[arg(long, value_enum)]
        render_mode: Option<RenderModeArg>,

        /// Local port to receive video on
        #[arg(long)]
        streaming_port: Option<u16>,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RenderModeArg {
    Left,
    Right,
    Stereo,
    Interleave,
}

impl From<RenderModeArg> for RenderMode {
    fn from(arg: RenderModeArg) -> Self {
        match arg {
            RenderModeArg::Left => Self::Left,
            RenderModeArg::Right => Self::Right,
            RenderModeArg::Stereo => Self::Stereo,
            RenderModeArg::Interleave => Self::Interleave,
        }
    }
}

/// Crates whose events are logged at the default level.
const LOG_TARGETS: [&str; 3] = ["camlink", "camlink_session", "camlink_rpc"];

fn default_filter() -> EnvFilter {
    let level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };
    let directives: Vec<String> = LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect();
    EnvFilter::new(directives.join(","))
}

/// Per-run log files go next to the config, under `logs/`.
fn log_dir() -> PathBuf {
    ProjectDirs::from("", "", "camlink")
        .map_or_else(std::env::temp_dir, |dirs| dirs.data_local_dir().join("logs"))
}

/// Log to stderr. Debug builds also write a per-run file; the returned
/// guard flushes it and must live until exit.
fn setup_logging() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());

    let dir = log_dir();
    if !cfg!(debug_assertions) || std::fs::create_dir_all(&dir).is_err() {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(cfg!(debug_assertions));
        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(filter)
            .init();
        return None;
    }

    let file_name = format!("camlink-{}.log", chrono::Local::now().format("%Y%m%d_%H%M%S"));
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, &file_name));
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_line_number(true);
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(cfg!(debug_assertions));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(filter)
        .init();

    eprintln!("Logging to {}", dir.join(&file_name).display());
    Some(guard)
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let Some(path) = path.or_else(Config::default_path) else {
        return Ok(Config::default());
    };
    Config::load(&path).with_context(|| format!("Failed to load config from {}", path.display()))
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    Ok(())
}

async fn serve(config: Config, port: Option<u16>) -> Result<()> {
    let port = port.unwrap_or(config.network.control_port);
    let (server, server_events) = TransportServer::new();
    let (client, client_events) = TransportClient::new();
    let sender: Arc<dyn VideoSender> = Arc::new(LogOnlySender);

    let mut host =
        SessionHost::new(server_events, client_events).with_transports(server.clone(), client);
    host.serve_camera(sender.clone())
        .context("Failed to register camera handler")?;
    let host_task = tokio::spawn(host.run());

    server.start(port).await;
    wait_for_shutdown().await?;

    server.stop().await;
    media::stop_camera(sender.as_ref());
    host_task.abort();
    Ok(())
}

async fn request(config: Config, peer: &str) -> Result<()> {
    let (server, server_events) = TransportServer::new();
    let (client, client_events) = TransportClient::new();

    let host = SessionHost::new(server_events, client_events)
        .with_transports(server.clone(), client.clone());
    let host_task = tokio::spawn(host.run());

    let orchestrator =
        SessionOrchestrator::new(server, client, Arc::new(LogOnlyReceiver), config);
    let request = orchestrator
        .request_camera_stream(peer)
        .await
        .with_context(|| format!("Failed to request camera stream from {peer}"))?;
    info!(
        "Receiving {}x{}@{} from {} on port {}, Ctrl-C to stop",
        request.width, request.height, request.fps, peer, request.port
    );

    wait_for_shutdown().await?;

    orchestrator.stop_stream().await;
    host_task.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = setup_logging();

    let mut config = load_config(cli.config)?;

    match cli.command {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Request {
            peer,
            port,
            camera,
            width,
            height,
            fps,
            bitrate,
            render_mode,
            streaming_port,
        } => {
            let camera_settings = &mut config.camera;
            if let Some(source) = camera {
                camera_settings.source = source;
            }
            camera_settings.width = width.unwrap_or(camera_settings.width);
            camera_settings.height = height.unwrap_or(camera_settings.height);
            camera_settings.fps = fps.unwrap_or(camera_settings.fps);
            camera_settings.bitrate = bitrate.unwrap_or(camera_settings.bitrate);
            if let Some(mode) = render_mode {
                camera_settings.render_mode = mode.into();
            }
            if let Some(port) = port {
                config.network.control_port = port;
            }
            if let Some(port) = streaming_port {
                config.network.streaming_port = port;
            }
            config.validate().context("Invalid request parameters")?;

            request(config, &peer).await
        }
        Commands::Config => {
            let json = serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("{json}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_names_every_crate() {
        let filter = default_filter().to_string();
        for target in LOG_TARGETS {
            assert!(filter.contains(&format!("{target}=")), "{filter}");
        }
    }

    #[test]
    fn test_cli_parses_request_overrides() {
        let cli = Cli::try_parse_from([
            "camlink",
            "request",
            "192.168.1.20",
            "--fps",
            "60",
            "--render-mode",
            "left",
        ])
        .unwrap();

        let Commands::Request {
            peer,
            fps,
            render_mode,
            ..
        } = cli.command
        else {
            panic!("Expected Request");
        };
        assert_eq!(peer, "192.168.1.20");
        assert_eq!(fps, Some(60));
        assert!(matches!(render_mode, Some(RenderModeArg::Left)));
    }
}
