//! Persistent settings for the `camlink` binary.
//!
//! Settings live in `config.json` in the platform config directory
//! (`~/.config/camlink/config.json` on Linux). A missing file means defaults;
//! unknown fields are logged and otherwise ignored.

use std::path::{Path, PathBuf};
use std::time::Duration;

use camlink_rpc::{RenderMode, StreamParameters};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, SessionError};

pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub camera: CameraSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Control connection port, both listened on and dialed
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// Local port the video receiver listens on
    #[serde(default = "default_streaming_port")]
    pub streaming_port: u16,

    /// Address to send in camera requests instead of the control socket's
    /// local address. Useful behind NAT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_ip: Option<String>,
}

fn default_control_port() -> u16 {
    13579
}

fn default_streaming_port() -> u16 {
    12345
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            control_port: default_control_port(),
            streaming_port: default_streaming_port(),
            advertise_ip: None,
        }
    }
}

/// Upper bounds for the waits in session establishment, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimingConfig {
    pub server_stop_timeout_ms: u64,
    /// Fixed pause after arming the receiver; it reports no readiness
    pub receiver_settle_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            server_stop_timeout_ms: 100,
            receiver_settle_ms: 300,
            connect_timeout_ms: 500,
        }
    }
}

impl TimingConfig {
    #[must_use]
    pub fn server_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.server_stop_timeout_ms)
    }

    #[must_use]
    pub fn receiver_settle(&self) -> Duration {
        Duration::from_millis(self.receiver_settle_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// What to ask the peer's camera for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraSettings {
    pub width: i32,
    pub height: i32,
    pub fps: i32,
    pub bitrate: i32,
    pub render_mode: RenderMode,
    pub enable_mv_hevc: bool,
    pub source: String,
}

impl Default for CameraSettings {
    fn default() -> Self {
        let params = StreamParameters::default();
        Self {
            width: params.width,
            height: params.height,
            fps: params.fps,
            bitrate: params.bitrate,
            render_mode: RenderMode::default(),
            enable_mv_hevc: false,
            source: "PICO4U".to_string(),
        }
    }
}

impl CameraSettings {
    #[must_use]
    pub fn parameters(&self) -> StreamParameters {
        StreamParameters {
            width: self.width,
            height: self.height,
            fps: self.fps,
            bitrate: self.bitrate,
        }
    }
}

impl Config {
    /// Default config file location, if the platform has a config directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "camlink").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load and validate config from file, or return defaults if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// holds values that fail [`Config::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        warn_unknown_fields(&content, CONFIG_FILE_NAME);
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`SessionError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let camera = &self.camera;
        for (field, value) in [
            ("camera.width", camera.width),
            ("camera.height", camera.height),
            ("camera.fps", camera.fps),
            ("camera.bitrate", camera.bitrate),
        ] {
            if value <= 0 {
                return Err(SessionError::Config(format!(
                    "{field} must be positive, got {value}"
                )));
            }
        }

        if self.network.streaming_port == 0 {
            return Err(SessionError::Config(
                "network.streamingPort cannot be 0".to_string(),
            ));
        }

        if camera.source.is_empty() {
            return Err(SessionError::Config(
                "camera.source cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Keys each config section accepts, as written in the file.
const KNOWN_FIELDS: &[(&str, &[&str])] = &[
    ("network", &["controlPort", "streamingPort", "advertiseIp"]),
    (
        "timing",
        &["serverStopTimeoutMs", "receiverSettleMs", "connectTimeoutMs"],
    ),
    (
        "camera",
        &[
            "width",
            "height",
            "fps",
            "bitrate",
            "renderMode",
            "enableMvHevc",
            "source",
        ],
    ),
];

/// Warn about fields in `content` that no config section knows.
pub fn warn_unknown_fields(content: &str, config_name: &str) {
    let Ok(value) = serde_json::from_str::<Value>(content) else {
        return;
    };

    for path in unknown_fields(&value) {
        warn!("Unknown config field in {config_name}: {path}");
    }
}

/// Returns `section` or `section.field` for every key outside
/// [`KNOWN_FIELDS`].
fn unknown_fields(value: &Value) -> Vec<String> {
    let Value::Object(sections) = value else {
        return Vec::new();
    };

    let mut unknowns = Vec::new();
    for (section, body) in sections {
        let Some((_, fields)) = KNOWN_FIELDS.iter().find(|(name, _)| name == section) else {
            unknowns.push(section.clone());
            continue;
        };
        if let Value::Object(body) = body {
            unknowns.extend(
                body.keys()
                    .filter(|key| !fields.contains(&key.as_str()))
                    .map(|key| format!("{section}.{key}")),
            );
        }
    }
    unknowns
}
