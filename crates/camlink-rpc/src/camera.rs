//! Camera stream request payload.
//!
//! A [`CameraConfig`] travels as the payload of an `open_camera` command and
//! tells the peer what to capture and where to send the resulting video.
//! Integers are little-endian `i32`, strings are an `i32` byte length followed
//! by UTF-8, in this order:
//!
//! ```text
//! width, height, fps, bitrate, enableMvHevc, renderMode, source, ip, port
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::command::{CommandPayload, OPEN_CAMERA};
use crate::error::CodecError;

/// How the capturing device composes its stereo cameras into one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Left,
    Right,
    /// Side-by-side stereo
    #[default]
    Stereo,
    Interleave,
}

impl RenderMode {
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Left => 0,
            Self::Right => 1,
            Self::Stereo => 2,
            Self::Interleave => 3,
        }
    }
}

impl TryFrom<i32> for RenderMode {
    type Error = CodecError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Left),
            1 => Ok(Self::Right),
            2 => Ok(Self::Stereo),
            3 => Ok(Self::Interleave),
            _ => Err(CodecError::InvalidValue {
                field: "renderMode",
                value,
            }),
        }
    }
}

/// Negotiated video stream parameters shared by sender and receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamParameters {
    pub width: i32,
    pub height: i32,
    pub fps: i32,
    /// Bits per second
    pub bitrate: i32,
}

impl Default for StreamParameters {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate: 5_000_000,
        }
    }
}

/// Request for a peer to start streaming its camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConfig {
    pub width: i32,
    pub height: i32,
    pub fps: i32,
    pub bitrate: i32,
    pub enable_mv_hevc: bool,
    pub render_mode: RenderMode,
    /// Camera identifier on the capturing device
    pub source: String,
    /// Address the video should be sent to
    pub ip: String,
    /// Port the video should be sent to
    pub port: u16,
}

impl CameraConfig {
    #[must_use]
    pub fn from_parameters(
        params: StreamParameters,
        enable_mv_hevc: bool,
        render_mode: RenderMode,
        source: impl Into<String>,
        ip: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            width: params.width,
            height: params.height,
            fps: params.fps,
            bitrate: params.bitrate,
            enable_mv_hevc,
            render_mode,
            source: source.into(),
            ip: ip.into(),
            port,
        }
    }

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

impl CommandPayload for CameraConfig {
    const COMMAND: &'static str = OPEN_CAMERA;

    fn encode_payload(&self) -> Bytes {
        // Seven integers plus two string length prefixes
        let mut dst = BytesMut::with_capacity(9 * 4 + self.source.len() + self.ip.len());
        dst.put_i32_le(self.width);
        dst.put_i32_le(self.height);
        dst.put_i32_le(self.fps);
        dst.put_i32_le(self.bitrate);
        dst.put_i32_le(i32::from(self.enable_mv_hevc));
        dst.put_i32_le(self.render_mode.as_i32());
        put_string(&mut dst, &self.source);
        put_string(&mut dst, &self.ip);
        dst.put_i32_le(i32::from(self.port));
        dst.freeze()
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, CodecError> {
        let mut reader = PayloadReader::new(payload);

        let width = reader.i32()?;
        let height = reader.i32()?;
        let fps = reader.i32()?;
        let bitrate = reader.i32()?;
        let enable_mv_hevc = match reader.i32()? {
            0 => false,
            1 => true,
            value => {
                return Err(CodecError::InvalidValue {
                    field: "enableMvHevc",
                    value,
                });
            }
        };
        let render_mode = RenderMode::try_from(reader.i32()?)?;
        let source = reader.string("source")?;
        let ip = reader.string("ip")?;
        let port = reader.i32()?;
        let port = u16::try_from(port).map_err(|_| CodecError::InvalidValue {
            field: "port",
            value: port,
        })?;

        Ok(Self {
            width,
            height,
            fps,
            bitrate,
            enable_mv_hevc,
            render_mode,
            source,
            ip,
            port,
        })
    }
}

// Strings in camera payloads are short identifiers and addresses
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn put_string(dst: &mut BytesMut, value: &str) {
    dst.put_i32_le(value.len() as i32);
    dst.put_slice(value.as_bytes());
}

struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn i32(&mut self) -> Result<i32, CodecError> {
        if self.buf.remaining() < 4 {
            return Err(CodecError::TruncatedBuffer {
                needed: 4,
                available: self.buf.remaining(),
            });
        }
        Ok(self.buf.get_i32_le())
    }

    fn string(&mut self, field: &'static str) -> Result<String, CodecError> {
        let declared = self.i32()?;
        let remaining = self.buf.remaining();
        let len = usize::try_from(declared)
            .ok()
            .filter(|len| *len <= remaining)
            .ok_or(CodecError::InvalidLength {
                field,
                declared: i64::from(declared),
                remaining,
            })?;

        let value = std::str::from_utf8(&self.buf[..len])
            .map_err(|_| CodecError::InvalidUtf8 { field })?
            .to_owned();
        self.buf.advance(len);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> CameraConfig {
        CameraConfig::from_parameters(
            StreamParameters {
                width: 1920,
                height: 1080,
                fps: 30,
                bitrate: 5_000_000,
            },
            false,
            RenderMode::Stereo,
            "PICO4U",
            "192.168.1.20",
            12345,
        )
    }

    #[test]
    fn test_payload_roundtrip() {
        let config = sample_config();
        let decoded = CameraConfig::decode_payload(&config.encode_payload()).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_payload_field_order() {
        let payload = sample_config().encode_payload();
        let mut buf = payload.as_ref();

        assert_eq!(buf.get_i32_le(), 1920);
        assert_eq!(buf.get_i32_le(), 1080);
        assert_eq!(buf.get_i32_le(), 30);
        assert_eq!(buf.get_i32_le(), 5_000_000);
        assert_eq!(buf.get_i32_le(), 0);
        assert_eq!(buf.get_i32_le(), 2);
        assert_eq!(buf.get_i32_le(), 6);
        assert_eq!(&buf[..6], b"PICO4U");
        buf.advance(6);
        assert_eq!(buf.get_i32_le(), 12);
        assert_eq!(&buf[..12], b"192.168.1.20");
        buf.advance(12);
        assert_eq!(buf.get_i32_le(), 12345);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_strings_roundtrip() {
        let config = CameraConfig {
            source: String::new(),
            ip: String::new(),
            ..sample_config()
        };
        let decoded = CameraConfig::decode_payload(&config.encode_payload()).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_decode_truncated_payload() {
        let payload = sample_config().encode_payload();
        let result = CameraConfig::decode_payload(&payload[..payload.len() - 2]);
        assert!(matches!(result, Err(CodecError::TruncatedBuffer { .. })));
    }

    #[test]
    fn test_decode_string_length_past_end() {
        let payload = sample_config().encode_payload();
        // Cut inside the "source" string
        let result = CameraConfig::decode_payload(&payload[..28]);
        assert!(matches!(
            result,
            Err(CodecError::InvalidLength {
                field: "source",
                declared: 6,
                remaining: 0
            })
        ));
    }

    #[test]
    fn test_decode_unknown_render_mode() {
        let mut payload = sample_config().encode_payload().to_vec();
        payload[20..24].copy_from_slice(&9i32.to_le_bytes());

        let result = CameraConfig::decode_payload(&payload);
        assert_eq!(
            result,
            Err(CodecError::InvalidValue {
                field: "renderMode",
                value: 9
            })
        );
    }

    #[test]
    fn test_decode_port_out_of_range() {
        let mut payload = sample_config().encode_payload().to_vec();
        let len = payload.len();
        payload[len - 4..].copy_from_slice(&70_000i32.to_le_bytes());

        let result = CameraConfig::decode_payload(&payload);
        assert!(matches!(
            result,
            Err(CodecError::InvalidValue { field: "port", .. })
        ));
    }

    #[test]
    fn test_render_mode_conversions() {
        for mode in [
            RenderMode::Left,
            RenderMode::Right,
            RenderMode::Stereo,
            RenderMode::Interleave,
        ] {
            assert_eq!(RenderMode::try_from(mode.as_i32()).unwrap(), mode);
        }
        assert!(RenderMode::try_from(-1).is_err());
    }

    #[test]
    fn test_render_mode_serde() {
        let json = serde_json::to_string(&RenderMode::Interleave).unwrap();
        assert_eq!(json, "\"interleave\"");

        let mode: RenderMode = serde_json::from_str("\"left\"").unwrap();
        assert_eq!(mode, RenderMode::Left);
    }

    #[test]
    fn test_parameters_extraction() {
        let config = sample_config();
        assert_eq!(config.parameters(), StreamParameters::default());
    }
}
