use std::net::{IpAddr, SocketAddr};

use wlcast_media::Region;
use wlcast_proto::config::{parse_chunk_size, parse_flag, parse_or, parse_var, DEFAULT_PORT};
use wlcast_proto::{ChunkSize, ConfigError, ControllerConfig};

pub const DEFAULT_QUALITY: u8 = 80;
pub const DEFAULT_SOURCE_WIDTH: u32 = 1280;
pub const DEFAULT_SOURCE_HEIGHT: u32 = 720;
pub const DEFAULT_SOURCE_HZ: u32 = 60;

/// Where frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// The primary display.
    Screen,
    /// Synthetic moving pattern of `WLCAST_SOURCE_SIZE`.
    Pattern,
}

impl SourceKind {
    fn default_for_build() -> Self {
        if cfg!(feature = "screen") {
            SourceKind::Screen
        } else {
            SourceKind::Pattern
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamerConfig {
    pub dest: SocketAddr,
    /// Initial JPEG quality, 1..=100.
    pub quality: u8,
    /// Frame rate cap; 0 means uncapped.
    pub fps_limit: u32,
    /// Adaptive target frame rate; 0 disables the controller.
    pub target_fps: u32,
    pub chunk_size: ChunkSize,
    pub region: Option<Region>,
    pub audio: bool,
    pub source: SourceKind,
    pub source_width: u32,
    pub source_height: u32,
    pub source_hz: u32,
}

impl StreamerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ip: IpAddr = parse_var(lookup, "WLCAST_DEST")?.ok_or(ConfigError::Missing("WLCAST_DEST"))?;
        let port: u16 = parse_or(lookup, "WLCAST_PORT", DEFAULT_PORT)?;

        // Out-of-range quality is clamped rather than rejected.
        let quality: i64 = parse_or(lookup, "WLCAST_QUALITY", DEFAULT_QUALITY as i64)?;
        let quality = quality.clamp(1, 100) as u8;

        let region = match lookup("WLCAST_REGION") {
            Some(raw) if !raw.trim().is_empty() => Some(raw.parse::<Region>().map_err(|_| {
                ConfigError::Invalid {
                    key: "WLCAST_REGION",
                    value: raw.clone(),
                }
            })?),
            _ => None,
        };

        let source = match lookup("WLCAST_SOURCE") {
            Some(raw) => {
                let kind = raw.trim().to_ascii_lowercase();
                match kind.as_str() {
                    "" => SourceKind::default_for_build(),
                    "screen" => SourceKind::Screen,
                    "pattern" => SourceKind::Pattern,
                    _ => {
                        return Err(ConfigError::Invalid {
                            key: "WLCAST_SOURCE",
                            value: raw,
                        });
                    }
                }
            }
            None => SourceKind::default_for_build(),
        };

        let (source_width, source_height) = match lookup("WLCAST_SOURCE_SIZE") {
            Some(raw) if !raw.trim().is_empty() => parse_size(&raw).ok_or(ConfigError::Invalid {
                key: "WLCAST_SOURCE_SIZE",
                value: raw.clone(),
            })?,
            _ => (DEFAULT_SOURCE_WIDTH, DEFAULT_SOURCE_HEIGHT),
        };

        Ok(StreamerConfig {
            dest: SocketAddr::new(ip, port),
            quality,
            fps_limit: parse_or(lookup, "WLCAST_FPS", 0)?,
            target_fps: parse_or(lookup, "WLCAST_TARGET_FPS", 0)?,
            chunk_size: parse_chunk_size(lookup, "WLCAST_CHUNK_SIZE")?,
            region,
            audio: parse_flag(lookup, "WLCAST_AUDIO")?,
            source,
            source_width,
            source_height,
            source_hz: parse_or(lookup, "WLCAST_SOURCE_HZ", DEFAULT_SOURCE_HZ)?,
        })
    }

    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            target_fps: self.target_fps,
            fps_limit: self.fps_limit,
        }
    }
}

/// Parses `WxH`.
fn parse_size(raw: &str) -> Option<(u32, u32)> {
    let (w, h) = raw.trim().split_once(['x', 'X'])?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}
