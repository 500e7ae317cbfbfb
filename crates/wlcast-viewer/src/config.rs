use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use wlcast_proto::config::{parse_chunk_size, parse_flag, parse_or, parse_var, DEFAULT_PORT};
use wlcast_proto::{ChunkSize, ConfigError};

/// Where received audio goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSink {
    /// The default sound device.
    Device,
    /// Raw s16le interleaved PCM written to a file.
    File(PathBuf),
    /// Played on the stream clock and thrown away.
    Discard,
}

/// Where decoded frames go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    /// Drawn into the terminal.
    Terminal,
    /// Only counted.
    Headless,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewerConfig {
    pub bind: SocketAddr,
    /// Must match the streamer's chunk size.
    pub chunk_size: ChunkSize,
    pub audio: bool,
    pub audio_out: AudioSink,
    pub display: Display,
}

impl ViewerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host: IpAddr = parse_or(lookup, "WLCAST_BIND", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;
        let port: u16 = parse_or(lookup, "WLCAST_PORT", DEFAULT_PORT)?;
        let out: Option<PathBuf> = parse_var(lookup, "WLCAST_AUDIO_OUT")?;
        // Audio is on by default; naming an output alone also enables it.
        let audio = match lookup("WLCAST_AUDIO") {
            Some(raw) if !raw.trim().is_empty() => parse_flag(lookup, "WLCAST_AUDIO")?,
            _ => true,
        } || out.is_some();
        let audio_out = match out {
            None => default_sink(),
            Some(path) if path.as_os_str() == "device" => AudioSink::Device,
            Some(path) if path.as_os_str() == "none" => AudioSink::Discard,
            Some(path) => AudioSink::File(path),
        };

        let display = match lookup("WLCAST_DISPLAY") {
            Some(raw) => {
                let kind = raw.trim().to_ascii_lowercase();
                match kind.as_str() {
                    "" => default_display(),
                    "terminal" => Display::Terminal,
                    "none" => Display::Headless,
                    _ => {
                        return Err(ConfigError::Invalid {
                            key: "WLCAST_DISPLAY",
                            value: raw,
                        });
                    }
                }
            }
            None => default_display(),
        };

        Ok(ViewerConfig {
            bind: SocketAddr::new(host, port),
            chunk_size: parse_chunk_size(lookup, "WLCAST_CHUNK_SIZE")?,
            audio,
            audio_out,
            display,
        })
    }
}

fn default_sink() -> AudioSink {
    if cfg!(feature = "audio-device") {
        AudioSink::Device
    } else {
        AudioSink::Discard
    }
}

fn default_display() -> Display {
    if cfg!(feature = "terminal") {
        Display::Terminal
    } else {
        Display::Headless
    }
}
