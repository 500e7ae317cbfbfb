/// Stream logging trait for structured event reporting.
///
/// The streamer and viewer loops report lifecycle and per-window events
/// through a [`StreamLogger`], so tests can capture them and binaries can
/// route them to `tracing`.

use std::fmt;
use std::net::SocketAddr;

/// Structured log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamLog {
    pub component: &'static str,
    pub event: StreamEvent,
}

/// Network part of a window report, present while a viewer is acking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetSummary {
    pub rtt_ms: f64,
    pub base_rtt_ms: f64,
    pub loss_percent: u32,
    pub acked: u32,
    pub sent: u32,
}

/// Once-per-window summary of the producer loop.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowReport {
    pub fps: u32,
    pub avg_kb: u64,
    pub total_kb: u64,
    pub old_quality: u8,
    pub quality: u8,
    pub net: Option<NetSummary>,
    /// Shown only while the target has been de-rated.
    pub effective_target_fps: Option<u32>,
}

impl fmt::Display for WindowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fps={} avg_kb={} total_kb={} ", self.fps, self.avg_kb, self.total_kb)?;
        if self.old_quality != self.quality {
            write!(f, "q={}->{}", self.old_quality, self.quality)?;
        } else {
            write!(f, "q={}", self.quality)?;
        }
        if let Some(net) = &self.net {
            write!(
                f,
                " [net: rtt={:.0}/{:.0}ms loss={}% acked={}/{}]",
                net.rtt_ms, net.base_rtt_ms, net.loss_percent, net.acked, net.sent
            )?;
        }
        if let Some(target) = self.effective_target_fps {
            write!(f, " target={}", target)?;
        }
        Ok(())
    }
}

/// Stream events that can be logged.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Streamer: socket open, about to capture
    StreamStarted {
        dest: SocketAddr,
        chunk_size: usize,
        quality: u8,
    },
    /// Streamer: end of a measurement window
    Window(WindowReport),
    /// Streamer: capture rate throttled because quality sat at its floor
    TargetFpsReduced {
        target_fps: u32,
        interval_ms: u64,
    },
    /// Streamer: capture rate restored after quality recovered
    TargetFpsRaised {
        target_fps: u32,
    },
    /// Streamer: first ack after a silent period
    ViewerConnected,
    /// Streamer: acks stopped arriving
    ViewerDisconnected,
    /// Viewer: once-per-second display summary
    Display {
        width: u32,
        height: u32,
        fps: u32,
    },
    /// Viewer: frame arrived but could not be decoded
    DecodeFailed {
        frame_id: u32,
        message: String,
    },
    AudioStarted {
        dest: SocketAddr,
    },
    AudioStopped {
        packets_sent: u64,
        bytes_sent: u64,
    },
    /// Loop terminated normally
    Stopped,
    Error {
        message: String,
    },
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamStarted { dest, chunk_size, quality } => {
                write!(f, "streaming to {} chunk_size={} q={}", dest, chunk_size, quality)
            }
            Self::Window(report) => write!(f, "{}", report),
            Self::TargetFpsReduced { target_fps, interval_ms } => {
                write!(f, "target fps reduced to {}, throttling to {}ms/frame", target_fps, interval_ms)
            }
            Self::TargetFpsRaised { target_fps } => {
                write!(f, "target fps increased to {}", target_fps)
            }
            Self::ViewerConnected => write!(f, "viewer connected"),
            Self::ViewerDisconnected => write!(f, "viewer disconnected"),
            Self::Display { width, height, fps } => {
                write!(f, "{}x{} @ {} fps", width, height, fps)
            }
            Self::DecodeFailed { frame_id, message } => {
                write!(f, "decode failed frame={}: {}", frame_id, message)
            }
            Self::AudioStarted { dest } => write!(f, "audio streaming to {}", dest),
            Self::AudioStopped { packets_sent, bytes_sent } => {
                write!(f, "audio stopped packets={} bytes={}", packets_sent, bytes_sent)
            }
            Self::Stopped => write!(f, "stopped"),
            Self::Error { message } => write!(f, "error: {}", message),
        }
    }
}

/// Trait for stream logging. Implementations can write to tracing, collect
/// events for inspection, or discard them.
pub trait StreamLogger: Send + Sync {
    fn log(&self, entry: StreamLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl StreamLogger for TracingLogger {
    fn log(&self, entry: StreamLog) {
        match &entry.event {
            StreamEvent::Error { .. } => {
                tracing::error!(component = entry.component, "{}", entry.event);
            }
            StreamEvent::DecodeFailed { .. } | StreamEvent::ViewerDisconnected => {
                tracing::warn!(component = entry.component, "{}", entry.event);
            }
            _ => {
                tracing::info!(component = entry.component, "{}", entry.event);
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl StreamLogger for NullLogger {
    fn log(&self, _entry: StreamLog) {}
}
