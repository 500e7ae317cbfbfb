/// wlcast protocol: low-latency frame streaming over UDP.
///
/// Provides the transport core shared by the streamer and the viewer:
/// - Chunked video frames with single-frame reassembly and a 200 ms timeout
/// - Per-frame acks carrying the viewer's display rate
/// - RTT, loss and liveness tracking from those acks
/// - Adaptive JPEG quality and target frame rate de-rating
/// - Sequenced, unacknowledged audio datagrams

pub mod audio;
pub mod bitfield;
pub mod config;
pub mod controller;
pub mod error;
pub mod history;
pub mod logging;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod stats;
pub mod transport;

// Re-export key types for convenience.
pub use audio::{AudioPacket, AudioPacketizer};
pub use bitfield::ChunkBitmap;
pub use controller::{ControlMode, ControllerConfig, QualityController, RateChange, WindowDecision};
pub use error::{ConfigError, ReceiveError, SendError, WireError};
pub use logging::{NetSummary, NullLogger, StreamEvent, StreamLog, StreamLogger, TracingLogger, WindowReport};
pub use protocol::{
    AckPacket, AudioHeader, ChunkHeader, ChunkSize, PacketKind, AUDIO_CHANNELS, AUDIO_FRAME_MS,
    AUDIO_FRAME_SAMPLES, AUDIO_SAMPLE_RATE, DEFAULT_CHUNK_SIZE, MAX_FRAME_SIZE,
};
pub use receiver::{CompletedFrame, FrameReceiver, Reassembler, ReceiverStats};
pub use sender::{FrameSender, SentFrame};
pub use stats::{NetworkStats, StatsTracker, TrackerConfig};
pub use transport::DatagramSocket;
