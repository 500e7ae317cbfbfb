/// wlcast media: the capture, codec and playback collaborators around the
/// transport core.
///
/// - Frame sources (primary display capture, test pattern) and pixel format
///   conversion
/// - JPEG encode with adjustable quality, and decode
/// - Audio source and codec interfaces, with the Opus codec and a test tone
/// - Lock-free PCM ring between audio decode and playback

pub mod audio;
pub mod capture;
pub mod error;
pub mod jpeg;
pub mod ring;
#[cfg(feature = "screen")]
pub mod screen;

pub use audio::{
    AudioDecoder, AudioEncoder, AudioSource, OpusDecoder, OpusEncoder, ToneSource, MAX_OPUS_PACKET,
};
pub use capture::{Cropped, FrameSource, PixelFormat, RawFrame, Region, TestPattern};
pub use error::{AudioError, CaptureError, DecodeError, EncodeError};
pub use jpeg::{DecodedImage, FrameDecoder, FrameEncoder, JpegFrameDecoder, JpegFrameEncoder};
pub use ring::{pcm_ring, RingConsumer, RingMonitor, RingProducer, DEFAULT_RING_FRAMES};
#[cfg(feature = "screen")]
pub use screen::ScreenSource;
