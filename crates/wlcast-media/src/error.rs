/// Error types for the capture, codec and audio collaborators.

use std::io;

use thiserror::Error;

/// Capture failures are fatal to the producer loop.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture source closed")]
    Closed,

    #[error("frame buffer of {len} bytes too small for {width}x{height} stride {stride}")]
    ShortBuffer {
        len: usize,
        width: u32,
        height: u32,
        stride: usize,
    },

    #[error("region {region} outside {width}x{height} frame")]
    RegionOutOfBounds {
        region: String,
        width: u32,
        height: u32,
    },

    #[error("capture I/O: {0}")]
    Io(#[from] io::Error),
}

/// A frame that could not be compressed. The producer skips it.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] CaptureError),

    #[error("rgb buffer does not match {0}x{1}")]
    Dimensions(u32, u32),

    #[error("jpeg encode failed: {0}")]
    Codec(#[from] image::ImageError),
}

/// A received frame that could not be decoded. The viewer drops it.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("jpeg decode failed: {0}")]
    Codec(#[from] image::ImageError),

    #[error("decoded size mismatch: expected {expected} bytes, got {got}")]
    SizeMismatch { expected: usize, got: usize },
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio source closed")]
    Closed,

    #[error("audio unit of {got} samples, expected {expected}")]
    UnitSize { expected: usize, got: usize },

    #[error("opus: {0}")]
    Codec(#[from] audiopus::Error),

    #[error("audio I/O: {0}")]
    Io(#[from] io::Error),
}
