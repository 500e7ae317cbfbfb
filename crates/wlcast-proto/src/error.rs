/// Error types for the wlcast protocol crate.

use std::io;

use thiserror::Error;

/// A datagram that could not be decoded or failed header validation.
///
/// These never escape a poll loop: the offending datagram is dropped and the
/// loop moves on to the next one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short: {len} bytes, need {needed}")]
    Truncated { len: usize, needed: usize },

    #[error("unexpected magic 0x{0:08x}")]
    BadMagic(u32),

    #[error("{field} out of range: {value}")]
    FieldOutOfRange { field: &'static str, value: u64 },

    #[error("declared payload of {declared} bytes exceeds the {available} bytes available")]
    PayloadTooLarge { declared: usize, available: usize },
}

/// Failure of a single `send_frame` call.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("invalid frame size: {0} bytes")]
    InvalidSize(usize),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Hard failure of the receiving socket. Malformed datagrams are not errors.
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Invalid or missing configuration value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("chunk size {0} outside the supported range")]
    ChunkSize(usize),
}
