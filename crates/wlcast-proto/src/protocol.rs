/// wlcast wire format shared by the streamer and the viewer.
///
/// All multi-byte integers are big-endian.
///
/// ```text
/// Video chunk (20-byte header + payload):
///   [0..4]   Magic "WLCP" (0x574C4350)
///   [4..8]   Frame ID (u32)
///   [8..12]  Total frame size (u32)
///   [12..14] Chunk index (u16)
///   [14..16] Chunk count (u16)
///   [16..18] Payload size (u16)
///   [18..20] Reserved, zero
///
/// Ack (12 bytes, viewer -> streamer):
///   [0..4]   Magic "WLCA" (0x574C4341)
///   [4..8]   Frame ID (u32)
///   [8..12]  Viewer fps (u32)
///
/// Audio (16-byte header + payload):
///   [0..4]   Magic "WLAU" (0x574C4155)
///   [4..8]   Sequence (u32)
///   [8..12]  Timestamp in samples (u32)
///   [12..14] Payload size (u16)
///   [14..16] Reserved, zero
/// ```

use bytes::{Buf, BufMut};

use crate::error::{ConfigError, WireError};

pub const CHUNK_MAGIC: u32 = 0x574C_4350;
pub const ACK_MAGIC: u32 = 0x574C_4341;
pub const AUDIO_MAGIC: u32 = 0x574C_4155;

pub const CHUNK_HEADER_SIZE: usize = 20;
pub const ACK_SIZE: usize = 12;
pub const AUDIO_HEADER_SIZE: usize = 16;

/// Largest compressed frame the protocol carries (8 MiB).
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Largest UDP payload over IPv4 (65535 - 20 IP - 8 UDP).
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Default chunk payload: fits a 1500-byte MTU with room for headers.
pub const DEFAULT_CHUNK_SIZE: usize = 1200;

/// Smallest chunk payload that still keeps `chunk_count` within a u16 for a
/// maximum-size frame.
pub const MIN_CHUNK_SIZE: usize = MAX_FRAME_SIZE.div_ceil(u16::MAX as usize);

/// Largest chunk payload that fits a single UDP datagram.
pub const MAX_CHUNK_SIZE: usize = MAX_UDP_PAYLOAD - CHUNK_HEADER_SIZE;

/// Largest audio payload that fits a single UDP datagram.
pub const MAX_AUDIO_PAYLOAD: usize = MAX_UDP_PAYLOAD - AUDIO_HEADER_SIZE;

pub const AUDIO_SAMPLE_RATE: u32 = 48_000;
pub const AUDIO_CHANNELS: usize = 2;
pub const AUDIO_FRAME_MS: u32 = 20;

/// Samples per channel in one 20 ms audio unit (960 at 48 kHz).
pub const AUDIO_FRAME_SAMPLES: u32 = AUDIO_SAMPLE_RATE * AUDIO_FRAME_MS / 1000;

/// Chunk payload size, validated against the protocol limits.
///
/// Both ends must agree on it: the receiver places chunk `i` at offset
/// `i * chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSize(u16);

impl ChunkSize {
    pub const DEFAULT: ChunkSize = ChunkSize(DEFAULT_CHUNK_SIZE as u16);

    pub fn new(size: usize) -> Result<Self, ConfigError> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&size) {
            return Err(ConfigError::ChunkSize(size));
        }
        Ok(ChunkSize(size as u16))
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0 as usize
    }

    /// Number of chunks needed for a frame of `frame_size` bytes.
    #[inline]
    pub fn chunks_for(self, frame_size: usize) -> usize {
        frame_size.div_ceil(self.get())
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        ChunkSize::DEFAULT
    }
}

/// Kind of datagram, identified by its leading magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Chunk,
    Ack,
    Audio,
}

/// Peek at the magic of a datagram. Returns None for short or unknown packets.
pub fn packet_kind(datagram: &[u8]) -> Option<PacketKind> {
    if datagram.len() < 4 {
        return None;
    }
    let mut magic = &datagram[..4];
    match magic.get_u32() {
        CHUNK_MAGIC => Some(PacketKind::Chunk),
        ACK_MAGIC => Some(PacketKind::Ack),
        AUDIO_MAGIC => Some(PacketKind::Audio),
        _ => None,
    }
}

fn expect_magic(buf: &mut &[u8], magic: u32) -> Result<(), WireError> {
    let got = buf.get_u32();
    if got != magic {
        return Err(WireError::BadMagic(got));
    }
    Ok(())
}

fn expect_len(datagram: &[u8], needed: usize) -> Result<(), WireError> {
    if datagram.len() < needed {
        return Err(WireError::Truncated {
            len: datagram.len(),
            needed,
        });
    }
    Ok(())
}

/// Header of one video chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub frame_id: u32,
    pub total_size: u32,
    pub chunk_index: u16,
    pub chunk_count: u16,
    pub payload_size: u16,
}

impl ChunkHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(CHUNK_MAGIC);
        buf.put_u32(self.frame_id);
        buf.put_u32(self.total_size);
        buf.put_u16(self.chunk_index);
        buf.put_u16(self.chunk_count);
        buf.put_u16(self.payload_size);
        buf.put_u16(0);
    }

    /// Decode the fixed header. Field ranges are checked by [`ChunkHeader::validate`].
    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        expect_len(datagram, CHUNK_HEADER_SIZE)?;
        let mut buf = datagram;
        expect_magic(&mut buf, CHUNK_MAGIC)?;
        Ok(ChunkHeader {
            frame_id: buf.get_u32(),
            total_size: buf.get_u32(),
            chunk_index: buf.get_u16(),
            chunk_count: buf.get_u16(),
            payload_size: buf.get_u16(),
        })
    }

    /// Check every field against the protocol limits and the length of the
    /// datagram the header arrived in.
    pub fn validate(&self, chunk_size: ChunkSize, datagram_len: usize) -> Result<(), WireError> {
        let total = self.total_size as usize;
        if total == 0 || total > MAX_FRAME_SIZE {
            return Err(out_of_range("total_size", self.total_size));
        }
        if self.chunk_count == 0 || self.chunk_index >= self.chunk_count {
            return Err(out_of_range("chunk_index", self.chunk_index));
        }
        if self.chunk_count as usize != chunk_size.chunks_for(total) {
            return Err(out_of_range("chunk_count", self.chunk_count));
        }
        let payload = self.payload_size as usize;
        if payload == 0 || payload > chunk_size.get() {
            return Err(out_of_range("payload_size", self.payload_size));
        }
        let available = datagram_len.saturating_sub(CHUNK_HEADER_SIZE);
        if payload > available {
            return Err(WireError::PayloadTooLarge {
                declared: payload,
                available,
            });
        }
        if self.offset(chunk_size) + payload > total {
            return Err(WireError::PayloadTooLarge {
                declared: payload,
                available: total.saturating_sub(self.offset(chunk_size)),
            });
        }
        Ok(())
    }

    /// Byte offset of this chunk's payload within the frame.
    #[inline]
    pub fn offset(&self, chunk_size: ChunkSize) -> usize {
        self.chunk_index as usize * chunk_size.get()
    }
}

fn out_of_range(field: &'static str, value: impl Into<u64>) -> WireError {
    WireError::FieldOutOfRange {
        field,
        value: value.into(),
    }
}

/// Encode a complete chunk datagram into `buf`, replacing its contents.
pub fn encode_chunk(buf: &mut Vec<u8>, header: &ChunkHeader, payload: &[u8]) {
    debug_assert_eq!(header.payload_size as usize, payload.len());
    buf.clear();
    header.encode(buf);
    buf.extend_from_slice(payload);
}

/// Acknowledgment of one displayed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPacket {
    pub frame_id: u32,
    pub viewer_fps: u32,
}

impl AckPacket {
    pub fn encode(&self) -> [u8; ACK_SIZE] {
        let mut out = [0u8; ACK_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32(ACK_MAGIC);
        buf.put_u32(self.frame_id);
        buf.put_u32(self.viewer_fps);
        out
    }

    /// Acks are fixed-size; anything else is rejected.
    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        expect_len(datagram, ACK_SIZE)?;
        if datagram.len() != ACK_SIZE {
            return Err(out_of_range("ack_length", datagram.len() as u64));
        }
        let mut buf = datagram;
        expect_magic(&mut buf, ACK_MAGIC)?;
        Ok(AckPacket {
            frame_id: buf.get_u32(),
            viewer_fps: buf.get_u32(),
        })
    }
}

/// Header of one audio unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioHeader {
    pub sequence: u32,
    pub timestamp: u32,
    pub payload_size: u16,
}

impl AudioHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(AUDIO_MAGIC);
        buf.put_u32(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u16(self.payload_size);
        buf.put_u16(0);
    }

    /// Decode the header and return it with its payload slice.
    pub fn decode(datagram: &[u8]) -> Result<(Self, &[u8]), WireError> {
        expect_len(datagram, AUDIO_HEADER_SIZE)?;
        let mut buf = datagram;
        expect_magic(&mut buf, AUDIO_MAGIC)?;
        let header = AudioHeader {
            sequence: buf.get_u32(),
            timestamp: buf.get_u32(),
            payload_size: buf.get_u16(),
        };
        let payload = header.payload_size as usize;
        let available = datagram.len() - AUDIO_HEADER_SIZE;
        if payload > available {
            return Err(WireError::PayloadTooLarge {
                declared: payload,
                available,
            });
        }
        Ok((
            header,
            &datagram[AUDIO_HEADER_SIZE..AUDIO_HEADER_SIZE + payload],
        ))
    }
}
