/// Audio channel: fixed-duration encoded units, one per datagram.
///
/// Each unit carries its own sequence number and a sample timestamp that
/// advances by one unit's worth of samples. There are no acks and no
/// retransmission; a lost unit is simply a gap for the player to fill.

use crate::error::WireError;
use crate::protocol::{AudioHeader, AUDIO_FRAME_SAMPLES, AUDIO_HEADER_SIZE, MAX_AUDIO_PAYLOAD};

/// One received audio unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    pub sequence: u32,
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

impl AudioPacket {
    pub fn parse(datagram: &[u8]) -> Result<Self, WireError> {
        let (header, payload) = AudioHeader::decode(datagram)?;
        Ok(AudioPacket {
            sequence: header.sequence,
            timestamp: header.timestamp,
            payload: payload.to_vec(),
        })
    }
}

/// Stamps encoded audio units with sequence and timestamp.
pub struct AudioPacketizer {
    sequence: u32,
    timestamp: u32,
    samples_per_unit: u32,
    buf: Vec<u8>,
}

impl AudioPacketizer {
    pub fn new() -> Self {
        Self::with_unit_samples(AUDIO_FRAME_SAMPLES)
    }

    pub fn with_unit_samples(samples_per_unit: u32) -> Self {
        AudioPacketizer {
            sequence: 0,
            timestamp: 0,
            samples_per_unit,
            buf: Vec::with_capacity(AUDIO_HEADER_SIZE + 4096),
        }
    }

    /// Build the datagram for the next unit. Sequence and timestamp advance
    /// whether or not the caller manages to send it.
    pub fn packetize(&mut self, payload: &[u8]) -> Result<&[u8], WireError> {
        if payload.len() > MAX_AUDIO_PAYLOAD {
            return Err(WireError::PayloadTooLarge {
                declared: payload.len(),
                available: MAX_AUDIO_PAYLOAD,
            });
        }
        let header = AudioHeader {
            sequence: self.sequence,
            timestamp: self.timestamp,
            payload_size: payload.len() as u16,
        };
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(self.samples_per_unit);

        self.buf.clear();
        header.encode(&mut self.buf);
        self.buf.extend_from_slice(payload);
        Ok(&self.buf)
    }

    /// Sequence number the next unit will carry.
    pub fn next_sequence(&self) -> u32 {
        self.sequence
    }

    pub fn next_timestamp(&self) -> u32 {
        self.timestamp
    }
}

impl Default for AudioPacketizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_and_timestamp_advance_per_unit() {
        let mut packetizer = AudioPacketizer::new();
        let first = AudioPacket::parse(packetizer.packetize(&[1, 2]).unwrap()).unwrap();
        let second = AudioPacket::parse(packetizer.packetize(&[3]).unwrap()).unwrap();

        assert_eq!((first.sequence, first.timestamp), (0, 0));
        assert_eq!((second.sequence, second.timestamp), (1, 960));
        assert_eq!(second.payload, vec![3]);
        assert_eq!(packetizer.next_sequence(), 2);
        assert_eq!(packetizer.next_timestamp(), 1920);
    }

    #[test]
    fn oversized_payload_rejected_without_advancing() {
        let mut packetizer = AudioPacketizer::new();
        let big = vec![0u8; MAX_AUDIO_PAYLOAD + 1];
        assert!(packetizer.packetize(&big).is_err());
        assert_eq!(packetizer.next_sequence(), 0);
    }

    #[test]
    fn timestamp_wraps() {
        let mut packetizer = AudioPacketizer::with_unit_samples(960);
        packetizer.timestamp = u32::MAX - 100;
        packetizer.packetize(&[]).unwrap();
        assert_eq!(packetizer.next_timestamp(), 859);
    }
}
