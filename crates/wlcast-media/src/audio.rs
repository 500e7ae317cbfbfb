/// Audio capture and codec interfaces.
///
/// Units are interleaved signed 16-bit samples, `AUDIO_FRAME_SAMPLES` frames
/// of `AUDIO_CHANNELS` channels each.

use std::f32::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

use audiopus::coder::{Decoder, Encoder};
use audiopus::packet::Packet;
use audiopus::{Application, Bitrate, Channels, MutSignals, SampleRate};

use wlcast_proto::protocol::{AUDIO_HEADER_SIZE, DEFAULT_CHUNK_SIZE};
use wlcast_proto::{AUDIO_CHANNELS, AUDIO_FRAME_MS, AUDIO_FRAME_SAMPLES, AUDIO_SAMPLE_RATE};

use crate::error::AudioError;

/// Produces one audio unit per call, blocking until it is available.
pub trait AudioSource: Send {
    fn read_unit(&mut self) -> Result<Vec<i16>, AudioError>;
}

pub trait AudioEncoder: Send {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, AudioError>;
}

pub trait AudioDecoder: Send {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, AudioError>;
}

/// Largest encoded unit. A unit plus its header fits one datagram at the
/// default chunk size, so audio is never IP-fragmented.
pub const MAX_OPUS_PACKET: usize = DEFAULT_CHUNK_SIZE - AUDIO_HEADER_SIZE;

pub const OPUS_BITRATE: i32 = 128_000;

/// Longest Opus frame (120 ms) in samples per channel.
const MAX_DECODED_FRAME: usize = 5760;

/// Opus encoder for 48 kHz stereo units.
pub struct OpusEncoder {
    encoder: Encoder,
    out: Vec<u8>,
}

impl OpusEncoder {
    pub fn new() -> Result<Self, AudioError> {
        Self::with_bitrate(OPUS_BITRATE)
    }

    pub fn with_bitrate(bits_per_second: i32) -> Result<Self, AudioError> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)?;
        encoder.set_bitrate(Bitrate::BitsPerSecond(bits_per_second))?;
        Ok(OpusEncoder {
            encoder,
            out: vec![0; MAX_OPUS_PACKET],
        })
    }
}

impl AudioEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, AudioError> {
        let expected = AUDIO_FRAME_SAMPLES as usize * AUDIO_CHANNELS;
        if pcm.len() != expected {
            return Err(AudioError::UnitSize {
                expected,
                got: pcm.len(),
            });
        }
        let len = self.encoder.encode(pcm, &mut self.out)?;
        Ok(self.out[..len].to_vec())
    }
}

/// Opus decoder producing interleaved 48 kHz stereo samples.
pub struct OpusDecoder {
    decoder: Decoder,
    out: Vec<i16>,
}

impl OpusDecoder {
    pub fn new() -> Result<Self, AudioError> {
        Ok(OpusDecoder {
            decoder: Decoder::new(SampleRate::Hz48000, Channels::Stereo)?,
            out: vec![0; MAX_DECODED_FRAME * AUDIO_CHANNELS],
        })
    }
}

impl AudioDecoder for OpusDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, AudioError> {
        let packet = Packet::try_from(payload)?;
        let signals = MutSignals::try_from(&mut self.out)?;
        let per_channel = self.decoder.decode(Some(packet), signals, false)?;
        Ok(self.out[..per_channel * AUDIO_CHANNELS].to_vec())
    }
}

/// Sine tone on all channels, delivered in real time.
pub struct ToneSource {
    frequency: f32,
    amplitude: f32,
    phase: f32,
    paced: bool,
    next_due: Option<Instant>,
}

impl ToneSource {
    pub fn new(frequency: f32) -> Self {
        ToneSource {
            frequency,
            amplitude: 0.2,
            phase: 0.0,
            paced: true,
            next_due: None,
        }
    }

    /// Generate units as fast as they are requested.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    fn pace(&mut self) {
        let unit = Duration::from_millis(AUDIO_FRAME_MS as u64);
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        // Fall back to now if we are more than a unit behind.
        self.next_due = Some(if now > due + unit { now + unit } else { due + unit });
    }
}

impl AudioSource for ToneSource {
    fn read_unit(&mut self) -> Result<Vec<i16>, AudioError> {
        if self.paced {
            self.pace();
        }
        let step = TAU * self.frequency / AUDIO_SAMPLE_RATE as f32;
        let mut unit = Vec::with_capacity(AUDIO_FRAME_SAMPLES as usize * AUDIO_CHANNELS);
        for _ in 0..AUDIO_FRAME_SAMPLES {
            let sample = (self.phase.sin() * self.amplitude * i16::MAX as f32) as i16;
            for _ in 0..AUDIO_CHANNELS {
                unit.push(sample);
            }
            self.phase = (self.phase + step) % TAU;
        }
        Ok(unit)
    }
}
