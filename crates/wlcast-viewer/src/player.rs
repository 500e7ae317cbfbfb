/// Audio playback: packets are handed to a decode thread over a bounded
/// channel, decoded samples go into the PCM ring, and the output pulls
/// blocks from the ring on its own clock. The output is either the default
/// sound device, whose callback drains the ring directly, or a byte sink fed
/// by a playback thread pacing itself at the stream's sample rate.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, info, warn};

use wlcast_media::{
    pcm_ring, AudioDecoder, RingConsumer, RingMonitor, RingProducer, DEFAULT_RING_FRAMES,
};
use wlcast_proto::protocol::{AUDIO_CHANNELS, AUDIO_SAMPLE_RATE};
use wlcast_proto::AudioPacket;

/// Frames pulled per playback tick when pacing a byte sink.
pub const PLAYBACK_BLOCK_FRAMES: usize = 512;

const PACKET_QUEUE: usize = 64;

/// How often the device thread checks for shutdown while parked.
#[cfg(feature = "audio-device")]
const PARK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("audio thread: {0}")]
    Io(#[from] io::Error),

    #[cfg(feature = "audio-device")]
    #[error("audio output thread exited before starting")]
    Closed,

    #[cfg(feature = "audio-device")]
    #[error("no default audio output device")]
    NoDevice,

    #[cfg(feature = "audio-device")]
    #[error("{0} has no 48 kHz stereo i16 or f32 output")]
    UnsupportedDevice(String),

    #[cfg(feature = "audio-device")]
    #[error("querying output configs: {0}")]
    Configs(#[from] cpal::SupportedStreamConfigsError),

    #[cfg(feature = "audio-device")]
    #[error("building output stream: {0}")]
    Build(#[from] cpal::BuildStreamError),

    #[cfg(feature = "audio-device")]
    #[error("starting output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
}

/// Where decoded audio is played.
pub enum AudioOutput {
    /// The default output device.
    #[cfg(feature = "audio-device")]
    Device,
    /// Raw interleaved s16le, written in real time.
    Writer(Box<dyn Write + Send>),
    /// Consumed in real time and thrown away.
    Discard,
}

#[derive(Debug, Default)]
struct Counters {
    packets_received: AtomicU64,
    packets_dropped: AtomicU64,
    decode_errors: AtomicU64,
    blocks_played: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerStats {
    pub packets_received: u64,
    /// Packets discarded because the decode queue was full.
    pub packets_dropped: u64,
    pub decode_errors: u64,
    /// Output blocks filled with real samples.
    pub blocks_played: u64,
    pub underruns: u64,
    pub overruns: u64,
}

/// Decode side: one packet in, samples into the ring.
pub struct PacketSink<D> {
    decoder: D,
    producer: RingProducer,
    counters: Arc<Counters>,
}

impl<D: AudioDecoder> PacketSink<D> {
    pub fn deliver(&mut self, packet: &AudioPacket) {
        match self.decoder.decode(&packet.payload) {
            Ok(samples) => {
                self.producer.push(&samples);
                self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                debug!(sequence = packet.sequence, "audio decode failed: {}", e);
            }
        }
    }
}

/// Pull side of the ring, shared by every output.
struct Drain {
    consumer: RingConsumer,
    counters: Arc<Counters>,
}

impl Drain {
    /// Fill `out` from the ring, or with silence on underrun. Returns true
    /// when real samples were played.
    fn fill(&self, out: &mut [i16]) -> bool {
        let played = self.consumer.fill(out);
        if played {
            self.counters.blocks_played.fetch_add(1, Ordering::Relaxed);
        }
        played
    }
}

/// Byte-sink output: pulls one block per tick and writes it out.
pub struct Playback {
    drain: Drain,
    output: Option<Box<dyn Write + Send>>,
    block: Vec<i16>,
    bytes: Vec<u8>,
}

impl Playback {
    fn new(drain: Drain, output: Option<Box<dyn Write + Send>>) -> Self {
        Playback {
            drain,
            output,
            block: vec![0; PLAYBACK_BLOCK_FRAMES * AUDIO_CHANNELS],
            bytes: Vec::with_capacity(PLAYBACK_BLOCK_FRAMES * AUDIO_CHANNELS * 2),
        }
    }

    /// Play one block. Underruns write silence so the output clock keeps
    /// running. Returns true when real samples were played.
    pub fn tick(&mut self) -> bool {
        let played = self.drain.fill(&mut self.block);

        if let Some(output) = self.output.as_mut() {
            self.bytes.clear();
            for sample in &self.block {
                self.bytes.extend_from_slice(&sample.to_le_bytes());
            }
            if let Err(e) = output.write_all(&self.bytes) {
                warn!("audio output failed, discarding from now on: {}", e);
                self.output = None;
            }
        }
        played
    }

    fn flush(&mut self) {
        if let Some(output) = self.output.as_mut()
            && let Err(e) = output.flush()
        {
            warn!("audio output flush failed: {}", e);
        }
    }

    /// Tick on the stream's clock until `running` clears.
    fn run(mut self, running: &AtomicBool) {
        let period = block_period();
        let mut next = Instant::now();
        while running.load(Ordering::Relaxed) {
            self.tick();
            next += period;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                // Fell behind; don't try to catch up with a burst.
                next = now;
            }
        }
        self.flush();
    }
}

/// Build the decode half and the pull half around a fresh ring.
fn ring_halves<D: AudioDecoder>(decoder: D, ring_frames: usize) -> (PacketSink<D>, Drain) {
    let counters = Arc::new(Counters::default());
    let (producer, consumer) = pcm_ring(ring_frames, AUDIO_CHANNELS);
    (
        PacketSink {
            decoder,
            producer,
            counters: counters.clone(),
        },
        Drain { consumer, counters },
    )
}

/// Build a decode half and a byte-sink playback half around a fresh ring.
#[cfg(test)]
fn split<D: AudioDecoder>(
    decoder: D,
    output: Option<Box<dyn Write + Send>>,
    ring_frames: usize,
) -> (PacketSink<D>, Playback) {
    let (sink, drain) = ring_halves(decoder, ring_frames);
    (sink, Playback::new(drain, output))
}

fn block_period() -> Duration {
    Duration::from_secs_f64(PLAYBACK_BLOCK_FRAMES as f64 / AUDIO_SAMPLE_RATE as f64)
}

/// Own the device stream on this thread until `running` clears. The stream
/// cannot move between threads, so it is built here and readiness is
/// reported back over `ready`.
#[cfg(feature = "audio-device")]
fn run_device(drain: Drain, running: &AtomicBool, ready: Sender<Result<(), PlayerError>>) {
    let stream = crate::device::open_output(move |out| {
        drain.fill(out);
    });
    match stream {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            while running.load(Ordering::Relaxed) {
                thread::park_timeout(PARK_INTERVAL);
            }
            drop(stream);
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

pub struct AudioPlayer {
    queue: Option<Sender<AudioPacket>>,
    running: Arc<AtomicBool>,
    decode_thread: Option<JoinHandle<()>>,
    play_thread: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
    ring: RingMonitor,
    stats: Option<PlayerStats>,
}

impl AudioPlayer {
    /// Start the output first, so a missing device fails before any decode
    /// thread exists, then the decode thread.
    pub fn start<D>(decoder: D, output: AudioOutput) -> Result<Self, PlayerError>
    where
        D: AudioDecoder + 'static,
    {
        let (mut sink, drain) = ring_halves(decoder, DEFAULT_RING_FRAMES);
        let counters = sink.counters.clone();
        let ring = drain.consumer.monitor();
        let running = Arc::new(AtomicBool::new(true));

        let play_running = running.clone();
        let play_thread = match output {
            #[cfg(feature = "audio-device")]
            AudioOutput::Device => {
                let (ready_tx, ready_rx) = bounded(1);
                let handle = thread::Builder::new()
                    .name("wlcast-audio-play".into())
                    .spawn(move || run_device(drain, &play_running, ready_tx))?;
                let ready = ready_rx.recv().unwrap_or(Err(PlayerError::Closed));
                if let Err(e) = ready {
                    let _ = handle.join();
                    return Err(e);
                }
                handle
            }
            AudioOutput::Writer(writer) => spawn_playback(Some(writer), drain, play_running)?,
            AudioOutput::Discard => spawn_playback(None, drain, play_running)?,
        };

        let (tx, rx) = bounded::<AudioPacket>(PACKET_QUEUE);
        let decode_thread = thread::Builder::new()
            .name("wlcast-audio-decode".into())
            .spawn(move || {
                // Ends when the player drops its sender.
                for packet in rx.iter() {
                    sink.deliver(&packet);
                }
            });
        let decode_thread = match decode_thread {
            Ok(handle) => handle,
            Err(e) => {
                running.store(false, Ordering::Relaxed);
                play_thread.thread().unpark();
                let _ = play_thread.join();
                return Err(e.into());
            }
        };

        Ok(AudioPlayer {
            queue: Some(tx),
            running,
            decode_thread: Some(decode_thread),
            play_thread: Some(play_thread),
            counters,
            ring,
            stats: None,
        })
    }

    /// Queue a packet for decoding. Returns false when it was dropped.
    pub fn submit(&self, packet: AudioPacket) -> bool {
        let Some(queue) = self.queue.as_ref() else {
            return false;
        };
        match queue.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Stop both threads and report totals. Later calls return the same totals.
    pub fn stop(&mut self) -> PlayerStats {
        if let Some(stats) = self.stats {
            return stats;
        }

        // Decoder first so no more samples land in the ring.
        self.queue = None;
        if let Some(handle) = self.decode_thread.take()
            && handle.join().is_err()
        {
            warn!("audio decode thread panicked");
        }

        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.play_thread.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("audio playback thread panicked");
            }
        }

        let stats = PlayerStats {
            packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            packets_dropped: self.counters.packets_dropped.load(Ordering::Relaxed),
            decode_errors: self.counters.decode_errors.load(Ordering::Relaxed),
            blocks_played: self.counters.blocks_played.load(Ordering::Relaxed),
            underruns: self.ring.underruns(),
            overruns: self.ring.overruns(),
        };

        info!(
            "audio: {} packets received, {} played, {} underruns, {} overruns",
            stats.packets_received, stats.blocks_played, stats.underruns, stats.overruns
        );
        self.stats = Some(stats);
        stats
    }
}

fn spawn_playback(
    output: Option<Box<dyn Write + Send>>,
    drain: Drain,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    let playback = Playback::new(drain, output);
    thread::Builder::new()
        .name("wlcast-audio-play".into())
        .spawn(move || playback.run(&running))
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use wlcast_media::{AudioEncoder, AudioError, AudioSource, OpusDecoder, OpusEncoder, ToneSource};

    /// Payload is the samples verbatim, little-endian.
    struct Raw;

    impl AudioDecoder for Raw {
        fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, AudioError> {
            Ok(payload
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect())
        }
    }

    #[derive(Clone, Default)]
    struct SharedOutput(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenOutput;

    impl Write for BrokenOutput {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn packet(sequence: u32, samples: &[i16]) -> AudioPacket {
        AudioPacket {
            sequence,
            timestamp: sequence * 960,
            payload: samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
        }
    }

    /// One block's worth of interleaved stereo samples.
    fn block_of(value: i16) -> Vec<i16> {
        vec![value; PLAYBACK_BLOCK_FRAMES * 2]
    }

    fn opus_packets(count: u32) -> Vec<AudioPacket> {
        let mut source = ToneSource::new(440.0).unpaced();
        let mut encoder = OpusEncoder::new().unwrap();
        (0..count)
            .map(|sequence| AudioPacket {
                sequence,
                timestamp: sequence * 960,
                payload: encoder.encode(&source.read_unit().unwrap()).unwrap(),
            })
            .collect()
    }

    #[test]
    fn underrun_plays_silence() {
        let out = SharedOutput::default();
        let (_sink, mut playback) = split(Raw, Some(Box::new(out.clone())), 4096);

        assert!(!playback.tick());
        assert_eq!(playback.drain.consumer.underruns(), 1);
        let written = out.0.lock().unwrap();
        assert_eq!(written.len(), PLAYBACK_BLOCK_FRAMES * 2 * 2);
        assert!(written.iter().all(|&b| b == 0));
    }

    #[test]
    fn decoded_samples_reach_the_output() {
        let out = SharedOutput::default();
        let (mut sink, mut playback) = split(Raw, Some(Box::new(out.clone())), 4096);

        sink.deliver(&packet(0, &block_of(7)));
        assert!(playback.tick());

        let written = out.0.lock().unwrap();
        assert_eq!(written.len(), PLAYBACK_BLOCK_FRAMES * 4);
        assert_eq!(&written[..4], &[7, 0, 7, 0]);
        assert_eq!(sink.counters.packets_received.load(Ordering::Relaxed), 1);
        assert_eq!(sink.counters.blocks_played.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn opus_units_fill_the_ring() {
        let (mut sink, playback) = split(OpusDecoder::new().unwrap(), None, 4096);
        for p in opus_packets(3) {
            sink.deliver(&p);
        }
        assert_eq!(sink.counters.decode_errors.load(Ordering::Relaxed), 0);
        assert_eq!(playback.drain.consumer.available(), 3 * 960);
    }

    #[test]
    fn partial_block_waits_for_more() {
        let (mut sink, mut playback) = split(Raw, None, 4096);

        // Half a block is not enough; nothing is consumed.
        sink.deliver(&packet(0, &vec![1; PLAYBACK_BLOCK_FRAMES]));
        assert!(!playback.tick());
        assert_eq!(playback.drain.consumer.available(), PLAYBACK_BLOCK_FRAMES / 2);

        sink.deliver(&packet(1, &vec![1; PLAYBACK_BLOCK_FRAMES]));
        assert!(playback.tick());
        assert_eq!(playback.drain.consumer.available(), 0);
    }

    #[test]
    fn bad_payload_counts_decode_error() {
        let (mut sink, _playback) = split(OpusDecoder::new().unwrap(), None, 4096);
        sink.deliver(&AudioPacket {
            sequence: 3,
            timestamp: 0,
            payload: Vec::new(),
        });
        assert_eq!(sink.counters.decode_errors.load(Ordering::Relaxed), 1);
        assert_eq!(sink.counters.packets_received.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn ring_overrun_drops_tail() {
        let (mut sink, playback) = split(Raw, None, PLAYBACK_BLOCK_FRAMES);
        sink.deliver(&packet(0, &block_of(1)));
        sink.deliver(&packet(1, &block_of(2)));
        assert_eq!(playback.drain.consumer.overruns(), PLAYBACK_BLOCK_FRAMES as u64);
        assert_eq!(playback.drain.consumer.available(), PLAYBACK_BLOCK_FRAMES);
    }

    #[test]
    fn failing_output_is_dropped() {
        let (_sink, mut playback) = split(Raw, Some(Box::new(BrokenOutput)), 4096);
        playback.tick();
        assert!(playback.output.is_none());
        playback.tick();
    }

    #[test]
    fn threaded_player_runs_and_stops() {
        let out = SharedOutput::default();
        let mut player =
            AudioPlayer::start(Raw, AudioOutput::Writer(Box::new(out.clone()))).unwrap();
        for seq in 0..4 {
            assert!(player.submit(packet(seq, &block_of(5))));
        }
        thread::sleep(Duration::from_millis(100));

        let stats = player.stop();
        assert_eq!(stats.packets_received, 4);
        assert_eq!(stats.packets_dropped, 0);
        assert!(stats.blocks_played + stats.underruns > 0);
        assert!(!out.0.lock().unwrap().is_empty());

        assert_eq!(player.stop(), stats);
        assert!(!player.submit(packet(9, &block_of(5))));
    }

    #[test]
    fn discard_output_still_drains_the_ring() {
        let mut player = AudioPlayer::start(OpusDecoder::new().unwrap(), AudioOutput::Discard).unwrap();
        for p in opus_packets(5) {
            assert!(player.submit(p));
        }
        thread::sleep(Duration::from_millis(150));

        let stats = player.stop();
        assert_eq!(stats.packets_received, 5);
        assert_eq!(stats.decode_errors, 0);
        assert!(stats.blocks_played > 0);
    }
}
