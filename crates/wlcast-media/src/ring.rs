/// Lock-free single-producer/single-consumer PCM ring.
///
/// The decode side pushes interleaved frames, the playback side pulls fixed
/// blocks on its own schedule. Cursors are free-running u32 frame counts;
/// samples are published by a release store of the write cursor and freed
/// by a release store of the read cursor.
///
/// A full ring drops the incoming tail (overrun). A pull that cannot be
/// satisfied completely plays silence instead (underrun).

use std::sync::Arc;
use std::sync::atomic::{AtomicI16, AtomicU32, AtomicU64, Ordering};

/// Default ring size in frames (~1.36 s at 48 kHz).
pub const DEFAULT_RING_FRAMES: usize = 1 << 16;

struct Shared {
    slots: Box<[AtomicI16]>,
    mask: u32,
    channels: usize,
    write: AtomicU32,
    read: AtomicU32,
    underruns: AtomicU64,
    overruns: AtomicU64,
}

impl Shared {
    fn capacity(&self) -> u32 {
        self.mask + 1
    }

    fn slot(&self, frame: u32, channel: usize) -> &AtomicI16 {
        &self.slots[(frame & self.mask) as usize * self.channels + channel]
    }
}

/// Create a ring holding `frames` frames of `channels` interleaved samples.
/// `frames` is rounded up to a power of two.
pub fn pcm_ring(frames: usize, channels: usize) -> (RingProducer, RingConsumer) {
    assert!(channels > 0, "pcm ring needs at least one channel");
    assert!(frames > 0 && frames <= 1 << 30, "pcm ring size out of range");
    let frames = frames.next_power_of_two();
    let slots = (0..frames * channels).map(|_| AtomicI16::new(0)).collect();
    let shared = Arc::new(Shared {
        slots,
        mask: frames as u32 - 1,
        channels,
        write: AtomicU32::new(0),
        read: AtomicU32::new(0),
        underruns: AtomicU64::new(0),
        overruns: AtomicU64::new(0),
    });
    (
        RingProducer {
            shared: shared.clone(),
        },
        RingConsumer { shared },
    )
}

pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Append interleaved samples. Returns the number of frames stored;
    /// frames that do not fit are dropped and counted as overruns.
    pub fn push(&self, samples: &[i16]) -> usize {
        let s = &*self.shared;
        let frames = (samples.len() / s.channels) as u32;
        let write = s.write.load(Ordering::Relaxed);
        let read = s.read.load(Ordering::Acquire);
        let free = s.capacity() - write.wrapping_sub(read);
        let n = frames.min(free);

        for (i, frame) in samples.chunks_exact(s.channels).take(n as usize).enumerate() {
            let pos = write.wrapping_add(i as u32);
            for (c, &sample) in frame.iter().enumerate() {
                s.slot(pos, c).store(sample, Ordering::Relaxed);
            }
        }
        s.write.store(write.wrapping_add(n), Ordering::Release);

        if n < frames {
            s.overruns.fetch_add((frames - n) as u64, Ordering::Relaxed);
        }
        n as usize
    }

    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }
}

pub struct RingConsumer {
    shared: Arc<Shared>,
}

impl RingConsumer {
    /// Fill `out` with the next frames. If fewer are buffered than `out`
    /// needs, `out` is filled with silence and nothing is consumed. Returns
    /// true when real samples were played.
    pub fn fill(&self, out: &mut [i16]) -> bool {
        let s = &*self.shared;
        let needed = (out.len() / s.channels) as u32;
        let read = s.read.load(Ordering::Relaxed);
        let write = s.write.load(Ordering::Acquire);
        if write.wrapping_sub(read) < needed {
            out.fill(0);
            s.underruns.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        for (i, frame) in out.chunks_exact_mut(s.channels).enumerate() {
            let pos = read.wrapping_add(i as u32);
            for (c, sample) in frame.iter_mut().enumerate() {
                *sample = s.slot(pos, c).load(Ordering::Relaxed);
            }
        }
        s.read.store(read.wrapping_add(needed), Ordering::Release);
        true
    }

    /// Frames currently buffered.
    pub fn available(&self) -> usize {
        let s = &*self.shared;
        s.write
            .load(Ordering::Acquire)
            .wrapping_sub(s.read.load(Ordering::Relaxed)) as usize
    }

    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    /// Read-only view of the ring's counters that can outlive this consumer
    /// being moved into an output callback.
    pub fn monitor(&self) -> RingMonitor {
        RingMonitor {
            shared: self.shared.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RingMonitor {
    shared: Arc<Shared>,
}

impl RingMonitor {
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }
}
