/// Frame receiver: reassembles chunk datagrams into frames and sends acks.
///
/// ```text
/// UDP ──► chunk ──► Reassembler (bitmap per frame) ──► CompletedFrame
///     └─► audio ──► bounded queue ──► poll_audio()
/// ```
///
/// Only one frame is assembled at a time. A chunk from a different frame
/// discards the frame in progress, and a frame that stops receiving chunks
/// for longer than the reassembly timeout is abandoned.

use std::collections::VecDeque;
use std::io;
use std::mem;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::audio::AudioPacket;
use crate::bitfield::ChunkBitmap;
use crate::error::{ReceiveError, WireError};
use crate::protocol::{
    packet_kind, AckPacket, ChunkHeader, ChunkSize, PacketKind, CHUNK_HEADER_SIZE,
    MAX_UDP_PAYLOAD,
};
use crate::transport::{bind_receiver, DatagramSocket};

/// An incomplete frame with no new chunk for this long is abandoned.
pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_millis(200);

/// Received audio units waiting for the player. Oldest dropped when full.
pub const AUDIO_QUEUE_CAPACITY: usize = 64;

/// A fully reassembled frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFrame {
    pub frame_id: u32,
    pub data: Vec<u8>,
}

/// What the reassembler did with one chunk datagram.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    Completed(CompletedFrame),
    Buffered,
    Duplicate,
    Rejected(WireError),
    /// The frame buffer could not be grown; the frame was dropped.
    AllocationFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    Idle,
    Assembling { frame_id: u32, received: u16, total: u16 },
}

struct Assembly {
    frame_id: u32,
    total_size: u32,
    chunk_count: u16,
    last_update: Instant,
}

pub struct Reassembler {
    chunk_size: ChunkSize,
    timeout: Duration,
    current: Option<Assembly>,
    /// `(frame_id, total_size, chunk_count)` of the last completed frame.
    /// Its late duplicates are ignored until another frame begins.
    last_completed: Option<(u32, u32, u16)>,
    bitmap: ChunkBitmap,
    buffer: Vec<u8>,
}

impl Reassembler {
    pub fn new(chunk_size: ChunkSize) -> Self {
        Self::with_timeout(chunk_size, REASSEMBLY_TIMEOUT)
    }

    pub fn with_timeout(chunk_size: ChunkSize, timeout: Duration) -> Self {
        Reassembler {
            chunk_size,
            timeout,
            current: None,
            last_completed: None,
            bitmap: ChunkBitmap::default(),
            buffer: Vec::new(),
        }
    }

    /// Feed one chunk datagram.
    pub fn accept(&mut self, datagram: &[u8], now: Instant) -> ChunkOutcome {
        let header = match ChunkHeader::decode(datagram) {
            Ok(h) => h,
            Err(e) => return ChunkOutcome::Rejected(e),
        };
        if let Err(e) = header.validate(self.chunk_size, datagram.len()) {
            return ChunkOutcome::Rejected(e);
        }

        let key = (header.frame_id, header.total_size, header.chunk_count);
        if self.current.is_none() && self.last_completed == Some(key) {
            return ChunkOutcome::Duplicate;
        }
        let matches = self
            .current
            .as_ref()
            .is_some_and(|a| (a.frame_id, a.total_size, a.chunk_count) == key);
        if !matches && !self.begin(&header, now) {
            return ChunkOutcome::AllocationFailed;
        }

        if !self.bitmap.set(header.chunk_index) {
            return ChunkOutcome::Duplicate;
        }

        let offset = header.offset(self.chunk_size);
        let len = header.payload_size as usize;
        self.buffer[offset..offset + len]
            .copy_from_slice(&datagram[CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + len]);
        if let Some(assembly) = self.current.as_mut() {
            assembly.last_update = now;
        }

        if !self.bitmap.is_complete() {
            return ChunkOutcome::Buffered;
        }
        let frame_id = header.frame_id;
        self.current = None;
        self.last_completed = Some(key);
        ChunkOutcome::Completed(CompletedFrame {
            frame_id,
            data: mem::take(&mut self.buffer),
        })
    }

    /// Drop any previous progress and size the buffers for a new frame.
    fn begin(&mut self, header: &ChunkHeader, now: Instant) -> bool {
        if let Some(old) = self.current.take() {
            trace!(
                old = old.frame_id,
                new = header.frame_id,
                "frame superseded before completion"
            );
        }
        self.last_completed = None;
        let total = header.total_size as usize;
        self.buffer.clear();
        if let Err(e) = self.buffer.try_reserve_exact(total) {
            warn!("cannot allocate {} bytes for frame {}: {}", total, header.frame_id, e);
            self.buffer = Vec::new();
            return false;
        }
        self.buffer.resize(total, 0);
        self.bitmap.reset(header.chunk_count);
        self.current = Some(Assembly {
            frame_id: header.frame_id,
            total_size: header.total_size,
            chunk_count: header.chunk_count,
            last_update: now,
        });
        true
    }

    /// Abandon the frame in progress if it has gone quiet. Returns the id of
    /// the abandoned frame.
    pub fn expire(&mut self, now: Instant) -> Option<u32> {
        let stale = self
            .current
            .as_ref()
            .is_some_and(|a| now.saturating_duration_since(a.last_update) > self.timeout);
        if !stale {
            return None;
        }
        self.current.take().map(|a| a.frame_id)
    }

    pub fn state(&self) -> AssemblyState {
        match &self.current {
            None => AssemblyState::Idle,
            Some(a) => AssemblyState::Assembling {
                frame_id: a.frame_id,
                received: self.bitmap.received(),
                total: a.chunk_count,
            },
        }
    }
}

/// Receiver-side counters, kept for the life of the receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub frames_completed: u64,
    pub frames_abandoned: u64,
    pub malformed: u64,
    pub audio_dropped: u64,
}

pub struct FrameReceiver<S = UdpSocket> {
    socket: S,
    reassembler: Reassembler,
    audio_queue: VecDeque<AudioPacket>,
    /// Source of the most recent valid chunk; acks go here.
    streamer_addr: Option<SocketAddr>,
    recv_buf: Box<[u8]>,
    stats: ReceiverStats,
}

impl FrameReceiver<UdpSocket> {
    /// Bind a non-blocking UDP socket on `addr`.
    pub fn bind(addr: SocketAddr, chunk_size: ChunkSize) -> io::Result<Self> {
        let socket = bind_receiver(addr)?;
        Ok(Self::with_socket(socket, chunk_size))
    }
}

impl<S: DatagramSocket> FrameReceiver<S> {
    pub fn with_socket(socket: S, chunk_size: ChunkSize) -> Self {
        FrameReceiver {
            socket,
            reassembler: Reassembler::new(chunk_size),
            audio_queue: VecDeque::with_capacity(AUDIO_QUEUE_CAPACITY),
            streamer_addr: None,
            recv_buf: vec![0u8; MAX_UDP_PAYLOAD + 1].into_boxed_slice(),
            stats: ReceiverStats::default(),
        }
    }

    pub fn poll(&mut self) -> Result<Option<CompletedFrame>, ReceiveError> {
        self.poll_at(Instant::now())
    }

    /// Drain queued datagrams without blocking. Returns as soon as a frame
    /// completes; remaining datagrams are left for the next call.
    pub fn poll_at(&mut self, now: Instant) -> Result<Option<CompletedFrame>, ReceiveError> {
        if let Some(frame_id) = self.reassembler.expire(now) {
            trace!(frame_id, "incomplete frame timed out");
            self.stats.frames_abandoned += 1;
        }

        loop {
            let (len, from) = match self.socket.recv_from(&mut self.recv_buf) {
                Ok(r) => r,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(None);
                }
                // Windows reports ICMP port unreachable from a previous ack.
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            };
            let datagram = &self.recv_buf[..len];

            match packet_kind(datagram) {
                Some(PacketKind::Chunk) => match self.reassembler.accept(datagram, now) {
                    ChunkOutcome::Rejected(e) => {
                        trace!("dropping chunk from {}: {}", from, e);
                        self.stats.malformed += 1;
                    }
                    outcome => {
                        // Audio may come from another socket; acks follow video.
                        self.streamer_addr = Some(from);
                        match outcome {
                            ChunkOutcome::Completed(frame) => {
                                self.stats.frames_completed += 1;
                                return Ok(Some(frame));
                            }
                            ChunkOutcome::AllocationFailed => self.stats.frames_abandoned += 1,
                            _ => {}
                        }
                    }
                },
                Some(PacketKind::Audio) => match AudioPacket::parse(datagram) {
                    Ok(packet) => {
                        if self.audio_queue.len() == AUDIO_QUEUE_CAPACITY {
                            self.audio_queue.pop_front();
                            self.stats.audio_dropped += 1;
                        }
                        self.audio_queue.push_back(packet);
                    }
                    Err(e) => {
                        trace!("dropping audio from {}: {}", from, e);
                        self.stats.malformed += 1;
                    }
                },
                Some(PacketKind::Ack) | None => {
                    self.stats.malformed += 1;
                }
            }
        }
    }

    /// Next queued audio unit, oldest first.
    pub fn poll_audio(&mut self) -> Option<AudioPacket> {
        self.audio_queue.pop_front()
    }

    /// Acknowledge a displayed frame. Returns false if no streamer has been
    /// heard from yet or the send failed; ack loss is tolerated.
    pub fn send_ack(&self, frame_id: u32, viewer_fps: u32) -> bool {
        let Some(addr) = self.streamer_addr else {
            return false;
        };
        let ack = AckPacket {
            frame_id,
            viewer_fps,
        };
        match self.socket.send_to(&ack.encode(), addr) {
            Ok(_) => true,
            Err(e) => {
                debug!("ack for frame {} to {} failed: {}", frame_id, addr, e);
                false
            }
        }
    }

    pub fn streamer_addr(&self) -> Option<SocketAddr> {
        self.streamer_addr
    }

    pub fn state(&self) -> AssemblyState {
        self.reassembler.state()
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }
}
