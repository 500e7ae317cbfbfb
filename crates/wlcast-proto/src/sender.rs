/// Frame sender: splits compressed frames into chunk datagrams and tracks the
/// acks that come back on the same socket.
///
/// ```text
/// send_frame:  frame ──► [record in history] ──► chunk 0 … chunk N-1 ──► UDP
/// poll_acks:   UDP ──► [ack] ──► StatsTracker (RTT, loss, liveness)
/// ```
///
/// Chunks that hit a full send buffer are dropped, never retried: a stale
/// frame is worth less than the next one.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Instant;

use tracing::{debug, trace};

use crate::error::SendError;
use crate::protocol::{
    encode_chunk, AckPacket, ChunkHeader, ChunkSize, ACK_SIZE, CHUNK_HEADER_SIZE, MAX_FRAME_SIZE,
};
use crate::stats::{NetworkStats, StatsTracker, TrackerConfig};
use crate::transport::{bind_sender, DatagramSocket};

/// Ack receive buffer; larger than an ack so oversized datagrams are seen
/// (and rejected) rather than truncated into something that looks valid.
const ACK_RECV_BUF: usize = 64;

/// Outcome of one `send_frame` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentFrame {
    pub frame_id: u32,
    pub chunk_count: u16,
    /// Chunks skipped because the socket would have blocked.
    pub chunks_dropped: u16,
}

pub struct FrameSender<S = UdpSocket> {
    socket: S,
    dest: SocketAddr,
    chunk_size: ChunkSize,
    next_frame_id: u32,
    tracker: StatsTracker,
    packet_buf: Vec<u8>,
}

impl FrameSender<UdpSocket> {
    /// Open a non-blocking UDP socket aimed at `dest`.
    pub fn connect(dest: SocketAddr, chunk_size: ChunkSize) -> io::Result<Self> {
        let socket = bind_sender(dest)?;
        Ok(Self::with_socket(socket, dest, chunk_size, TrackerConfig::default()))
    }
}

impl<S: DatagramSocket> FrameSender<S> {
    pub fn with_socket(
        socket: S,
        dest: SocketAddr,
        chunk_size: ChunkSize,
        tracker: TrackerConfig,
    ) -> Self {
        FrameSender {
            socket,
            dest,
            chunk_size,
            next_frame_id: 1,
            tracker: StatsTracker::new(tracker),
            packet_buf: Vec::with_capacity(CHUNK_HEADER_SIZE + chunk_size.get()),
        }
    }

    pub fn send_frame(&mut self, data: &[u8]) -> Result<SentFrame, SendError> {
        self.send_frame_at(data, Instant::now())
    }

    /// Send one frame, stamping its history record with `now`.
    pub fn send_frame_at(&mut self, data: &[u8], now: Instant) -> Result<SentFrame, SendError> {
        if data.is_empty() || data.len() > MAX_FRAME_SIZE {
            return Err(SendError::InvalidSize(data.len()));
        }

        let frame_id = self.take_frame_id();
        let chunk_size = self.chunk_size.get();
        let chunk_count = self.chunk_size.chunks_for(data.len()) as u16;
        self.tracker.record_sent(frame_id, now);

        let mut dropped = 0u16;
        for (index, payload) in data.chunks(chunk_size).enumerate() {
            let header = ChunkHeader {
                frame_id,
                total_size: data.len() as u32,
                chunk_index: index as u16,
                chunk_count,
                payload_size: payload.len() as u16,
            };
            encode_chunk(&mut self.packet_buf, &header, payload);

            match self.socket.send_to(&self.packet_buf, self.dest) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    dropped += 1;
                }
                Err(e) => return Err(SendError::Transport(e)),
            }
        }

        if dropped > 0 {
            trace!(frame_id, dropped, chunk_count, "send buffer full, chunks dropped");
        }
        Ok(SentFrame {
            frame_id,
            chunk_count,
            chunks_dropped: dropped,
        })
    }

    /// Post-increment the frame counter. Zero is never handed out.
    fn take_frame_id(&mut self) -> u32 {
        let id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1);
        if self.next_frame_id == 0 {
            self.next_frame_id = 1;
        }
        id
    }

    pub fn poll_acks(&mut self) {
        self.poll_acks_at(Instant::now());
    }

    /// Drain pending acks without blocking, then run loss detection.
    pub fn poll_acks_at(&mut self, now: Instant) {
        if self.tracker.check_liveness(now) {
            debug!("viewer stopped acking, marked disconnected");
        }

        let mut buf = [0u8; ACK_RECV_BUF];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, _from)) => {
                    if len != ACK_SIZE {
                        continue;
                    }
                    if let Ok(ack) = AckPacket::decode(&buf[..len]) {
                        self.tracker.on_ack(&ack, now);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable surfaces here on some platforms.
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => {
                    debug!("ack receive failed: {}", e);
                    break;
                }
            }
        }

        self.tracker.detect_losses(now);
    }

    pub fn stats(&self) -> NetworkStats {
        self.tracker.snapshot()
    }

    pub fn reset_window(&mut self) {
        self.tracker.reset_window();
    }

    pub fn chunk_size(&self) -> ChunkSize {
        self.chunk_size
    }

    pub fn dest(&self) -> SocketAddr {
        self.dest
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }
}
