/// Audio side channel: one thread reading units from an audio source,
/// encoding them and sending each as a single datagram to the viewer's port.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use wlcast_media::{AudioEncoder, AudioSource};
use wlcast_proto::{AudioPacketizer, DatagramSocket, StreamEvent, StreamLog, StreamLogger};

const COMPONENT: &str = "audio";

#[derive(Debug, Default)]
struct Counters {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    encode_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub encode_errors: u64,
}

impl Counters {
    fn snapshot(&self) -> AudioStats {
        AudioStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a running audio thread. Dropping it stops the thread.
pub struct AudioStreamer {
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<()>>,
    logger: Arc<dyn StreamLogger>,
}

impl AudioStreamer {
    pub fn start<A, E, S>(
        source: A,
        encoder: E,
        socket: S,
        dest: SocketAddr,
        logger: Arc<dyn StreamLogger>,
    ) -> io::Result<Self>
    where
        A: AudioSource + 'static,
        E: AudioEncoder + 'static,
        S: DatagramSocket + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            source,
            encoder,
            socket,
            dest,
            packetizer: AudioPacketizer::new(),
            running: running.clone(),
            counters: counters.clone(),
        };
        let handle = thread::Builder::new()
            .name("wlcast-audio".into())
            .spawn(move || worker.run())?;

        logger.log(StreamLog {
            component: COMPONENT,
            event: StreamEvent::AudioStarted { dest },
        });

        Ok(AudioStreamer {
            running,
            counters,
            handle: Some(handle),
            logger,
        })
    }

    pub fn stats(&self) -> AudioStats {
        self.counters.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and wait for it. Calling again is a no-op.
    pub fn stop(&mut self) -> AudioStats {
        self.running.store(false, Ordering::Relaxed);
        let Some(handle) = self.handle.take() else {
            return self.stats();
        };
        if handle.join().is_err() {
            warn!("audio thread panicked");
        }

        let stats = self.stats();
        self.logger.log(StreamLog {
            component: COMPONENT,
            event: StreamEvent::AudioStopped {
                packets_sent: stats.packets_sent,
                bytes_sent: stats.bytes_sent,
            },
        });
        stats
    }
}

impl Drop for AudioStreamer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker<A, E, S> {
    source: A,
    encoder: E,
    socket: S,
    dest: SocketAddr,
    packetizer: AudioPacketizer,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl<A, E, S> Worker<A, E, S>
where
    A: AudioSource,
    E: AudioEncoder,
    S: DatagramSocket,
{
    fn run(mut self) {
        while self.running.load(Ordering::Relaxed) {
            let pcm = match self.source.read_unit() {
                Ok(pcm) => pcm,
                Err(e) => {
                    warn!("audio source stopped: {}", e);
                    break;
                }
            };

            // A failed encode drops the unit without consuming a sequence number.
            let payload = match self.encoder.encode(&pcm) {
                Ok(payload) => payload,
                Err(e) => {
                    self.counters.encode_errors.fetch_add(1, Ordering::Relaxed);
                    debug!("audio encode failed: {}", e);
                    continue;
                }
            };

            let datagram = match self.packetizer.packetize(&payload) {
                Ok(datagram) => datagram,
                Err(e) => {
                    self.counters.encode_errors.fetch_add(1, Ordering::Relaxed);
                    debug!("audio unit not sendable: {}", e);
                    continue;
                }
            };

            match self.socket.send_to(datagram, self.dest) {
                Ok(n) if n > 0 => {
                    self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                    self.counters.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => debug!("audio send failed: {}", e),
            }
        }
        self.running.store(false, Ordering::Relaxed);
    }
}
