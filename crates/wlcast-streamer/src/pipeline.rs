/// Producer loop: capture → encode → send → poll acks → pace.
///
/// Once a second the window closes: the quality controller runs on the
/// window's network stats, the encoder picks up the new quality, and a
/// summary is logged.

use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use wlcast_media::{CaptureError, FrameEncoder, FrameSource};
use wlcast_proto::{
    DatagramSocket, FrameSender, NetSummary, NetworkStats, QualityController, RateChange,
    SendError, SentFrame, StreamEvent, StreamLog, StreamLogger, WindowDecision, WindowReport,
};

/// Length of one measurement window.
pub const WINDOW: Duration = Duration::from_secs(1);

const COMPONENT: &str = "streamer";

/// Errors that end the producer loop.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("send failed: {0}")]
    Send(#[from] SendError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Sent(SentFrame),
    /// The frame was captured but not sent (encode failure or bad size).
    Skipped,
}

struct Window {
    started: Instant,
    frames: u32,
    bytes: u64,
}

impl Window {
    fn new(started: Instant) -> Self {
        Window {
            started,
            frames: 0,
            bytes: 0,
        }
    }
}

pub struct Pipeline<C, E, S = UdpSocket> {
    source: C,
    encoder: E,
    sender: FrameSender<S>,
    controller: QualityController,
    logger: Arc<dyn StreamLogger>,
    window: Window,
    viewer_connected: bool,
}

impl<C, E, S> Pipeline<C, E, S>
where
    C: FrameSource,
    E: FrameEncoder,
    S: DatagramSocket,
{
    pub fn new(
        source: C,
        mut encoder: E,
        sender: FrameSender<S>,
        controller: QualityController,
        logger: Arc<dyn StreamLogger>,
    ) -> Self {
        encoder.set_quality(controller.quality());
        Pipeline {
            source,
            encoder,
            sender,
            controller,
            logger,
            window: Window::new(Instant::now()),
            viewer_connected: false,
        }
    }

    fn log(&self, event: StreamEvent) {
        self.logger.log(StreamLog {
            component: COMPONENT,
            event,
        });
    }

    /// Run until `running` is cleared or a fatal error occurs.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), PipelineError> {
        self.log(StreamEvent::StreamStarted {
            dest: self.sender.dest(),
            chunk_size: self.sender.chunk_size().get(),
            quality: self.controller.quality(),
        });
        self.window = Window::new(Instant::now());

        while running.load(Ordering::Relaxed) {
            let frame_start = Instant::now();
            if let Err(e) = self.step_at(frame_start) {
                self.log(StreamEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
            if let Some(interval) = self.controller.frame_interval() {
                let elapsed = frame_start.elapsed();
                if elapsed < interval {
                    thread::sleep(interval - elapsed);
                }
            }
        }

        self.log(StreamEvent::Stopped);
        Ok(())
    }

    /// One loop iteration. `now` stamps the send and closes the window when
    /// a full window has elapsed.
    pub fn step_at(&mut self, now: Instant) -> Result<StepOutcome, PipelineError> {
        let raw = self.source.next_frame()?;
        let jpeg = match self.encoder.encode(&raw) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                warn!("encode failed, skipping frame: {}", e);
                return Ok(StepOutcome::Skipped);
            }
        };

        let sent = match self.sender.send_frame_at(&jpeg, now) {
            Ok(sent) => sent,
            Err(SendError::InvalidSize(size)) => {
                warn!("encoded frame of {} bytes cannot be sent, skipping", size);
                return Ok(StepOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };
        if sent.chunks_dropped > 0 {
            debug!(frame_id = sent.frame_id, dropped = sent.chunks_dropped, "send buffer full");
        }

        self.sender.poll_acks_at(now);
        self.track_connection();

        self.window.frames += 1;
        self.window.bytes += jpeg.len() as u64;
        if now.saturating_duration_since(self.window.started) >= WINDOW {
            self.end_window(now);
        }
        Ok(StepOutcome::Sent(sent))
    }

    fn track_connection(&mut self) {
        let connected = self.sender.stats().viewer_connected;
        if connected != self.viewer_connected {
            self.viewer_connected = connected;
            self.log(if connected {
                StreamEvent::ViewerConnected
            } else {
                StreamEvent::ViewerDisconnected
            });
        }
    }

    /// Close the current window: adapt, report, and reset counters.
    pub fn end_window(&mut self, now: Instant) -> WindowDecision {
        let stats = self.sender.stats();
        let frames = self.window.frames;
        let decision = self.controller.on_window(&stats, frames);
        if decision.quality_changed() {
            self.encoder.set_quality(decision.quality);
        }

        self.log(StreamEvent::Window(self.report(&stats, &decision)));
        match decision.rate_change {
            Some(RateChange::Reduced) => self.log(StreamEvent::TargetFpsReduced {
                target_fps: decision.effective_target_fps,
                interval_ms: decision
                    .frame_interval
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
            }),
            Some(RateChange::Raised) => self.log(StreamEvent::TargetFpsRaised {
                target_fps: decision.effective_target_fps,
            }),
            None => {}
        }

        self.sender.reset_window();
        self.window = Window::new(now);
        decision
    }

    fn report(&self, stats: &NetworkStats, decision: &WindowDecision) -> WindowReport {
        let frames = self.window.frames;
        let total_kb = self.window.bytes / 1024;
        let config = self.controller.config();
        let derated = config.is_enabled() && decision.effective_target_fps != config.target_fps;
        WindowReport {
            fps: frames,
            avg_kb: if frames > 0 { total_kb / frames as u64 } else { 0 },
            total_kb,
            old_quality: decision.old_quality,
            quality: decision.quality,
            net: stats.viewer_connected.then(|| NetSummary {
                rtt_ms: stats.smoothed_rtt_ms,
                base_rtt_ms: stats.baseline_rtt_ms(),
                loss_percent: stats.loss_percent(),
                acked: stats.frames_acked,
                sent: stats.frames_sent,
            }),
            effective_target_fps: derated.then_some(decision.effective_target_fps),
        }
    }

    pub fn controller(&self) -> &QualityController {
        &self.controller
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn sender(&self) -> &FrameSender<S> {
        &self.sender
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;
    use std::net::SocketAddr;
    use std::sync::Mutex;

    use wlcast_media::{EncodeError, RawFrame, TestPattern};
    use wlcast_proto::{AckPacket, ChunkSize, ControllerConfig, TrackerConfig};

    #[derive(Default)]
    struct LoopSocket {
        sent: RefCell<Vec<Vec<u8>>>,
        inbox: RefCell<VecDeque<Vec<u8>>>,
        fail_hard: RefCell<bool>,
    }

    impl DatagramSocket for LoopSocket {
        fn send_to(&self, buf: &[u8], _addr: SocketAddr) -> io::Result<usize> {
            if *self.fail_hard.borrow() {
                return Err(io::ErrorKind::NetworkUnreachable.into());
            }
            self.sent.borrow_mut().push(buf.to_vec());
            Ok(buf.len())
        }

        fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            match self.inbox.borrow_mut().pop_front() {
                Some(d) => {
                    buf[..d.len()].copy_from_slice(&d);
                    Ok((d.len(), "127.0.0.1:9".parse().unwrap()))
                }
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    /// Encoder producing fixed-size output; can be told to fail.
    struct FakeEncoder {
        quality: u8,
        size: usize,
        fail_next: bool,
    }

    impl FrameEncoder for FakeEncoder {
        fn encode(&mut self, frame: &RawFrame) -> Result<Vec<u8>, EncodeError> {
            if self.fail_next {
                self.fail_next = false;
                return Err(EncodeError::Dimensions(frame.width, frame.height));
            }
            Ok(vec![self.quality; self.size])
        }

        fn set_quality(&mut self, quality: u8) {
            self.quality = quality;
        }

        fn quality(&self) -> u8 {
            self.quality
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<StreamEvent>>);

    impl StreamLogger for Recorder {
        fn log(&self, entry: StreamLog) {
            self.0.lock().unwrap().push(entry.event);
        }
    }

    fn pipeline(
        target_fps: u32,
        quality: u8,
        frame_size: usize,
    ) -> (Pipeline<TestPattern, FakeEncoder, LoopSocket>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let sender = FrameSender::with_socket(
            LoopSocket::default(),
            "127.0.0.1:7723".parse().unwrap(),
            ChunkSize::DEFAULT,
            TrackerConfig::default(),
        );
        let controller = QualityController::new(
            ControllerConfig {
                target_fps,
                fps_limit: 0,
            },
            quality,
        );
        let encoder = FakeEncoder {
            quality: 0,
            size: frame_size,
            fail_next: false,
        };
        let p = Pipeline::new(
            TestPattern::new(8, 8, 0),
            encoder,
            sender,
            controller,
            recorder.clone(),
        );
        (p, recorder)
    }

    fn events(recorder: &Recorder) -> Vec<StreamEvent> {
        recorder.0.lock().unwrap().clone()
    }

    #[test]
    fn encoder_starts_at_initial_quality() {
        let (p, _) = pipeline(30, 70, 100);
        assert_eq!(p.encoder().quality(), 70);
    }

    #[test]
    fn step_sends_chunks() {
        let (mut p, _) = pipeline(0, 80, 3000);
        let outcome = p.step_at(Instant::now()).unwrap();
        match outcome {
            StepOutcome::Sent(sent) => assert_eq!(sent.chunk_count, 3),
            StepOutcome::Skipped => panic!("frame skipped"),
        }
        assert_eq!(p.sender().socket().sent.borrow().len(), 3);
    }

    #[test]
    fn encode_failure_skips_frame() {
        let (mut p, _) = pipeline(0, 80, 100);
        p.encoder.fail_next = true;
        assert_eq!(p.step_at(Instant::now()).unwrap(), StepOutcome::Skipped);
        assert!(p.sender().socket().sent.borrow().is_empty());
        assert!(matches!(p.step_at(Instant::now()).unwrap(), StepOutcome::Sent(_)));
    }

    #[test]
    fn empty_frame_is_skipped_not_fatal() {
        let (mut p, _) = pipeline(0, 80, 0);
        assert_eq!(p.step_at(Instant::now()).unwrap(), StepOutcome::Skipped);
    }

    #[test]
    fn transport_failure_is_fatal() {
        let (mut p, _) = pipeline(0, 80, 100);
        *p.sender().socket().fail_hard.borrow_mut() = true;
        assert!(matches!(
            p.step_at(Instant::now()),
            Err(PipelineError::Send(SendError::Transport(_)))
        ));
    }

    #[test]
    fn window_closes_after_one_second() {
        let (mut p, recorder) = pipeline(0, 80, 2048);
        let t0 = p.window.started;
        p.step_at(t0 + Duration::from_millis(10)).unwrap();
        p.step_at(t0 + Duration::from_millis(500)).unwrap();
        assert!(events(&recorder).is_empty());

        p.step_at(t0 + Duration::from_millis(1000)).unwrap();
        let logged = events(&recorder);
        assert_eq!(logged.len(), 1);
        match &logged[0] {
            StreamEvent::Window(report) => {
                assert_eq!(report.fps, 3);
                assert_eq!(report.total_kb, 6);
                assert_eq!(report.avg_kb, 2);
                assert_eq!(report.net, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(p.sender().stats().frames_sent, 0);
    }

    #[test]
    fn acks_drive_quality_up_and_log_connection() {
        let (mut p, recorder) = pipeline(30, 80, 100);
        let t0 = p.window.started;
        for i in 0..10u64 {
            let now = t0 + Duration::from_millis(i * 10);
            let frame_id = match p.step_at(now).unwrap() {
                StepOutcome::Sent(sent) => sent.frame_id,
                StepOutcome::Skipped => panic!("frame skipped"),
            };
            let ack = AckPacket {
                frame_id,
                viewer_fps: 30,
            };
            p.sender().socket().inbox.borrow_mut().push_back(ack.encode().to_vec());
        }
        // Deliver the last ack, then close the window.
        p.sender.poll_acks_at(t0 + Duration::from_millis(105));
        let decision = p.end_window(t0 + Duration::from_millis(110));
        assert_eq!(decision.quality, 82);
        assert_eq!(p.encoder().quality(), 82);

        let logged = events(&recorder);
        assert_eq!(logged[0], StreamEvent::ViewerConnected);
        let StreamEvent::Window(report) = logged.last().unwrap() else {
            panic!("expected window report");
        };
        let net = report.net.expect("network summary");
        assert_eq!(net.acked, 10);
        assert_eq!(net.loss_percent, 0);
        assert!(report.to_string().contains("q=80->82"));
    }

    #[test]
    fn derating_is_logged() {
        // Every frame is lost, pinning quality at 30 while the viewer keeps
        // acking (with ids that match nothing) so it stays connected.
        let (mut p, recorder) = pipeline(30, 30, 100);
        let t0 = p.window.started;
        for w in 0..5u64 {
            let base = t0 + Duration::from_secs(w);
            p.step_at(base).unwrap();
            p.sender().socket().inbox.borrow_mut().push_back(
                AckPacket {
                    frame_id: 0,
                    viewer_fps: 5,
                }
                .encode()
                .to_vec(),
            );
            p.sender.poll_acks_at(base + Duration::from_millis(1));
            p.sender.poll_acks_at(base + Duration::from_millis(900));
            let decision = p.end_window(base + Duration::from_millis(999));
            assert_eq!(decision.quality, 30);
        }

        let logged = events(&recorder);
        let reductions: Vec<&StreamEvent> = logged
            .iter()
            .filter(|e| matches!(e, StreamEvent::TargetFpsReduced { .. }))
            .collect();
        assert_eq!(
            reductions,
            vec![&StreamEvent::TargetFpsReduced {
                target_fps: 20,
                interval_ms: 50
            }]
        );
        let StreamEvent::Window(last) = logged
            .iter()
            .rev()
            .find(|e| matches!(e, StreamEvent::Window(_)))
            .unwrap()
        else {
            unreachable!()
        };
        assert_eq!(last.effective_target_fps, Some(20));
    }

    #[test]
    fn run_stops_when_flag_cleared() {
        let (mut p, recorder) = pipeline(0, 80, 10);
        let running = AtomicBool::new(false);
        p.run(&running).unwrap();
        let logged = events(&recorder);
        assert!(matches!(logged[0], StreamEvent::StreamStarted { .. }));
        assert_eq!(logged.last(), Some(&StreamEvent::Stopped));
    }
}
