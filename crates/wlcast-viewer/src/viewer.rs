/// Receive loop: poll → decode → present → ack, plus audio hand-off and a
/// once-per-second display summary.

use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use wlcast_media::{DecodedImage, FrameDecoder};
use wlcast_proto::{DatagramSocket, FrameReceiver, ReceiveError, StreamEvent, StreamLog, StreamLogger};

use crate::player::AudioPlayer;

const COMPONENT: &str = "viewer";

/// Sleep when a poll produced no frame.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Where decoded frames end up. The presenter takes ownership of each frame.
pub trait FramePresenter {
    fn present(&mut self, image: DecodedImage);
}

impl<T: FramePresenter + ?Sized> FramePresenter for Box<T> {
    fn present(&mut self, image: DecodedImage) {
        (**self).present(image)
    }
}

/// Headless presenter: keeps the most recent frame and a running count.
#[derive(Debug, Default)]
pub struct LatestFrame {
    pub frame: Option<DecodedImage>,
    pub presented: u64,
}

impl FramePresenter for LatestFrame {
    fn present(&mut self, image: DecodedImage) {
        self.frame = Some(image);
        self.presented += 1;
    }
}

/// Frames displayed in the current one-second window.
#[derive(Debug)]
struct FpsCounter {
    started: Instant,
    count: u32,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        FpsCounter { started: now, count: 0 }
    }

    fn frame(&mut self) -> u32 {
        self.count += 1;
        self.count
    }

    /// Close the window once a second has passed, returning its count.
    fn roll(&mut self, now: Instant) -> Option<u32> {
        if now.saturating_duration_since(self.started) < Duration::from_secs(1) {
            return None;
        }
        let count = self.count;
        *self = FpsCounter::new(now);
        Some(count)
    }
}

pub struct Viewer<D, P, S = UdpSocket> {
    receiver: FrameReceiver<S>,
    decoder: D,
    presenter: P,
    player: Option<AudioPlayer>,
    logger: Arc<dyn StreamLogger>,
    fps: FpsCounter,
    size: Option<(u32, u32)>,
}

impl<D, P, S> Viewer<D, P, S>
where
    D: FrameDecoder,
    P: FramePresenter,
    S: DatagramSocket,
{
    pub fn new(
        receiver: FrameReceiver<S>,
        decoder: D,
        presenter: P,
        player: Option<AudioPlayer>,
        logger: Arc<dyn StreamLogger>,
    ) -> Self {
        Viewer {
            receiver,
            decoder,
            presenter,
            player,
            logger,
            fps: FpsCounter::new(Instant::now()),
            size: None,
        }
    }

    fn log(&self, event: StreamEvent) {
        self.logger.log(StreamLog {
            component: COMPONENT,
            event,
        });
    }

    /// Run until `running` is cleared or the socket fails.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), ReceiveError> {
        self.fps = FpsCounter::new(Instant::now());
        while running.load(Ordering::Relaxed) {
            match self.step_at(Instant::now()) {
                Ok(true) => {}
                Ok(false) => thread::sleep(IDLE_SLEEP),
                Err(e) => {
                    self.log(StreamEvent::Error {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
        self.log(StreamEvent::Stopped);
        Ok(())
    }

    /// One loop iteration. Returns true when a frame completed.
    pub fn step_at(&mut self, now: Instant) -> Result<bool, ReceiveError> {
        let frame = self.receiver.poll_at(now)?;
        let got = frame.is_some();

        if let Some(frame) = frame {
            match self.decoder.decode(&frame.data) {
                Ok(image) => {
                    self.size = Some((image.width, image.height));
                    self.presenter.present(image);
                    let fps = self.fps.frame();
                    self.receiver.send_ack(frame.frame_id, fps);
                }
                Err(e) => self.log(StreamEvent::DecodeFailed {
                    frame_id: frame.frame_id,
                    message: e.to_string(),
                }),
            }
        }

        while let Some(packet) = self.receiver.poll_audio() {
            match self.player.as_ref() {
                Some(player) => {
                    if !player.submit(packet) {
                        trace!("audio decode queue full");
                    }
                }
                None => trace!(sequence = packet.sequence, "no audio player, dropping"),
            }
        }

        if let Some(fps) = self.fps.roll(now)
            && let Some((width, height)) = self.size
        {
            self.log(StreamEvent::Display { width, height, fps });
        }
        Ok(got)
    }

    #[cfg(test)]
    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    /// Stop audio playback, if any.
    pub fn stop_audio(&mut self) {
        if let Some(player) = self.player.as_mut() {
            player.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::io;
    use std::net::SocketAddr;
    use std::sync::Mutex;

    use wlcast_media::{
        AudioEncoder, AudioSource, DecodeError, OpusDecoder, OpusEncoder, ToneSource,
    };
    use wlcast_proto::{AckPacket, AudioPacketizer, ChunkSize, FrameSender, TrackerConfig};

    use crate::player::AudioOutput;

    const VIEWER: &str = "127.0.0.1:7723";
    const STREAMER: &str = "127.0.0.1:40000";

    /// Datagrams sent to the viewer's address queue up for it; anything
    /// else is an ack heading back to the streamer.
    #[derive(Default)]
    struct Wire {
        to_viewer: RefCell<VecDeque<Vec<u8>>>,
        to_streamer: RefCell<Vec<Vec<u8>>>,
    }

    impl DatagramSocket for Wire {
        fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
            if addr == VIEWER.parse().unwrap() {
                self.to_viewer.borrow_mut().push_back(buf.to_vec());
            } else {
                self.to_streamer.borrow_mut().push(buf.to_vec());
            }
            Ok(buf.len())
        }

        fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            match self.to_viewer.borrow_mut().pop_front() {
                Some(d) => {
                    buf[..d.len()].copy_from_slice(&d);
                    Ok((d.len(), STREAMER.parse().unwrap()))
                }
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Wire {
        fn acks(&self) -> Vec<AckPacket> {
            self.to_streamer
                .borrow()
                .iter()
                .map(|d| AckPacket::decode(d).unwrap())
                .collect()
        }
    }

    /// Byte 0xFF marks a corrupt frame; otherwise width is the frame length.
    struct FakeDecoder;

    impl FrameDecoder for FakeDecoder {
        fn decode(&mut self, data: &[u8]) -> Result<DecodedImage, DecodeError> {
            if data.first() == Some(&0xFF) {
                return Err(DecodeError::SizeMismatch {
                    expected: 1,
                    got: 0,
                });
            }
            Ok(DecodedImage {
                width: data.len() as u32,
                height: 1,
                rgb: Vec::new(),
            })
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<StreamEvent>>);

    impl StreamLogger for Recorder {
        fn log(&self, entry: StreamLog) {
            self.0.lock().unwrap().push(entry.event);
        }
    }

    fn setup<'a>(
        wire: &'a Wire,
        player: Option<AudioPlayer>,
    ) -> (
        FrameSender<&'a Wire>,
        Viewer<FakeDecoder, LatestFrame, &'a Wire>,
        Arc<Recorder>,
    ) {
        let sender = FrameSender::with_socket(
            wire,
            VIEWER.parse().unwrap(),
            ChunkSize::DEFAULT,
            TrackerConfig::default(),
        );
        let recorder = Arc::new(Recorder::default());
        let viewer = Viewer::new(
            FrameReceiver::with_socket(wire, ChunkSize::DEFAULT),
            FakeDecoder,
            LatestFrame::default(),
            player,
            recorder.clone(),
        );
        (sender, viewer, recorder)
    }

    #[test]
    fn frames_are_presented_and_acked() {
        let wire = Wire::default();
        let (mut sender, mut viewer, _) = setup(&wire, None);
        let now = viewer.fps.started;

        let first = sender.send_frame_at(&[1u8; 3000], now).unwrap();
        assert!(viewer.step_at(now).unwrap());
        let second = sender.send_frame_at(&[2u8; 500], now).unwrap();
        assert!(viewer.step_at(now).unwrap());
        assert!(!viewer.step_at(now).unwrap());

        assert_eq!(viewer.presenter().presented, 2);
        assert_eq!(viewer.presenter().frame.as_ref().map(|f| f.width), Some(500));
        let acks = wire.acks();
        assert_eq!(
            acks,
            vec![
                AckPacket {
                    frame_id: first.frame_id,
                    viewer_fps: 1
                },
                AckPacket {
                    frame_id: second.frame_id,
                    viewer_fps: 2
                },
            ]
        );
    }

    #[test]
    fn decode_failure_is_logged_and_not_acked() {
        let wire = Wire::default();
        let (mut sender, mut viewer, recorder) = setup(&wire, None);
        let now = viewer.fps.started;

        let sent = sender.send_frame_at(&[0xFF; 100], now).unwrap();
        assert!(viewer.step_at(now).unwrap());

        assert!(wire.acks().is_empty());
        assert_eq!(viewer.presenter().presented, 0);
        let logged = recorder.0.lock().unwrap();
        assert!(matches!(
            logged.as_slice(),
            [StreamEvent::DecodeFailed { frame_id, .. }] if *frame_id == sent.frame_id
        ));
    }

    #[test]
    fn display_summary_once_per_second() {
        let wire = Wire::default();
        let (mut sender, mut viewer, recorder) = setup(&wire, None);
        let t0 = viewer.fps.started;

        for i in 0..3u64 {
            let now = t0 + Duration::from_millis(100 * i);
            sender.send_frame_at(&[7u8; 640], now).unwrap();
            viewer.step_at(now).unwrap();
        }
        assert!(recorder.0.lock().unwrap().is_empty());

        let later = t0 + Duration::from_millis(1000);
        viewer.step_at(later).unwrap();
        assert_eq!(
            recorder.0.lock().unwrap().as_slice(),
            &[StreamEvent::Display {
                width: 640,
                height: 1,
                fps: 3
            }]
        );

        // The count starts over in the next window.
        sender.send_frame_at(&[7u8; 640], later).unwrap();
        viewer.step_at(later).unwrap();
        assert_eq!(wire.acks().last().map(|a| a.viewer_fps), Some(1));
    }

    #[test]
    fn nothing_displayed_means_no_summary() {
        let wire = Wire::default();
        let (_sender, mut viewer, recorder) = setup(&wire, None);
        let t0 = viewer.fps.started;
        viewer.step_at(t0 + Duration::from_secs(2)).unwrap();
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn frames_are_moved_into_the_presenter() {
        /// Owns every frame it is handed.
        struct Keep(Rc<RefCell<Vec<DecodedImage>>>);

        impl FramePresenter for Keep {
            fn present(&mut self, image: DecodedImage) {
                self.0.borrow_mut().push(image);
            }
        }

        let wire = Wire::default();
        let mut sender = FrameSender::with_socket(
            &wire,
            VIEWER.parse().unwrap(),
            ChunkSize::DEFAULT,
            TrackerConfig::default(),
        );
        let kept = Rc::new(RefCell::new(Vec::new()));
        let presenter: Box<dyn FramePresenter> = Box::new(Keep(kept.clone()));
        let mut viewer = Viewer::new(
            FrameReceiver::with_socket(&wire, ChunkSize::DEFAULT),
            FakeDecoder,
            presenter,
            None,
            Arc::new(Recorder::default()),
        );
        let now = Instant::now();
        sender.send_frame_at(&[3u8; 40], now).unwrap();
        sender.send_frame_at(&[3u8; 70], now).unwrap();
        assert!(viewer.step_at(now).unwrap());
        assert!(viewer.step_at(now).unwrap());
        assert_eq!(wire.acks().len(), 2);
        let widths: Vec<u32> = kept.borrow().iter().map(|f| f.width).collect();
        assert_eq!(widths, vec![40, 70]);
    }

    #[test]
    fn audio_goes_to_the_player() {
        let wire = Wire::default();
        let player = AudioPlayer::start(OpusDecoder::new().unwrap(), AudioOutput::Discard).unwrap();
        let (_sender, mut viewer, _) = setup(&wire, Some(player));

        let mut source = ToneSource::new(440.0).unpaced();
        let mut encoder = OpusEncoder::new().unwrap();
        let mut packetizer = AudioPacketizer::new();
        for _ in 0..3 {
            let payload = encoder.encode(&source.read_unit().unwrap()).unwrap();
            let datagram = packetizer.packetize(&payload).unwrap();
            wire.send_to(datagram, VIEWER.parse().unwrap()).unwrap();
        }
        assert!(!viewer.step_at(Instant::now()).unwrap());

        let stats = viewer.player.as_mut().unwrap().stop();
        assert_eq!(stats.packets_received, 3);
        assert_eq!(stats.decode_errors, 0);
    }

    #[test]
    fn run_exits_when_flag_cleared() {
        let wire = Wire::default();
        let (_sender, mut viewer, recorder) = setup(&wire, None);
        viewer.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(recorder.0.lock().unwrap().as_slice(), &[StreamEvent::Stopped]);
    }
}
