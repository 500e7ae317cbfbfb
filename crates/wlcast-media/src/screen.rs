/// Primary display capture through scrap.
///
/// The capturer is not `Send` on X11, so it is created on its own thread and
/// finished frames cross a bounded channel. When the producer falls behind,
/// new frames are dropped rather than queued.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use scrap::{Capturer, Display};
use tracing::{debug, info, warn};

use crate::capture::{FrameSource, PixelFormat, RawFrame};
use crate::error::CaptureError;

const FRAME_QUEUE: usize = 2;
const NOT_READY_SLEEP: Duration = Duration::from_millis(5);
const ERROR_SLEEP: Duration = Duration::from_millis(50);

/// Wrap one scrap frame. scrap hands out B, G, R, A bytes with rows padded
/// to `len / height`.
pub(crate) fn bgra_frame(width: u32, height: u32, data: &[u8]) -> RawFrame {
    let stride = if height == 0 { 0 } else { data.len() / height as usize };
    RawFrame {
        width,
        height,
        stride,
        format: PixelFormat::Xrgb8888,
        data: data.to_vec(),
        y_invert: false,
    }
}

pub struct ScreenSource {
    frames: Receiver<RawFrame>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ScreenSource {
    /// Start capturing the primary display at up to `max_hz` frames a second.
    pub fn primary(max_hz: u32) -> Result<Self, CaptureError> {
        let interval = Duration::from_secs_f64(1.0 / max_hz.max(1) as f64);
        let (ready_tx, ready_rx) = bounded::<io::Result<(u32, u32)>>(1);
        let (tx, rx) = bounded::<RawFrame>(FRAME_QUEUE);
        let running = Arc::new(AtomicBool::new(true));

        let thread_running = running.clone();
        let handle = thread::Builder::new()
            .name("wlcast-capture".into())
            .spawn(move || {
                let opened = Display::primary().and_then(|display| {
                    let size = (display.width() as u32, display.height() as u32);
                    Capturer::new(display).map(|capturer| (capturer, size))
                });
                match opened {
                    Ok((capturer, size)) => {
                        let _ = ready_tx.send(Ok(size));
                        capture_loop(capturer, size, interval, tx, &thread_running);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok((width, height))) => {
                info!("capturing primary display {}x{} at up to {} Hz", width, height, max_hz);
                Ok(ScreenSource {
                    frames: rx,
                    running,
                    handle: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(CaptureError::Io(e))
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::Closed)
            }
        }
    }
}

fn capture_loop(
    mut capturer: Capturer,
    (width, height): (u32, u32),
    interval: Duration,
    tx: Sender<RawFrame>,
    running: &AtomicBool,
) {
    while running.load(Ordering::Relaxed) {
        let started = Instant::now();
        match capturer.frame() {
            Ok(frame) => match tx.try_send(bgra_frame(width, height, &frame)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!("capture queue full, frame dropped"),
                Err(TrySendError::Disconnected(_)) => break,
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(NOT_READY_SLEEP);
                continue;
            }
            Err(e) => {
                warn!("screen capture failed, retrying: {}", e);
                thread::sleep(ERROR_SLEEP);
                continue;
            }
        }
        let elapsed = started.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}

impl FrameSource for ScreenSource {
    fn next_frame(&mut self) -> Result<RawFrame, CaptureError> {
        self.frames.recv().map_err(|_| CaptureError::Closed)
    }
}

impl Drop for ScreenSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("capture thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_bgra_rows_convert() {
        // 2x2 frame, rows padded to 12 bytes.
        let data = [
            10, 20, 30, 255, 11, 21, 31, 255, 0, 0, 0, 0, //
            12, 22, 32, 255, 13, 23, 33, 255, 0, 0, 0, 0,
        ];
        let frame = bgra_frame(2, 2, &data);
        assert_eq!(frame.stride, 12);
        assert_eq!(
            frame.to_rgb().unwrap(),
            vec![30, 20, 10, 31, 21, 11, 32, 22, 12, 33, 23, 13]
        );
    }

    #[test]
    fn empty_frame_has_zero_stride() {
        let frame = bgra_frame(0, 0, &[]);
        assert_eq!(frame.stride, 0);
        assert!(frame.to_rgb().unwrap().is_empty());
    }
}
