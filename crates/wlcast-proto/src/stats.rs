/// Ack-driven network statistics for the sending side.
///
/// The tracker matches acks against the frame history to produce RTT
/// samples, presumes unacked frames lost after a timeout, and watches for
/// the viewer going silent.
///
///   smoothed_rtt = sample                         (first sample)
///   smoothed_rtt = 0.8 * smoothed_rtt + 0.2 * sample
///   min_rtt      = min(min_rtt, max(sample, 5ms))
///
/// Per-window counters are cleared by `reset_window`; RTT state persists and
/// the baseline slowly decays toward the smoothed value so it tracks path
/// changes.

use std::time::{Duration, Instant};

use crate::history::FrameHistory;
use crate::protocol::AckPacket;

/// Weight of a new RTT sample in the EWMA.
pub const RTT_SMOOTHING: f64 = 0.2;

/// Lower bound applied to samples before they feed the baseline.
pub const MIN_RTT_FLOOR_MS: f64 = 5.0;

/// Per-window weight pulling the baseline toward the smoothed RTT.
pub const BASELINE_DECAY: f64 = 0.01;

/// Unacked frames older than this are counted as lost.
pub const LOSS_TIMEOUT: Duration = Duration::from_millis(500);

/// Without an ack for this long the viewer is considered gone.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_millis(2000);

/// Tracker timing configuration.
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub loss_timeout: Duration,
    pub liveness_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            loss_timeout: LOSS_TIMEOUT,
            liveness_timeout: LIVENESS_TIMEOUT,
        }
    }
}

/// Snapshot of the sender's view of the network.
///
/// RTT fields are in milliseconds; 0.0 means no sample yet.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetworkStats {
    pub viewer_connected: bool,
    pub last_ack_time: Option<Instant>,
    pub smoothed_rtt_ms: f64,
    pub min_rtt_ms: f64,
    /// Last frame rate the viewer reported.
    pub viewer_fps: u32,
    pub frames_sent: u32,
    pub frames_acked: u32,
    pub frames_lost: u32,
}

impl NetworkStats {
    /// Integer loss percentage for the current window.
    pub fn loss_percent(&self) -> u32 {
        if self.frames_sent == 0 {
            return 0;
        }
        (self.frames_lost as u64 * 100 / self.frames_sent as u64) as u32
    }

    /// RTT reference for latency decisions: the baseline if known, else the
    /// smoothed RTT.
    pub fn baseline_rtt_ms(&self) -> f64 {
        if self.min_rtt_ms > 0.0 {
            self.min_rtt_ms
        } else {
            self.smoothed_rtt_ms
        }
    }
}

pub struct StatsTracker {
    config: TrackerConfig,
    history: FrameHistory,
    stats: NetworkStats,
}

impl StatsTracker {
    pub fn new(config: TrackerConfig) -> Self {
        StatsTracker {
            config,
            history: FrameHistory::new(),
            stats: NetworkStats::default(),
        }
    }

    /// Record a frame about to be sent.
    pub fn record_sent(&mut self, frame_id: u32, now: Instant) {
        self.history.insert(frame_id, now);
        self.stats.frames_sent = self.stats.frames_sent.saturating_add(1);
    }

    /// Mark the viewer disconnected if it has been silent too long. Returns
    /// true on the transition.
    pub fn check_liveness(&mut self, now: Instant) -> bool {
        if !self.stats.viewer_connected {
            return false;
        }
        let silent = match self.stats.last_ack_time {
            Some(last) => now.saturating_duration_since(last) > self.config.liveness_timeout,
            None => true,
        };
        if silent {
            self.stats.viewer_connected = false;
        }
        silent
    }

    /// Apply one ack. Returns the RTT sample if the ack matched a pending frame.
    pub fn on_ack(&mut self, ack: &AckPacket, now: Instant) -> Option<Duration> {
        if !self.stats.viewer_connected {
            // New session: earlier RTT state belongs to a different path.
            self.stats.viewer_connected = true;
            self.stats.smoothed_rtt_ms = 0.0;
            self.stats.min_rtt_ms = 0.0;
        }
        self.stats.last_ack_time = Some(now);
        self.stats.viewer_fps = ack.viewer_fps;

        let record = self.history.find_unacked_mut(ack.frame_id)?;
        record.acked = true;
        let rtt = now.saturating_duration_since(record.sent_at);
        self.stats.frames_acked = self.stats.frames_acked.saturating_add(1);
        self.add_rtt_sample(rtt.as_micros() as f64 / 1000.0);
        Some(rtt)
    }

    fn add_rtt_sample(&mut self, rtt_ms: f64) {
        let s = &mut self.stats;
        s.smoothed_rtt_ms = if s.smoothed_rtt_ms == 0.0 {
            rtt_ms
        } else {
            (1.0 - RTT_SMOOTHING) * s.smoothed_rtt_ms + RTT_SMOOTHING * rtt_ms
        };

        let floored = rtt_ms.max(MIN_RTT_FLOOR_MS);
        s.min_rtt_ms = if s.min_rtt_ms == 0.0 {
            floored
        } else {
            s.min_rtt_ms.min(floored)
        };
    }

    /// Count unacked frames past the loss timeout as lost. Each frame is
    /// counted at most once. Returns the number newly declared lost.
    pub fn detect_losses(&mut self, now: Instant) -> u32 {
        let timeout = self.config.loss_timeout;
        let mut lost = 0;
        for record in self.history.iter_mut() {
            if record.frame_id == 0 || record.acked {
                continue;
            }
            if now.saturating_duration_since(record.sent_at) > timeout {
                record.acked = true;
                lost += 1;
            }
        }
        self.stats.frames_lost = self.stats.frames_lost.saturating_add(lost);
        lost
    }

    /// Start a new measurement window.
    pub fn reset_window(&mut self) {
        let s = &mut self.stats;
        s.frames_sent = 0;
        s.frames_acked = 0;
        s.frames_lost = 0;
        if s.min_rtt_ms > 0.0 && s.smoothed_rtt_ms > 0.0 {
            s.min_rtt_ms = (1.0 - BASELINE_DECAY) * s.min_rtt_ms + BASELINE_DECAY * s.smoothed_rtt_ms;
        }
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn snapshot(&self) -> NetworkStats {
        self.stats
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(frame_id: u32) -> AckPacket {
        AckPacket {
            frame_id,
            viewer_fps: 30,
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn first_ack_sets_rtt_and_baseline() {
        let t0 = Instant::now();
        let mut tracker = StatsTracker::default();
        tracker.record_sent(42, t0);

        let rtt = tracker.on_ack(&ack(42), t0 + ms(30));
        assert_eq!(rtt, Some(ms(30)));

        let s = tracker.snapshot();
        assert!(s.viewer_connected);
        assert_eq!(s.smoothed_rtt_ms, 30.0);
        assert_eq!(s.min_rtt_ms, 30.0);
        assert_eq!(s.frames_acked, 1);
        assert_eq!(s.viewer_fps, 30);
    }

    #[test]
    fn smoothed_rtt_converges() {
        let t0 = Instant::now();
        let mut tracker = StatsTracker::default();
        tracker.record_sent(1, t0);
        tracker.on_ack(&ack(1), t0 + ms(100));

        // Constant 20 ms samples; error shrinks by 0.8 per sample.
        for id in 2..60u32 {
            let sent = t0 + ms(id as u64 * 10);
            tracker.record_sent(id, sent);
            tracker.on_ack(&ack(id), sent + ms(20));
        }
        let s = tracker.snapshot();
        assert!((s.smoothed_rtt_ms - 20.0).abs() < 0.01, "{}", s.smoothed_rtt_ms);
        assert_eq!(s.min_rtt_ms, 20.0);
    }

    #[test]
    fn baseline_is_floored() {
        let t0 = Instant::now();
        let mut tracker = StatsTracker::default();
        tracker.record_sent(1, t0);
        tracker.on_ack(&ack(1), t0 + ms(1));
        let s = tracker.snapshot();
        assert_eq!(s.smoothed_rtt_ms, 1.0);
        assert_eq!(s.min_rtt_ms, MIN_RTT_FLOOR_MS);
    }

    #[test]
    fn duplicate_or_unknown_ack_gives_no_sample() {
        let t0 = Instant::now();
        let mut tracker = StatsTracker::default();
        tracker.record_sent(1, t0);
        assert!(tracker.on_ack(&ack(1), t0 + ms(10)).is_some());
        assert!(tracker.on_ack(&ack(1), t0 + ms(11)).is_none());
        assert!(tracker.on_ack(&ack(99), t0 + ms(12)).is_none());
        assert_eq!(tracker.stats().frames_acked, 1);
        // Unmatched acks still prove the viewer is alive.
        assert_eq!(tracker.stats().last_ack_time, Some(t0 + ms(12)));
    }

    #[test]
    fn liveness_expires_after_silence() {
        let t0 = Instant::now();
        let mut tracker = StatsTracker::default();
        tracker.record_sent(1, t0);
        tracker.on_ack(&ack(1), t0);

        assert!(!tracker.check_liveness(t0 + ms(2000)));
        assert!(tracker.stats().viewer_connected);
        assert!(tracker.check_liveness(t0 + ms(2001)));
        assert!(!tracker.stats().viewer_connected);
        // Only the transition is reported.
        assert!(!tracker.check_liveness(t0 + ms(3000)));
    }

    #[test]
    fn reconnect_clears_rtt_state() {
        let t0 = Instant::now();
        let mut tracker = StatsTracker::default();
        tracker.record_sent(1, t0);
        tracker.on_ack(&ack(1), t0 + ms(80));
        tracker.check_liveness(t0 + ms(5000));

        let t1 = t0 + ms(6000);
        tracker.record_sent(2, t1);
        tracker.on_ack(&ack(2), t1 + ms(10));
        let s = tracker.snapshot();
        assert!(s.viewer_connected);
        assert_eq!(s.smoothed_rtt_ms, 10.0);
        assert_eq!(s.min_rtt_ms, 10.0);
    }

    #[test]
    fn loss_counted_once() {
        let t0 = Instant::now();
        let mut tracker = StatsTracker::default();
        tracker.record_sent(1, t0);
        tracker.record_sent(2, t0);
        tracker.on_ack(&ack(2), t0 + ms(5));

        assert_eq!(tracker.detect_losses(t0 + ms(500)), 0);
        assert_eq!(tracker.detect_losses(t0 + ms(501)), 1);
        assert_eq!(tracker.detect_losses(t0 + ms(900)), 0);
        assert_eq!(tracker.stats().frames_lost, 1);
        assert_eq!(tracker.stats().loss_percent(), 50);

        // A late ack for a frame already declared lost is ignored.
        assert!(tracker.on_ack(&ack(1), t0 + ms(950)).is_none());
    }

    #[test]
    fn reset_window_decays_baseline() {
        let t0 = Instant::now();
        let mut tracker = StatsTracker::default();
        tracker.record_sent(1, t0);
        tracker.on_ack(&ack(1), t0 + ms(10));
        tracker.record_sent(2, t0 + ms(20));
        tracker.on_ack(&ack(2), t0 + ms(70));

        let before = tracker.snapshot();
        assert_eq!(before.min_rtt_ms, 10.0);
        tracker.reset_window();
        let after = tracker.snapshot();
        let expected = 0.99 * before.min_rtt_ms + 0.01 * before.smoothed_rtt_ms;
        assert!((after.min_rtt_ms - expected).abs() < 1e-9);
        assert_eq!(after.frames_sent, 0);
        assert_eq!(after.frames_acked, 0);
        assert_eq!(after.smoothed_rtt_ms, before.smoothed_rtt_ms);
    }

    #[test]
    fn baseline_falls_back_to_smoothed() {
        let stats = NetworkStats {
            smoothed_rtt_ms: 40.0,
            ..Default::default()
        };
        assert_eq!(stats.baseline_rtt_ms(), 40.0);
        assert_eq!(stats.loss_percent(), 0);
    }
}
