/// Adaptive quality control, evaluated once per measurement window.
///
/// With a viewer acking, quality follows a loss/latency ladder (first match
/// wins):
///
///   loss > 10%          q -= 10   (floor 30)
///   loss > 3%           q -= 5    (floor 50)
///   rtt  > 3 x base     q -= 3    (floor 50)
///   rtt  > 2 x base     hold
///   no loss, acked > 5  q += 2    (ceiling 95)
///
/// Without acks, quality tracks the local frame rate against the target.
///
/// When quality alone cannot keep up, the target frame rate itself is
/// de-rated: quality at or below 35 for 5 windows drops the target by 10 fps,
/// and quality at or above 60 for 10 windows raises it back by 5 fps.

use std::time::Duration;

use crate::stats::NetworkStats;

pub const QUALITY_CEILING: u8 = 95;
/// Floor reachable only through heavy loss.
pub const QUALITY_FLOOR_SEVERE: u8 = 30;
pub const QUALITY_FLOOR: u8 = 50;

pub const LOSS_SEVERE_PERCENT: u32 = 10;
pub const LOSS_MODERATE_PERCENT: u32 = 3;
pub const RTT_REDUCE_FACTOR: f64 = 3.0;
pub const RTT_HOLD_FACTOR: f64 = 2.0;
/// Acks needed in a window before quality may rise.
pub const MIN_ACKS_TO_RAISE: u32 = 5;
/// Frames the local rate may trail the target by before quality drops.
pub const LOCAL_FPS_SLACK: i64 = 5;

pub const QUALITY_STUCK: u8 = 35;
pub const QUALITY_RECOVERED: u8 = 60;
pub const STUCK_WINDOWS: u32 = 5;
pub const RECOVERED_WINDOWS: u32 = 10;
pub const TARGET_FPS_STEP_DOWN: u32 = 10;
pub const TARGET_FPS_STEP_UP: u32 = 5;
pub const TARGET_FPS_FLOOR: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerConfig {
    /// Desired frame rate; 0 disables adaptation.
    pub target_fps: u32,
    /// Hard frame rate cap; 0 means uncapped.
    pub fps_limit: u32,
}

impl ControllerConfig {
    pub fn is_enabled(&self) -> bool {
        self.target_fps > 0
    }

    /// Pacing interval from the frame rate cap alone.
    pub fn base_interval(&self) -> Option<Duration> {
        interval_for(self.fps_limit)
    }
}

fn interval_for(fps: u32) -> Option<Duration> {
    if fps == 0 {
        None
    } else {
        Some(Duration::from_millis(1000 / fps as u64))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Disabled,
    /// Driven by acks from a connected viewer.
    Network,
    /// No viewer; driven by the local frame rate.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateChange {
    Reduced,
    Raised,
}

/// Result of evaluating one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    pub old_quality: u8,
    pub quality: u8,
    pub effective_target_fps: u32,
    /// Frame pacing interval; None means send as fast as frames arrive.
    pub frame_interval: Option<Duration>,
    pub rate_change: Option<RateChange>,
    pub mode: ControlMode,
}

impl WindowDecision {
    pub fn quality_changed(&self) -> bool {
        self.quality != self.old_quality
    }
}

pub struct QualityController {
    config: ControllerConfig,
    quality: u8,
    effective_target_fps: u32,
    frame_interval: Option<Duration>,
    stuck_windows: u32,
    recovered_windows: u32,
}

impl QualityController {
    pub fn new(config: ControllerConfig, initial_quality: u8) -> Self {
        QualityController {
            config,
            quality: initial_quality,
            effective_target_fps: config.target_fps,
            frame_interval: config.base_interval(),
            stuck_windows: 0,
            recovered_windows: 0,
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn effective_target_fps(&self) -> u32 {
        self.effective_target_fps
    }

    pub fn frame_interval(&self) -> Option<Duration> {
        self.frame_interval
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Evaluate a finished window. `frames_produced` is the number of frames
    /// captured and sent during it.
    pub fn on_window(&mut self, stats: &NetworkStats, frames_produced: u32) -> WindowDecision {
        let old_quality = self.quality;
        if !self.config.is_enabled() {
            return self.decision(old_quality, None, ControlMode::Disabled);
        }

        let mode = if stats.viewer_connected {
            self.quality = network_step(self.quality, stats);
            ControlMode::Network
        } else {
            self.quality = local_step(self.quality, frames_produced, self.effective_target_fps);
            ControlMode::Local
        };

        let rate_change = self.derate();
        self.decision(old_quality, rate_change, mode)
    }

    fn derate(&mut self) -> Option<RateChange> {
        if self.quality <= QUALITY_STUCK {
            self.stuck_windows += 1;
            self.recovered_windows = 0;
            if self.stuck_windows >= STUCK_WINDOWS && self.effective_target_fps > TARGET_FPS_FLOOR {
                self.effective_target_fps = self
                    .effective_target_fps
                    .saturating_sub(TARGET_FPS_STEP_DOWN)
                    .max(TARGET_FPS_FLOOR);
                self.frame_interval = interval_for(self.effective_target_fps);
                self.stuck_windows = 0;
                return Some(RateChange::Reduced);
            }
        } else if self.quality >= QUALITY_RECOVERED
            && self.effective_target_fps < self.config.target_fps
        {
            self.stuck_windows = 0;
            self.recovered_windows += 1;
            if self.recovered_windows >= RECOVERED_WINDOWS {
                self.effective_target_fps =
                    (self.effective_target_fps + TARGET_FPS_STEP_UP).min(self.config.target_fps);
                self.frame_interval = if self.effective_target_fps >= self.config.target_fps {
                    self.config.base_interval()
                } else {
                    interval_for(self.effective_target_fps)
                };
                self.recovered_windows = 0;
                return Some(RateChange::Raised);
            }
        } else {
            self.stuck_windows = 0;
            self.recovered_windows = 0;
        }
        None
    }

    fn decision(
        &self,
        old_quality: u8,
        rate_change: Option<RateChange>,
        mode: ControlMode,
    ) -> WindowDecision {
        WindowDecision {
            old_quality,
            quality: self.quality,
            effective_target_fps: self.effective_target_fps,
            frame_interval: self.frame_interval,
            rate_change,
            mode,
        }
    }
}

fn network_step(quality: u8, stats: &NetworkStats) -> u8 {
    let loss = stats.loss_percent();
    let rtt = stats.smoothed_rtt_ms;
    let base = stats.baseline_rtt_ms();

    if loss > LOSS_SEVERE_PERCENT {
        quality.saturating_sub(10).max(QUALITY_FLOOR_SEVERE)
    } else if loss > LOSS_MODERATE_PERCENT {
        quality.saturating_sub(5).max(QUALITY_FLOOR)
    } else if rtt > base * RTT_REDUCE_FACTOR {
        // Applies the floor even when it lifts a lower quality back up.
        quality.saturating_sub(3).max(QUALITY_FLOOR)
    } else if rtt > base * RTT_HOLD_FACTOR {
        quality
    } else if loss == 0 && stats.frames_acked > MIN_ACKS_TO_RAISE && quality < QUALITY_CEILING {
        (quality + 2).min(QUALITY_CEILING)
    } else {
        quality
    }
}

fn local_step(quality: u8, frames_produced: u32, target_fps: u32) -> u8 {
    let diff = frames_produced as i64 - target_fps as i64;
    if diff < -LOCAL_FPS_SLACK {
        quality.saturating_sub(5).max(QUALITY_FLOOR)
    } else if diff >= 0 && quality < QUALITY_CEILING {
        (quality + 2).min(QUALITY_CEILING)
    } else {
        quality
    }
}
