/// Per-side wave detection on the aggregate proximity signal.
///
/// Each side's aggregate (the sum of its three sensors) is smoothed with a
/// moving average. The first samples after a reset learn a noise reference,
/// the maximum smoothed value seen, from which an adaptive entry threshold
/// is derived. A wave opens when the smoothed signal rises above that
/// threshold and closes when it falls below the larger of the threshold and
/// a fraction of the wave's own peak. A wave that stays open for the maximum
/// duration is force-completed with whatever it has accumulated.
use heapless::Deque;

use crate::config::WaveConfig;
use crate::sensor::Side;

/// Largest supported smoothing window
pub const MAX_SMOOTHING_WINDOW: usize = 16;

/// Entry threshold: the larger of a proportional and an absolute rise over
/// the noise reference.
pub fn adaptive_threshold(noise_reference: f32, peak_multiplier: f32, min_rise: f32) -> f32 {
    let proportional = noise_reference * (peak_multiplier - 1.0);
    noise_reference + proportional.max(min_rise)
}

// ── Smoothing ────────────────────────────────────────────────────────

/// Fixed-window moving average. Until the window fills, averages what it has.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: usize,
    samples: Deque<f32, MAX_SMOOTHING_WINDOW>,
}

impl MovingAverage {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.clamp(1, MAX_SMOOTHING_WINDOW),
            samples: Deque::new(),
        }
    }

    pub fn push(&mut self, value: f32) -> f32 {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        let _ = self.samples.push_back(value);
        // Summed fresh each time so rounding error never accumulates
        let sum: f32 = self.samples.iter().sum();
        sum / self.samples.len() as f32
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

// ── Waves ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveState {
    Idle,
    InWave,
    Complete,
}

/// A completed wave on one side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wave {
    pub side: Side,
    pub entry_ms: u32,
    pub exit_ms: u32,
    pub peak_value: f32,
    pub peak_ms: u32,
    /// Signal-weighted mean time of the wave
    pub center_of_mass_ms: f32,
    /// Closed by the duration limit rather than by the signal falling
    pub forced: bool,
}

impl Wave {
    pub fn duration_ms(&self) -> u32 {
        self.exit_ms.wrapping_sub(self.entry_ms)
    }
}

/// Accumulator for the wave currently open.
#[derive(Debug, Clone, Copy)]
struct OpenWave {
    entry_ms: u32,
    peak_value: f32,
    peak_ms: u32,
    weighted_offset: f64,
    total_weight: f64,
}

impl OpenWave {
    fn start(entry_ms: u32) -> Self {
        Self {
            entry_ms,
            peak_value: f32::MIN,
            peak_ms: entry_ms,
            weighted_offset: 0.0,
            total_weight: 0.0,
        }
    }

    fn add(&mut self, timestamp_ms: u32, value: f32, noise_reference: f32) {
        if value > self.peak_value {
            self.peak_value = value;
            self.peak_ms = timestamp_ms;
        }
        let weight = (value - noise_reference).max(0.0) as f64;
        let offset = timestamp_ms.wrapping_sub(self.entry_ms) as f64;
        self.weighted_offset += weight * offset;
        self.total_weight += weight;
    }

    fn finish(&self, side: Side, exit_ms: u32, forced: bool) -> Wave {
        let center_of_mass_ms = if self.total_weight > 0.0 {
            (self.entry_ms as f64 + self.weighted_offset / self.total_weight) as f32
        } else {
            self.peak_ms as f32
        };
        Wave {
            side,
            entry_ms: self.entry_ms,
            exit_ms,
            peak_value: self.peak_value,
            peak_ms: self.peak_ms,
            center_of_mass_ms,
            forced,
        }
    }
}

/// What one sample did to the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaveUpdate {
    /// Still learning the noise reference
    Learning,
    Idle,
    Entered,
    Continuing,
    Completed(Wave),
    /// A completed wave is waiting to be matched or reset
    Holding,
}

/// Wave state machine for one side.
#[derive(Debug, Clone)]
pub struct WaveTracker {
    side: Side,
    config: WaveConfig,
    smoother: MovingAverage,
    state: WaveState,
    baseline_seen: u16,
    noise_reference: f32,
    threshold: f32,
    open: Option<OpenWave>,
    completed: Option<Wave>,
}

impl WaveTracker {
    pub fn new(side: Side, config: &WaveConfig) -> Self {
        Self {
            side,
            config: *config,
            smoother: MovingAverage::new(config.smoothing_window as usize),
            state: WaveState::Idle,
            baseline_seen: 0,
            noise_reference: 0.0,
            threshold: 0.0,
            open: None,
            completed: None,
        }
    }

    /// Feed one aggregate sample. `entry_allowed` is false during the
    /// post-detection cooldown; an already-open wave is unaffected by it.
    pub fn update(&mut self, timestamp_ms: u32, raw: f32, entry_allowed: bool) -> WaveUpdate {
        let value = self.smoother.push(raw);

        if !self.is_ready() {
            self.noise_reference = if self.baseline_seen == 0 {
                value
            } else {
                self.noise_reference.max(value)
            };
            self.baseline_seen += 1;
            if self.is_ready() {
                self.threshold = adaptive_threshold(
                    self.noise_reference,
                    self.config.peak_multiplier,
                    self.config.min_rise,
                );
                log::debug!(
                    "Side {}: noise reference {}, threshold {}",
                    self.side.as_str(),
                    self.noise_reference,
                    self.threshold
                );
            }
            return WaveUpdate::Learning;
        }

        match self.state {
            WaveState::Idle => {
                if entry_allowed && value > self.threshold {
                    let mut open = OpenWave::start(timestamp_ms);
                    open.add(timestamp_ms, value, self.noise_reference);
                    self.open = Some(open);
                    self.state = WaveState::InWave;
                    WaveUpdate::Entered
                } else {
                    WaveUpdate::Idle
                }
            }
            WaveState::InWave => self.continue_wave(timestamp_ms, value),
            WaveState::Complete => WaveUpdate::Holding,
        }
    }

    fn continue_wave(&mut self, timestamp_ms: u32, value: f32) -> WaveUpdate {
        let Some(mut open) = self.open else {
            self.state = WaveState::Idle;
            return WaveUpdate::Idle;
        };
        let max_ms = self.config.max_wave_duration_ms;
        let elapsed = timestamp_ms.wrapping_sub(open.entry_ms);

        // A sample that arrives past the limit is not part of the wave
        if elapsed > max_ms {
            return self.complete(open, open.entry_ms.wrapping_add(max_ms), true);
        }

        open.add(timestamp_ms, value, self.noise_reference);
        let exit_level = self.threshold.max(open.peak_value * self.config.wave_exit_fraction);
        if value < exit_level {
            self.complete(open, timestamp_ms, false)
        } else if elapsed >= max_ms {
            self.complete(open, timestamp_ms, true)
        } else {
            self.open = Some(open);
            WaveUpdate::Continuing
        }
    }

    fn complete(&mut self, open: OpenWave, exit_ms: u32, forced: bool) -> WaveUpdate {
        let wave = open.finish(self.side, exit_ms, forced);
        if forced {
            log::debug!("Side {}: wave force-completed at {} ms", self.side.as_str(), exit_ms);
        }
        self.open = None;
        self.completed = Some(wave);
        self.state = WaveState::Complete;
        WaveUpdate::Completed(wave)
    }

    /// Close an open wave if `now_ms` is past its duration limit, without a
    /// new sample.
    pub fn expire(&mut self, now_ms: u32) -> Option<Wave> {
        let open = self.open?;
        let max_ms = self.config.max_wave_duration_ms;
        if now_ms.wrapping_sub(open.entry_ms) < max_ms {
            return None;
        }
        match self.complete(open, open.entry_ms.wrapping_add(max_ms), true) {
            WaveUpdate::Completed(wave) => Some(wave),
            _ => None,
        }
    }

    /// Drop any open or completed wave and return to idle. The noise
    /// reference and smoothing history are kept.
    pub fn reset(&mut self) {
        self.open = None;
        self.completed = None;
        self.state = WaveState::Idle;
    }

    /// Forget everything, including the noise reference.
    pub fn full_reset(&mut self) {
        self.reset();
        self.smoother.clear();
        self.baseline_seen = 0;
        self.noise_reference = 0.0;
        self.threshold = 0.0;
    }

    /// Clear the smoothing history only
    pub fn clear_smoothing(&mut self) {
        self.smoother.clear();
    }

    pub fn is_ready(&self) -> bool {
        self.baseline_seen >= self.config.baseline_samples
    }

    pub fn state(&self) -> WaveState {
        self.state
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn completed(&self) -> Option<&Wave> {
        self.completed.as_ref()
    }

    pub fn noise_reference(&self) -> f32 {
        self.noise_reference
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}
