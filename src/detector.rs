/// Transit direction detector.
///
/// Readings are summed per side per timestamp into aggregate samples, which
/// drive one [`WaveTracker`] per side. When both sides hold a completed
/// wave that matches, a [`Detection`] is produced, both sides reset and a
/// cooldown suppresses new waves. A wave that finds no partner is discarded
/// once the detection window (maximum wave duration plus maximum peak gap,
/// counted from the first wave entry) has passed.
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::config::{MatcherConfig, WaveConfig};
use crate::defaults;
use crate::matcher::{self, Detection};
use crate::sensor::{Reading, Side};
use crate::wave::{WaveState, WaveTracker, WaveUpdate};

/// Completed detections waiting for a consumer
pub type DetectionChannel = Channel<CriticalSectionRawMutex, Detection, { defaults::DETECTION_QUEUE_DEPTH }>;

/// Hand a detection to the consumer without blocking. Returns false when the
/// channel is full and the detection was dropped.
pub fn publish(channel: &DetectionChannel, detection: Detection) -> bool {
    channel.try_send(detection).is_ok()
}

// ── Aggregation ──────────────────────────────────────────────────────

/// Per-side sums for one timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateSample {
    pub timestamp_ms: u32,
    pub side_a: u32,
    pub side_b: u32,
}

impl AggregateSample {
    pub fn side(&self, side: Side) -> u32 {
        match side {
            Side::A => self.side_a,
            Side::B => self.side_b,
        }
    }
}

/// Sums readings that share a timestamp. The sample for a timestamp is
/// released when a reading with a different timestamp arrives, or on flush.
#[derive(Debug, Clone, Default)]
pub struct SideAggregator {
    current: Option<AggregateSample>,
}

impl SideAggregator {
    pub const fn new() -> Self {
        Self { current: None }
    }

    pub fn push(&mut self, reading: &Reading) -> Option<AggregateSample> {
        let released = match self.current {
            Some(sample) if sample.timestamp_ms != reading.timestamp_ms => self.current.take(),
            _ => None,
        };
        let sample = self.current.get_or_insert(AggregateSample {
            timestamp_ms: reading.timestamp_ms,
            side_a: 0,
            side_b: 0,
        });
        let value = reading.proximity as u32;
        match reading.side {
            Side::A => sample.side_a += value,
            Side::B => sample.side_b += value,
        }
        released
    }

    pub fn flush(&mut self) -> Option<AggregateSample> {
        self.current.take()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

// ── Detector ─────────────────────────────────────────────────────────

/// Side state for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SideDiagnostics {
    pub ready: bool,
    pub state: WaveState,
    pub noise_reference: f32,
    pub threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorDiagnostics {
    pub side_a: SideDiagnostics,
    pub side_b: SideDiagnostics,
    /// Time of the first wave entry of the pending detection, if any
    pub detecting_since_ms: Option<u32>,
    pub cooldown_until_ms: Option<u32>,
    pub detections: u32,
    pub timeouts: u32,
}

pub struct DirectionDetector {
    matcher: MatcherConfig,
    detection_window_ms: u32,
    aggregator: SideAggregator,
    sides: [WaveTracker; 2],
    detecting_since: Option<u32>,
    cooldown_until: Option<u32>,
    detections: u32,
    timeouts: u32,
}

impl DirectionDetector {
    pub fn new(wave: &WaveConfig, matcher: &MatcherConfig) -> Self {
        Self {
            matcher: *matcher,
            detection_window_ms: wave.max_wave_duration_ms + matcher.max_peak_gap_ms,
            aggregator: SideAggregator::new(),
            sides: [WaveTracker::new(Side::A, wave), WaveTracker::new(Side::B, wave)],
            detecting_since: None,
            cooldown_until: None,
            detections: 0,
            timeouts: 0,
        }
    }

    /// Feed one sensor reading. Readings must arrive with non-decreasing
    /// timestamps.
    pub fn push_reading(&mut self, reading: &Reading) -> Option<Detection> {
        let sample = self.aggregator.push(reading)?;
        self.push_aggregate(sample)
    }

    /// Process the sample still held by the aggregator
    pub fn flush(&mut self) -> Option<Detection> {
        let sample = self.aggregator.flush()?;
        self.push_aggregate(sample)
    }

    pub fn push_aggregate(&mut self, sample: AggregateSample) -> Option<Detection> {
        let now = sample.timestamp_ms;
        let entry_allowed = !self.in_cooldown(now);

        let mut completed = false;
        for tracker in &mut self.sides {
            match tracker.update(now, sample.side(tracker.side()) as f32, entry_allowed) {
                WaveUpdate::Entered => {
                    if self.detecting_since.is_none() {
                        log::debug!("Side {} wave entered at {} ms", tracker.side().as_str(), now);
                        self.detecting_since = Some(now);
                    }
                }
                WaveUpdate::Completed(_) => completed = true,
                _ => {}
            }
        }

        self.settle(now, completed)
    }

    /// Advance time without a sample. Open waves past their duration limit
    /// are closed and an expired detection window is discarded.
    pub fn tick(&mut self, now_ms: u32) -> Option<Detection> {
        let mut completed = false;
        for tracker in &mut self.sides {
            completed |= tracker.expire(now_ms).is_some();
        }
        self.settle(now_ms, completed)
    }

    fn settle(&mut self, now: u32, completed: bool) -> Option<Detection> {
        if completed {
            if let Some(detection) = self.try_match() {
                return Some(detection);
            }
        }

        if let Some(since) = self.detecting_since {
            if now.wrapping_sub(since) > self.detection_window_ms {
                log::debug!("Detection window expired at {} ms without a match", now);
                self.timeouts = self.timeouts.wrapping_add(1);
                self.end_detection(now);
            }
        }
        None
    }

    fn try_match(&mut self) -> Option<Detection> {
        let a = *self.sides[0].completed()?;
        let b = *self.sides[1].completed()?;
        let detection = matcher::match_waves(&a, &b, &self.matcher)?;
        log::info!(
            "Transit {} (confidence {}, gap {} ms)",
            detection.direction.as_str(),
            detection.confidence,
            detection.com_gap_ms
        );
        self.detections = self.detections.wrapping_add(1);
        self.end_detection(detection.timestamp_ms);
        Some(detection)
    }

    fn end_detection(&mut self, now: u32) {
        for tracker in &mut self.sides {
            tracker.reset();
        }
        self.detecting_since = None;
        self.cooldown_until = Some(now.wrapping_add(self.matcher.cooldown_ms));
    }

    fn in_cooldown(&mut self, now: u32) -> bool {
        match self.cooldown_until {
            Some(until) if (until.wrapping_sub(now) as i32) > 0 => true,
            Some(_) => {
                self.cooldown_until = None;
                false
            }
            None => false,
        }
    }

    /// Abandon pending waves and the cooldown. The learned noise reference
    /// is kept.
    pub fn reset(&mut self) {
        self.aggregator.clear();
        for tracker in &mut self.sides {
            tracker.reset();
            tracker.clear_smoothing();
        }
        self.detecting_since = None;
        self.cooldown_until = None;
    }

    /// Reset and relearn the noise reference from the next samples.
    pub fn full_reset(&mut self) {
        self.reset();
        for tracker in &mut self.sides {
            tracker.full_reset();
        }
        self.detections = 0;
        self.timeouts = 0;
    }

    pub fn is_ready(&self) -> bool {
        self.sides.iter().all(|t| t.is_ready())
    }

    pub fn diagnostics(&self) -> DetectorDiagnostics {
        let side = |t: &WaveTracker| SideDiagnostics {
            ready: t.is_ready(),
            state: t.state(),
            noise_reference: t.noise_reference(),
            threshold: t.threshold(),
        };
        DetectorDiagnostics {
            side_a: side(&self.sides[0]),
            side_b: side(&self.sides[1]),
            detecting_since_ms: self.detecting_since,
            cooldown_until_ms: self.cooldown_until,
            detections: self.detections,
            timeouts: self.timeouts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Direction;
    use crate::sensor::{ModuleId, Position};

    const STEP_MS: u32 = 2;
    const BASE: u32 = 20;

    fn detector() -> DirectionDetector {
        DirectionDetector::new(&WaveConfig::new(), &MatcherConfig::new())
    }

    /// Run the detector through its learning window on a flat signal and on
    /// to `until_ms`.
    fn settle(det: &mut DirectionDetector, until_ms: u32) {
        let mut t = 0;
        while t < until_ms {
            assert!(det.push_aggregate(sample(t, BASE, BASE)).is_none());
            t += STEP_MS;
        }
        assert!(det.is_ready());
    }

    fn sample(t: u32, a: u32, b: u32) -> AggregateSample {
        AggregateSample {
            timestamp_ms: t,
            side_a: a,
            side_b: b,
        }
    }

    /// Pulse shape, one value per step
    const PULSE: [u32; 4] = [60, 120, 120, 60];

    fn pulse_value(t: u32, start: u32) -> u32 {
        if t < start {
            return BASE;
        }
        let i = ((t - start) / STEP_MS) as usize;
        PULSE.get(i).copied().unwrap_or(BASE)
    }

    /// Feed a transit with side pulses starting at `start_a` / `start_b`,
    /// from `from` to `to`. Returns all detections.
    fn transit(det: &mut DirectionDetector, from: u32, to: u32, start_a: u32, start_b: u32) -> Vec<Detection> {
        let mut out = Vec::new();
        let mut t = from;
        while t < to {
            let s = sample(t, pulse_value(t, start_a), pulse_value(t, start_b));
            if let Some(d) = det.push_aggregate(s) {
                out.push(d);
            }
            t += STEP_MS;
        }
        out
    }

    // ── Aggregation ─────────────────────────────────────────────────

    #[test]
    fn aggregator_sums_per_side_and_releases_on_new_timestamp() {
        let mut agg = SideAggregator::new();
        for p in Position::all() {
            assert!(agg.push(&Reading::new(10, p, 5 + p.get() as u16)).is_none());
        }
        let released = agg.push(&Reading::new(11, Position::new(0).unwrap(), 1)).unwrap();
        // Side A: positions 0, 2, 4 -> 5 + 7 + 9
        assert_eq!(released, sample(10, 21, 24));
        assert_eq!(agg.flush(), Some(sample(11, 1, 0)));
        assert_eq!(agg.flush(), None);
    }

    // ── Scenarios ───────────────────────────────────────────────────

    #[test]
    fn transit_a_then_b() {
        let mut det = detector();
        settle(&mut det, 200);
        let found = transit(&mut det, 200, 400, 200, 204);
        assert_eq!(found.len(), 1);
        let d = found[0];
        assert_eq!(d.direction, Direction::AToB);
        assert!((d.com_gap_ms - 4.0).abs() < 0.01);
        assert!(d.confidence > 0.7);
        assert_eq!(d.timestamp_ms, 214);
        assert_eq!(det.diagnostics().detections, 1);
    }

    #[test]
    fn transit_b_then_a() {
        let mut det = detector();
        settle(&mut det, 200);
        let found = transit(&mut det, 200, 400, 210, 200);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].direction, Direction::BToA);
    }

    #[test]
    fn one_sided_wave_times_out() {
        let mut det = detector();
        settle(&mut det, 200);
        let window = WaveConfig::new().max_wave_duration_ms + MatcherConfig::new().max_peak_gap_ms;

        // Side B never rises
        let found = transit(&mut det, 200, 200 + window, 200, u32::MAX);
        assert!(found.is_empty());
        assert_eq!(det.diagnostics().side_a.state, WaveState::Complete);
        assert_eq!(det.diagnostics().detecting_since_ms, Some(200));

        // First sample past the window discards the wave
        transit(&mut det, 200 + window, 200 + window + 4, 200, u32::MAX);
        let diag = det.diagnostics();
        assert_eq!(diag.side_a.state, WaveState::Idle);
        assert_eq!(diag.detecting_since_ms, None);
        assert_eq!(diag.timeouts, 1);
        assert_eq!(diag.detections, 0);
    }

    #[test]
    fn tick_closes_wave_and_window_without_samples() {
        let mut det = detector();
        settle(&mut det, 200);
        let window = WaveConfig::new().max_wave_duration_ms + MatcherConfig::new().max_peak_gap_ms;

        // Side A rises, then the samples stop
        transit(&mut det, 200, 206, 200, u32::MAX);
        assert_eq!(det.diagnostics().side_a.state, WaveState::InWave);

        assert!(det.tick(300).is_none());
        assert_eq!(det.diagnostics().side_a.state, WaveState::InWave);

        assert!(det.tick(200 + WaveConfig::new().max_wave_duration_ms).is_none());
        assert_eq!(det.diagnostics().side_a.state, WaveState::Complete);

        assert!(det.tick(201 + window).is_none());
        let diag = det.diagnostics();
        assert_eq!(diag.side_a.state, WaveState::Idle);
        assert_eq!(diag.detecting_since_ms, None);
        assert_eq!(diag.timeouts, 1);
    }

    #[test]
    fn second_transit_inside_cooldown_suppressed() {
        let mut det = detector();
        settle(&mut det, 200);
        let mut found = transit(&mut det, 200, 500, 200, 204);
        // 300 ms after the first, well inside the 500 ms cooldown
        found.extend(transit(&mut det, 500, 1000, 500, 504));
        assert_eq!(found.len(), 1);

        // After the cooldown a new transit is detected again
        found.extend(transit(&mut det, 1000, 1200, 1000, 1004));
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn sub_threshold_modules_sum_to_detection() {
        let mut det = detector();
        let per_module_base = 10u16;
        // Each module's own rise (8) would stay below a single sensor's
        // minimum rise of 10; the sum of three crosses the aggregate threshold.
        let per_module_peak = 18u16;
        let mut detections = Vec::new();

        let side_value = |t: u32, start: u32| {
            if (start..start + 6).contains(&t) {
                per_module_peak
            } else {
                per_module_base
            }
        };

        let mut t = 0;
        while t < 600 {
            for module in ModuleId::ALL {
                for side in Side::BOTH {
                    let start = if side == Side::A { 200 } else { 204 };
                    let reading = Reading::new(t, module.position(side), side_value(t, start));
                    if let Some(d) = det.push_reading(&reading) {
                        detections.push(d);
                    }
                }
            }
            t += STEP_MS;
        }
        if let Some(d) = det.flush() {
            detections.push(d);
        }

        assert_eq!(det.diagnostics().side_a.threshold, 45.0);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].direction, Direction::AToB);
        assert!(per_module_peak - per_module_base < 10);
    }

    #[test]
    fn nothing_detected_while_learning() {
        let mut det = detector();
        // Pulses inside the learning window only raise the noise reference
        let found = transit(&mut det, 0, 100, 20, 24);
        assert!(found.is_empty());
        assert!(det.is_ready());
        assert!(det.diagnostics().side_a.noise_reference > BASE as f32);
    }

    #[test]
    fn reset_keeps_noise_reference() {
        let mut det = detector();
        settle(&mut det, 200);
        transit(&mut det, 200, 206, 200, u32::MAX);
        assert_eq!(det.diagnostics().side_a.state, WaveState::InWave);

        det.reset();
        let diag = det.diagnostics();
        assert_eq!(diag.side_a.state, WaveState::Idle);
        assert!(diag.side_a.ready);
        assert_eq!(diag.side_a.noise_reference, BASE as f32);

        det.full_reset();
        assert!(!det.is_ready());
    }

    #[test]
    fn publish_drops_when_full() {
        let channel = DetectionChannel::new();
        let mut det = detector();
        settle(&mut det, 200);
        let d = transit(&mut det, 200, 400, 200, 204)[0];
        for _ in 0..defaults::DETECTION_QUEUE_DEPTH {
            assert!(publish(&channel, d));
        }
        assert!(!publish(&channel, d));
    }
}
