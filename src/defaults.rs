/// Default tuning values for acquisition, wave detection and matching.
///
/// These are the values the hoop ships with. Every one of them can be
/// overridden through [`crate::config::EngineConfig`].

// ── Acquisition ──────────────────────────────────────────────────────

/// Counts above baseline before a sensor raises its "close" interrupt
pub const THRESHOLD_MARGIN: u16 = 10;

/// Gap between the close and away thresholds
pub const HYSTERESIS: u16 = 5;

/// Consecutive threshold crossings required by the sensor before it fires
pub const PERSISTENCE: u8 = 1;

pub const SMART_PERSISTENCE: bool = true;

/// Infrared LED pulses per measurement
pub const MULTI_PULSE: u8 = 8;

pub const AUTO_CALIBRATE: bool = true;

/// How long each sensor is sampled during calibration
pub const CALIBRATION_DURATION_MS: u32 = 1000;

/// Interval between calibration samples (50 samples per sensor)
pub const CALIBRATION_INTERVAL_MS: u32 = 20;

/// Settle time after the sensors are enabled, before calibration starts
pub const CALIBRATION_SETTLE_MS: u32 = 50;

/// Polling cycle period (one cycle reads all six sensors)
pub const POLL_PERIOD_US: u32 = 1000;

/// Settle time after switching the inner multiplexer channel
pub const CHANNEL_SETTLE_US: u32 = 50;

/// Interrupt event queue depth
pub const EVENT_QUEUE_DEPTH: usize = 256;

/// Detection output channel depth
pub const DETECTION_QUEUE_DEPTH: usize = 8;

// ── Wave detection ───────────────────────────────────────────────────

pub const SMOOTHING_WINDOW: u8 = 3;

/// Aggregate samples used to learn the noise reference
pub const BASELINE_SAMPLES: u16 = 50;

pub const PEAK_MULTIPLIER: f32 = 1.5;

/// Minimum absolute rise above the noise reference
pub const MIN_RISE: f32 = 10.0;

/// An open wave is force-completed after this long
pub const MAX_WAVE_DURATION_MS: u32 = 200;

/// A wave ends when the signal drops below this fraction of its peak
pub const WAVE_EXIT_FRACTION: f32 = 0.5;

// ── Matching ─────────────────────────────────────────────────────────

/// Largest allowed gap between the two sides' wave exits
pub const MAX_PEAK_GAP_MS: u32 = 150;

pub const COOLDOWN_MS: u32 = 500;

/// Center-of-mass gap at which the timing term saturates
pub const COM_GAP_SCALE_MS: f32 = 5.0;

/// Mean peak value at which the strength term saturates
pub const PEAK_STRENGTH_SCALE: f32 = 100.0;

// ── Session control ──────────────────────────────────────────────────

/// Upper bound on waiting for the acquisition worker to exit
pub const STOP_TIMEOUT_MS: u32 = 500;

/// Poll interval while waiting for the worker to exit
pub const STOP_POLL_INTERVAL_MS: u32 = 10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_yields_fifty_samples() {
        assert_eq!(CALIBRATION_DURATION_MS / CALIBRATION_INTERVAL_MS, 50);
    }

    #[test]
    fn stop_wait_is_bounded() {
        assert!(STOP_POLL_INTERVAL_MS > 0);
        assert_eq!(STOP_TIMEOUT_MS / STOP_POLL_INTERVAL_MS, 50);
    }

    #[test]
    fn multi_pulse_is_supported_count() {
        assert!([1, 2, 4, 8].contains(&MULTI_PULSE));
    }
}
