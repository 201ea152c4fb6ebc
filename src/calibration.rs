/// Per-sensor baseline calibration and threshold derivation.
///
/// Each available sensor is sampled at a fixed interval for a fixed duration
/// while the hoop is empty. The baseline is the highest valid sample, so
/// ordinary noise stays below the close threshold. A sensor that produced no
/// valid sample reads as baseline 0 and is excluded from the session.
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::config::AcquisitionConfig;
use crate::mux::MuxController;
use crate::sensor::{Position, NUM_SENSORS};
use crate::vcnl4040;

/// Interrupt thresholds programmed into one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorThresholds {
    /// "Close" threshold
    pub high: u16,
    /// "Away" threshold
    pub low: u16,
}

impl SensorThresholds {
    /// high = baseline + margin, low = high - hysteresis, never below the
    /// baseline itself.
    pub fn from_baseline(baseline: u16, margin: u16, hysteresis: u16) -> Self {
        let high = baseline.saturating_add(margin);
        let low = high.saturating_sub(hysteresis).max(baseline);
        Self { high, low }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaselineState {
    /// No calibration has run; the sensor is used with a zero baseline
    #[default]
    Uncalibrated,
    Measured(u16),
    /// Calibration produced no valid sample
    Failed,
}

/// Baselines for all six positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Baselines {
    states: [BaselineState; NUM_SENSORS],
}

impl Baselines {
    pub const fn new() -> Self {
        Self {
            states: [BaselineState::Uncalibrated; NUM_SENSORS],
        }
    }

    pub fn state(&self, position: Position) -> BaselineState {
        self.states[position.index()]
    }

    pub fn set(&mut self, position: Position, state: BaselineState) {
        self.states[position.index()] = state;
    }

    /// Baseline value, 0 when not measured
    pub fn get(&self, position: Position) -> u16 {
        match self.states[position.index()] {
            BaselineState::Measured(v) => v,
            _ => 0,
        }
    }

    /// False only for sensors whose calibration failed
    pub fn is_included(&self, position: Position) -> bool {
        self.states[position.index()] != BaselineState::Failed
    }

    pub fn values(&self) -> [u16; NUM_SENSORS] {
        core::array::from_fn(|i| match self.states[i] {
            BaselineState::Measured(v) => v,
            _ => 0,
        })
    }

    pub fn measured_count(&self) -> usize {
        self.states
            .iter()
            .filter(|s| matches!(s, BaselineState::Measured(_)))
            .count()
    }

    pub fn thresholds(&self, position: Position, config: &AcquisitionConfig) -> SensorThresholds {
        SensorThresholds::from_baseline(self.get(position), config.threshold_margin, config.hysteresis)
    }
}

/// Sample statistics for one calibrated sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorCalibration {
    pub samples: u16,
    pub min: u16,
    pub max: u16,
    pub mean: u16,
}

impl SensorCalibration {
    pub const fn noise_range(&self) -> u16 {
        self.max - self.min
    }
}

/// Outcome of one calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationReport {
    pub sensors: [Option<SensorCalibration>; NUM_SENSORS],
    /// Sensors that were available but returned no valid sample
    pub failed: [bool; NUM_SENSORS],
}

impl CalibrationReport {
    pub fn calibrated_count(&self) -> usize {
        self.sensors.iter().filter(|s| s.is_some()).count()
    }
}

/// Accumulates samples for one sensor.
#[derive(Debug, Default)]
struct SampleStats {
    count: u16,
    sum: u32,
    min: u16,
    max: u16,
}

impl SampleStats {
    fn add(&mut self, value: u16) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value as u32;
    }

    fn finish(&self) -> Option<SensorCalibration> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as u32;
        let mean = ((self.sum + n / 2) / n) as u16;
        Some(SensorCalibration {
            samples: self.count,
            min: self.min,
            max: self.max,
            mean,
        })
    }
}

/// Sample every available sensor and compute its baseline.
///
/// Blocks for roughly `calibration_duration_ms` per sensor. All channels are
/// disabled when it returns.
pub fn calibrate<I2C: I2c, D: DelayNs>(
    mux: &mut MuxController<I2C>,
    delay: &mut D,
    config: &AcquisitionConfig,
) -> (Baselines, CalibrationReport) {
    let mut baselines = Baselines::new();
    let mut report = CalibrationReport::default();
    let samples = config.calibration_samples();

    log::info!(
        "Calibrating: {} samples per sensor at {} ms",
        samples,
        config.calibration_interval_ms
    );

    for position in Position::all() {
        if !mux.is_sensor_available(position) {
            continue;
        }

        let mut stats = SampleStats::default();
        for _ in 0..samples {
            if mux.select_sensor(position) {
                if let Ok(value) = vcnl4040::read_proximity(mux.bus()) {
                    stats.add(value);
                }
            }
            delay.delay_ms(config.calibration_interval_ms);
        }

        match stats.finish() {
            Some(cal) => {
                log::info!(
                    "{}: baseline {} (min {}, mean {}, noise {}, {} samples)",
                    position.name(),
                    cal.max,
                    cal.min,
                    cal.mean,
                    cal.noise_range(),
                    cal.samples
                );
                baselines.set(position, BaselineState::Measured(cal.max));
                report.sensors[position.index()] = Some(cal);
            }
            None => {
                log::warn!("{}: no valid samples, excluded", position.name());
                baselines.set(position, BaselineState::Failed);
                report.failed[position.index()] = true;
            }
        }
    }

    mux.disable_all();
    log::info!("Calibration complete: {} sensors", report.calibrated_count());
    (baselines, report)
}
