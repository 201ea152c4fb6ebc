/// Engine configuration: sensor drive settings, wave detection and matching.
///
/// All values are plain `Copy` data with `const fn new()` defaults. A
/// configuration can also be loaded from a JSON document; every field must be
/// present, and the parsed values are range-checked before use.
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::ConfigError;
use crate::wave::MAX_SMOOTHING_WINDOW;

// ── Sensor drive settings ────────────────────────────────────────────

/// Infrared LED drive current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedCurrent {
    #[serde(rename = "50mA")]
    Ma50,
    #[serde(rename = "75mA")]
    Ma75,
    #[serde(rename = "100mA")]
    Ma100,
    #[serde(rename = "120mA")]
    Ma120,
    #[serde(rename = "140mA")]
    Ma140,
    #[serde(rename = "160mA")]
    Ma160,
    #[serde(rename = "180mA")]
    Ma180,
    #[serde(rename = "200mA")]
    Ma200,
}

impl LedCurrent {
    /// LED_I field value (3 bits)
    pub const fn bits(self) -> u8 {
        self as u8
    }
}

/// Proximity integration time, in multiples of the base period T.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationTime {
    #[serde(rename = "1T")]
    T1,
    #[serde(rename = "1.5T")]
    T1_5,
    #[serde(rename = "2T")]
    T2,
    #[serde(rename = "2.5T")]
    T2_5,
    #[serde(rename = "3T")]
    T3,
    #[serde(rename = "3.5T")]
    T3_5,
    #[serde(rename = "4T")]
    T4,
    #[serde(rename = "8T")]
    T8,
}

impl IntegrationTime {
    /// PS_IT field value (3 bits)
    pub const fn bits(self) -> u8 {
        self as u8
    }
}

/// How the sensor's interrupt pin behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptMode {
    /// Pulses on close/away threshold crossings, flags latched until read
    #[serde(rename = "normal")]
    Normal,
    /// Pin level follows proximity state directly
    #[serde(rename = "logic")]
    LogicOutput,
}

/// Multi-pulse field value for a pulse count, if the count is supported.
pub const fn multi_pulse_bits(pulses: u8) -> Option<u8> {
    match pulses {
        1 => Some(0),
        2 => Some(1),
        4 => Some(2),
        8 => Some(3),
        _ => None,
    }
}

// ── Acquisition ──────────────────────────────────────────────────────

/// Sensor programming, calibration and sampling settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Counts above baseline for the high (close) threshold
    pub threshold_margin: u16,
    /// Counts between the high and low (away) thresholds
    pub hysteresis: u16,
    /// Consecutive crossings before the sensor fires (1-4)
    pub persistence: u8,
    pub smart_persistence: bool,
    pub led_current: LedCurrent,
    pub integration_time: IntegrationTime,
    /// LED pulses per measurement (1, 2, 4 or 8)
    pub multi_pulse: u8,
    pub interrupt_mode: InterruptMode,
    /// Recalibrate baselines every time a session starts
    pub auto_calibrate: bool,
    pub calibration_duration_ms: u32,
    pub calibration_interval_ms: u32,
    pub poll_period_us: u32,
}

impl AcquisitionConfig {
    pub const fn new() -> Self {
        Self {
            threshold_margin: defaults::THRESHOLD_MARGIN,
            hysteresis: defaults::HYSTERESIS,
            persistence: defaults::PERSISTENCE,
            smart_persistence: defaults::SMART_PERSISTENCE,
            led_current: LedCurrent::Ma200,
            integration_time: IntegrationTime::T8,
            multi_pulse: defaults::MULTI_PULSE,
            interrupt_mode: InterruptMode::Normal,
            auto_calibrate: defaults::AUTO_CALIBRATE,
            calibration_duration_ms: defaults::CALIBRATION_DURATION_MS,
            calibration_interval_ms: defaults::CALIBRATION_INTERVAL_MS,
            poll_period_us: defaults::POLL_PERIOD_US,
        }
    }

    /// Number of calibration samples taken per sensor
    pub const fn calibration_samples(&self) -> u32 {
        let n = self.calibration_duration_ms / self.calibration_interval_ms;
        if n == 0 {
            1
        } else {
            n
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=4).contains(&self.persistence) {
            return Err(ConfigError::invalid("persistence", "must be 1-4"));
        }
        if multi_pulse_bits(self.multi_pulse).is_none() {
            return Err(ConfigError::invalid("multi_pulse", "must be 1, 2, 4 or 8"));
        }
        if self.calibration_interval_ms == 0 {
            return Err(ConfigError::invalid("calibration_interval_ms", "must be positive"));
        }
        if self.calibration_duration_ms < self.calibration_interval_ms {
            return Err(ConfigError::invalid(
                "calibration_duration_ms",
                "must cover at least one interval",
            ));
        }
        if self.poll_period_us == 0 {
            return Err(ConfigError::invalid("poll_period_us", "must be positive"));
        }
        Ok(())
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Wave detection ───────────────────────────────────────────────────

/// Per-side wave tracking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveConfig {
    /// Moving-average window, in aggregate samples
    pub smoothing_window: u8,
    /// Samples used to learn the noise reference
    pub baseline_samples: u16,
    pub peak_multiplier: f32,
    pub min_rise: f32,
    pub max_wave_duration_ms: u32,
    /// Exit when the signal falls below this fraction of the wave's peak
    pub wave_exit_fraction: f32,
}

impl WaveConfig {
    pub const fn new() -> Self {
        Self {
            smoothing_window: defaults::SMOOTHING_WINDOW,
            baseline_samples: defaults::BASELINE_SAMPLES,
            peak_multiplier: defaults::PEAK_MULTIPLIER,
            min_rise: defaults::MIN_RISE,
            max_wave_duration_ms: defaults::MAX_WAVE_DURATION_MS,
            wave_exit_fraction: defaults::WAVE_EXIT_FRACTION,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smoothing_window == 0 || self.smoothing_window as usize > MAX_SMOOTHING_WINDOW {
            return Err(ConfigError::invalid("smoothing_window", "must be 1-16"));
        }
        if self.baseline_samples == 0 {
            return Err(ConfigError::invalid("baseline_samples", "must be positive"));
        }
        // Written as negated comparisons so NaN is rejected too
        if !(self.peak_multiplier >= 1.0) {
            return Err(ConfigError::invalid("peak_multiplier", "must be at least 1.0"));
        }
        if !(self.min_rise >= 0.0) {
            return Err(ConfigError::invalid("min_rise", "must not be negative"));
        }
        if self.max_wave_duration_ms == 0 {
            return Err(ConfigError::invalid("max_wave_duration_ms", "must be positive"));
        }
        if !(self.wave_exit_fraction > 0.0 && self.wave_exit_fraction <= 1.0) {
            return Err(ConfigError::invalid("wave_exit_fraction", "must be in (0, 1]"));
        }
        Ok(())
    }
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Matching ─────────────────────────────────────────────────────────

/// Cross-side matching and confidence parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    pub max_peak_gap_ms: u32,
    pub cooldown_ms: u32,
    pub com_gap_scale_ms: f32,
    pub peak_strength_scale: f32,
}

impl MatcherConfig {
    pub const fn new() -> Self {
        Self {
            max_peak_gap_ms: defaults::MAX_PEAK_GAP_MS,
            cooldown_ms: defaults::COOLDOWN_MS,
            com_gap_scale_ms: defaults::COM_GAP_SCALE_MS,
            peak_strength_scale: defaults::PEAK_STRENGTH_SCALE,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_peak_gap_ms == 0 {
            return Err(ConfigError::invalid("max_peak_gap_ms", "must be positive"));
        }
        if !(self.com_gap_scale_ms > 0.0) {
            return Err(ConfigError::invalid("com_gap_scale_ms", "must be positive"));
        }
        if !(self.peak_strength_scale > 0.0) {
            return Err(ConfigError::invalid("peak_strength_scale", "must be positive"));
        }
        Ok(())
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Top level ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub acquisition: AcquisitionConfig,
    pub wave: WaveConfig,
    pub matcher: MatcherConfig,
}

impl EngineConfig {
    pub const fn new() -> Self {
        Self {
            acquisition: AcquisitionConfig::new(),
            wave: WaveConfig::new(),
            matcher: MatcherConfig::new(),
        }
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(data: &[u8]) -> Result<Self, ConfigError> {
        let (config, _) =
            serde_json_core::from_slice::<EngineConfig>(data).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.acquisition.validate()?;
        self.wave.validate()?;
        self.matcher.validate()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"{
        "acquisition": {
            "threshold_margin": 12,
            "hysteresis": 4,
            "persistence": 2,
            "smart_persistence": false,
            "led_current": "120mA",
            "integration_time": "4T",
            "multi_pulse": 4,
            "interrupt_mode": "logic",
            "auto_calibrate": false,
            "calibration_duration_ms": 500,
            "calibration_interval_ms": 10,
            "poll_period_us": 2000
        },
        "wave": {
            "smoothing_window": 5,
            "baseline_samples": 40,
            "peak_multiplier": 1.5,
            "min_rise": 8,
            "max_wave_duration_ms": 250,
            "wave_exit_fraction": 0.5
        },
        "matcher": {
            "max_peak_gap_ms": 120,
            "cooldown_ms": 400,
            "com_gap_scale_ms": 5,
            "peak_strength_scale": 100
        }
    }"#;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::new().validate().is_ok());
        assert_eq!(EngineConfig::default(), EngineConfig::new());
    }

    #[test]
    fn default_drive_settings() {
        let acq = AcquisitionConfig::new();
        assert_eq!(acq.led_current, LedCurrent::Ma200);
        assert_eq!(acq.integration_time, IntegrationTime::T8);
        assert_eq!(acq.multi_pulse, 8);
        assert_eq!(acq.interrupt_mode, InterruptMode::Normal);
        assert_eq!(acq.calibration_samples(), 50);
    }

    #[test]
    fn parses_full_document() {
        let config = EngineConfig::from_json(FULL_CONFIG.as_bytes()).unwrap();
        assert_eq!(config.acquisition.threshold_margin, 12);
        assert_eq!(config.acquisition.led_current, LedCurrent::Ma120);
        assert_eq!(config.acquisition.integration_time, IntegrationTime::T4);
        assert_eq!(config.acquisition.interrupt_mode, InterruptMode::LogicOutput);
        assert!(!config.acquisition.auto_calibrate);
        assert_eq!(config.wave.smoothing_window, 5);
        assert_eq!(config.wave.max_wave_duration_ms, 250);
        assert_eq!(config.matcher.max_peak_gap_ms, 120);
        assert_eq!(config.matcher.cooldown_ms, 400);
    }

    #[test]
    fn missing_field_is_parse_error() {
        let doc = FULL_CONFIG.replace(r#""cooldown_ms": 400,"#, "");
        let err = EngineConfig::from_json(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn out_of_range_is_invalid() {
        let doc = FULL_CONFIG.replace(r#""multi_pulse": 4"#, r#""multi_pulse": 3"#);
        let err = EngineConfig::from_json(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "multi_pulse", .. }));
    }

    #[test]
    fn unknown_enum_value_is_parse_error() {
        let doc = FULL_CONFIG.replace("120mA", "300mA");
        assert!(matches!(
            EngineConfig::from_json(doc.as_bytes()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_bad_wave_settings() {
        let mut wave = WaveConfig::new();
        wave.wave_exit_fraction = 0.0;
        assert!(wave.validate().is_err());

        let mut wave = WaveConfig::new();
        wave.smoothing_window = 0;
        assert!(wave.validate().is_err());

        let mut wave = WaveConfig::new();
        wave.peak_multiplier = f32::NAN;
        assert!(wave.validate().is_err());
    }

    #[test]
    fn rejects_bad_persistence() {
        let mut acq = AcquisitionConfig::new();
        acq.persistence = 0;
        assert!(acq.validate().is_err());
        acq.persistence = 5;
        assert!(acq.validate().is_err());
        acq.persistence = 4;
        assert!(acq.validate().is_ok());
    }

    #[test]
    fn register_field_values() {
        assert_eq!(LedCurrent::Ma50.bits(), 0);
        assert_eq!(LedCurrent::Ma200.bits(), 7);
        assert_eq!(IntegrationTime::T1.bits(), 0);
        assert_eq!(IntegrationTime::T4.bits(), 6);
        assert_eq!(IntegrationTime::T8.bits(), 7);
        assert_eq!(multi_pulse_bits(8), Some(3));
        assert_eq!(multi_pulse_bits(3), None);
    }
}
