/// Polling acquisition: read every included sensor once per cycle.
///
/// All readings of a cycle carry the same timestamp, taken at the start of
/// the cycle, so the detector can sum them into one aggregate sample per
/// side. Timestamps are milliseconds since the session started, accumulated
/// from clock deltas so they keep rising when the microsecond clock wraps.
use embedded_hal::i2c::I2c;
use heapless::Vec;

use crate::calibration::Baselines;
use crate::mux::MuxController;
use crate::sensor::{Position, Reading, NUM_SENSORS};
use crate::vcnl4040;

/// Free-running microsecond clock. Wraps at `u32::MAX`.
pub trait Clock {
    fn now_us(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_us(&self) -> u32 {
        (**self).now_us()
    }
}

/// Consecutive failed cycles that are always reported
const WARN_FIRST_FAILURES: u32 = 3;

/// Minimum spacing of later failure warnings
const WARN_INTERVAL_US: u32 = 5_000_000;

/// Per-session cycle accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleStats {
    pub cycles: u32,
    pub reads_ok: u32,
    pub reads_failed: u32,
    /// Cycles in a row that produced no reading at all
    pub consecutive_empty: u32,
}

pub type CycleReadings = Vec<Reading, NUM_SENSORS>;

pub struct PollingSampler {
    period_us: u32,
    session_start_us: u32,
    last_cycle_us: Option<u32>,
    /// Session time at the start of the latest cycle
    elapsed_us: u64,
    last_warn_us: Option<u32>,
    stats: CycleStats,
}

impl PollingSampler {
    pub fn new(period_us: u32, session_start_us: u32) -> Self {
        Self {
            period_us,
            session_start_us,
            last_cycle_us: None,
            elapsed_us: 0,
            last_warn_us: None,
            stats: CycleStats::default(),
        }
    }

    /// True once a full period has passed since the previous cycle started
    pub fn due(&self, now_us: u32) -> bool {
        match self.last_cycle_us {
            None => true,
            Some(last) => now_us.wrapping_sub(last) >= self.period_us,
        }
    }

    /// Read all included, available sensors. Sensors that fail to select or
    /// read are skipped for this cycle.
    pub fn poll_cycle<I2C: I2c>(
        &mut self,
        mux: &mut MuxController<I2C>,
        baselines: &Baselines,
        now_us: u32,
    ) -> CycleReadings {
        let previous = self.last_cycle_us.unwrap_or(self.session_start_us);
        self.elapsed_us += now_us.wrapping_sub(previous) as u64;
        self.last_cycle_us = Some(now_us);
        self.stats.cycles = self.stats.cycles.wrapping_add(1);
        let timestamp_ms = self.elapsed_ms();

        let mut readings = CycleReadings::new();
        for position in Position::all() {
            if !baselines.is_included(position) || !mux.is_sensor_available(position) {
                continue;
            }
            let value = if mux.select_sensor(position) {
                vcnl4040::read_proximity(mux.bus()).ok()
            } else {
                None
            };
            match value {
                Some(proximity) => {
                    self.stats.reads_ok = self.stats.reads_ok.wrapping_add(1);
                    let _ = readings.push(Reading::new(timestamp_ms, position, proximity));
                }
                None => self.stats.reads_failed = self.stats.reads_failed.wrapping_add(1),
            }
        }

        if readings.is_empty() {
            self.stats.consecutive_empty += 1;
            self.warn_empty(now_us);
        } else {
            self.stats.consecutive_empty = 0;
        }
        readings
    }

    fn warn_empty(&mut self, now_us: u32) {
        let n = self.stats.consecutive_empty;
        let spaced = self
            .last_warn_us
            .map_or(true, |last| now_us.wrapping_sub(last) >= WARN_INTERVAL_US);
        if n <= WARN_FIRST_FAILURES || spaced {
            log::warn!("Polling cycle produced no readings ({} in a row)", n);
            self.last_warn_us = Some(now_us);
        }
    }

    /// Session time of the latest cycle in milliseconds
    pub fn elapsed_ms(&self) -> u32 {
        (self.elapsed_us / 1000) as u32
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    pub fn period_us(&self) -> u32 {
        self.period_us
    }
}
