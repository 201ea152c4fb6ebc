/// Acquisition session lifecycle.
///
/// A [`Rig`] is the idle hardware: the multiplexer, the configuration and
/// the current baselines. Starting a session consumes the rig and returns an
/// [`Acquisition`], which owns the bus for as long as the session runs and is
/// the only context doing bus I/O. Stopping hands the rig back.
///
/// [`SessionControl`] is the small piece of shared state that other contexts
/// use to query the session, request a stop and wait for the worker to
/// finish. At most one session is active per control.
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use serde::{Deserialize, Serialize};

use crate::calibration::{self, Baselines, CalibrationReport};
use crate::config::EngineConfig;
use crate::defaults;
use crate::detector::DirectionDetector;
use crate::error::SessionError;
use crate::interrupt::{EventQueue, InterruptEvent, InterruptMonitor, InterruptTable, SessionStats};
use crate::matcher::Detection;
use crate::mux::MuxController;
use crate::polling::{Clock, PollingSampler};
use crate::sensor::Position;
use crate::vcnl4040;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "polling")]
    Polling,
    #[serde(rename = "interrupt")]
    Interrupt,
}

impl StrategyKind {
    const fn code(self) -> u8 {
        match self {
            StrategyKind::Polling => 1,
            StrategyKind::Interrupt => 2,
        }
    }

    const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(StrategyKind::Polling),
            2 => Some(StrategyKind::Interrupt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Polling => "polling",
            StrategyKind::Interrupt => "interrupt",
        }
    }
}

// ── Shared control ───────────────────────────────────────────────────

/// Session flags shared between the worker and everyone else.
pub struct SessionControl {
    active: AtomicBool,
    worker_running: AtomicBool,
    strategy: AtomicU8,
}

impl SessionControl {
    pub const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            worker_running: AtomicBool::new(false),
            strategy: AtomicU8::new(0),
        }
    }

    /// Claim the session. Fails without side effects if one is active.
    pub fn try_activate(&self, kind: StrategyKind) -> Result<(), SessionError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("Start rejected: acquisition already active");
            return Err(SessionError::AlreadyActive);
        }
        self.strategy.store(kind.code(), Ordering::Relaxed);
        self.worker_running.store(true, Ordering::Release);
        Ok(())
    }

    /// Release a claim that never got a worker
    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.worker_exited();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Strategy of the active session
    pub fn strategy(&self) -> Option<StrategyKind> {
        if self.is_active() {
            StrategyKind::from_code(self.strategy.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    /// Ask the worker to exit. Returns whether a session was active.
    pub fn request_stop(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    /// Called by the worker once its cleanup is done
    pub fn worker_exited(&self) {
        self.strategy.store(0, Ordering::Relaxed);
        self.worker_running.store(false, Ordering::Release);
    }

    pub fn is_worker_running(&self) -> bool {
        self.worker_running.load(Ordering::Acquire)
    }

    /// Wait for the worker to confirm exit, polling every 10 ms for at most
    /// `timeout_ms`. Returns false on timeout.
    pub fn wait_for_exit<D: DelayNs>(&self, delay: &mut D, timeout_ms: u32) -> bool {
        let mut waited = 0;
        while self.is_worker_running() {
            if waited >= timeout_ms {
                log::warn!("Acquisition worker did not exit within {} ms", timeout_ms);
                return false;
            }
            delay.delay_ms(defaults::STOP_POLL_INTERVAL_MS);
            waited += defaults::STOP_POLL_INTERVAL_MS;
        }
        true
    }

    /// Request a stop and wait (bounded) for the worker. Stopping an idle
    /// session is a no-op that returns true.
    pub fn stop<D: DelayNs>(&self, delay: &mut D) -> bool {
        if !self.request_stop() && !self.is_worker_running() {
            return true;
        }
        self.wait_for_exit(delay, defaults::STOP_TIMEOUT_MS)
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

/// The shared objects a session runs against, usually statics.
pub struct SessionContext<'a, const N: usize> {
    pub control: &'a SessionControl,
    pub table: &'a InterruptTable,
    pub queue: &'a EventQueue<N>,
}

impl<const N: usize> Clone for SessionContext<'_, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<const N: usize> Copy for SessionContext<'_, N> {}

impl<const N: usize> SessionContext<'_, N> {
    pub fn stats(&self) -> SessionStats {
        self.table.stats(self.queue)
    }
}

// ── Idle rig ─────────────────────────────────────────────────────────

pub struct Rig<I2C> {
    mux: MuxController<I2C>,
    config: EngineConfig,
    baselines: Baselines,
    report: Option<CalibrationReport>,
}

impl<I2C: I2c> Rig<I2C> {
    /// `mux` should already have run discovery
    pub fn new(mux: MuxController<I2C>, config: EngineConfig) -> Self {
        Self {
            mux,
            config,
            baselines: Baselines::new(),
            report: None,
        }
    }

    pub fn baselines(&self) -> &Baselines {
        &self.baselines
    }

    pub fn baseline(&self, position: Position) -> u16 {
        self.baselines.get(position)
    }

    pub fn mux(&self) -> &MuxController<I2C> {
        &self.mux
    }

    /// Recalibrate all sensors. Rejected while a session is active.
    pub fn calibrate<D: DelayNs>(
        &mut self,
        control: &SessionControl,
        delay: &mut D,
    ) -> Result<&CalibrationReport, SessionError> {
        if control.is_active() {
            return Err(SessionError::Busy);
        }
        Ok(self.run_calibration(delay))
    }

    fn run_calibration<D: DelayNs>(&mut self, delay: &mut D) -> &CalibrationReport {
        self.baselines = Baselines::new();
        self.configure_sensors(false);
        delay.delay_ms(defaults::CALIBRATION_SETTLE_MS);
        let (baselines, report) = calibration::calibrate(&mut self.mux, delay, &self.config.acquisition);
        self.baselines = baselines;
        self.report.insert(report)
    }

    /// Program every available, included sensor. With `arm_interrupts`,
    /// thresholds derived from the baselines are written and close/away
    /// interrupts enabled. Returns the number of sensors configured.
    fn configure_sensors(&mut self, arm_interrupts: bool) -> usize {
        let acq = self.config.acquisition;
        let mut configured = 0;
        for position in Position::all() {
            if !self.mux.is_sensor_available(position) || !self.baselines.is_included(position) {
                continue;
            }
            if !self.mux.select_sensor(position) {
                log::warn!("{}: select failed during configuration", position.name());
                continue;
            }
            let thresholds = arm_interrupts.then(|| self.baselines.thresholds(position, &acq));
            match vcnl4040::configure(self.mux.bus(), &acq, thresholds) {
                Ok(()) => {
                    if let Some(t) = thresholds {
                        log::debug!("{}: thresholds {}/{}", position.name(), t.high, t.low);
                    }
                    configured += 1;
                }
                Err(e) => log::warn!("{}: configuration failed: {}", position.name(), e),
            }
        }
        self.mux.disable_all();
        configured
    }

    /// Start a session. On failure the rig is handed back with the reason.
    pub fn start<'a, C: Clock, D: DelayNs, const N: usize>(
        mut self,
        ctx: SessionContext<'a, N>,
        kind: StrategyKind,
        clock: C,
        mut delay: D,
    ) -> Result<Acquisition<'a, I2C, C, D, N>, (Self, SessionError)> {
        if let Err(e) = ctx.control.try_activate(kind) {
            return Err((self, e));
        }

        if self.config.acquisition.auto_calibrate {
            self.run_calibration(&mut delay);
        }

        let configured = self.configure_sensors(kind == StrategyKind::Interrupt);
        if configured == 0 {
            log::warn!("Start aborted: no sensors could be configured");
            ctx.control.deactivate();
            return Err((self, SessionError::NoSensors));
        }

        let start_us = clock.now_us();
        let strategy = match kind {
            StrategyKind::Polling => Strategy::Polling {
                sampler: PollingSampler::new(self.config.acquisition.poll_period_us, start_us),
                detector: DirectionDetector::new(&self.config.wave, &self.config.matcher),
            },
            StrategyKind::Interrupt => {
                ctx.queue.clear_events();
                ctx.queue.reset_dropped();
                ctx.table.arm(start_us);
                Strategy::Interrupt(InterruptMonitor::new(ctx.table, ctx.queue))
            }
        };

        log::info!("Acquisition started: {} mode, {} sensors", kind.as_str(), configured);
        Ok(Acquisition {
            rig: self,
            ctx,
            clock,
            delay,
            strategy,
        })
    }
}

// ── Active session ───────────────────────────────────────────────────

pub enum Strategy<'a, const N: usize> {
    Polling {
        sampler: PollingSampler,
        detector: DirectionDetector,
    },
    Interrupt(InterruptMonitor<'a, N>),
}

/// Result of one [`Acquisition::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// Nothing to do yet
    Idle,
    /// A polling cycle ran
    Cycle {
        readings: usize,
        detection: Option<Detection>,
    },
    /// A pending interrupt was processed
    Event(InterruptEvent),
}

pub struct Acquisition<'a, I2C, C, D, const N: usize> {
    rig: Rig<I2C>,
    ctx: SessionContext<'a, N>,
    clock: C,
    delay: D,
    strategy: Strategy<'a, N>,
}

impl<'a, I2C: I2c, C: Clock, D: DelayNs, const N: usize> Acquisition<'a, I2C, C, D, N> {
    pub fn kind(&self) -> StrategyKind {
        match self.strategy {
            Strategy::Polling { .. } => StrategyKind::Polling,
            Strategy::Interrupt(_) => StrategyKind::Interrupt,
        }
    }

    pub fn rig(&self) -> &Rig<I2C> {
        &self.rig
    }

    pub fn strategy(&self) -> &Strategy<'a, N> {
        &self.strategy
    }

    /// Do one unit of work: a polling cycle when one is due, or one pending
    /// interrupt.
    pub fn step(&mut self) -> StepOutcome {
        match &mut self.strategy {
            Strategy::Polling { sampler, detector } => {
                let now = self.clock.now_us();
                if !sampler.due(now) {
                    return StepOutcome::Idle;
                }
                let readings = sampler.poll_cycle(&mut self.rig.mux, &self.rig.baselines, now);
                let mut detection = None;
                for reading in &readings {
                    if let Some(d) = detector.push_reading(reading) {
                        detection = Some(d);
                    }
                }
                // Every reading of the cycle shares one timestamp
                if let Some(d) = detector.flush() {
                    detection = Some(d);
                }
                // Time still runs for open waves when the whole cycle failed
                if readings.is_empty() {
                    detection = detector.tick(sampler.elapsed_ms());
                }
                StepOutcome::Cycle {
                    readings: readings.len(),
                    detection,
                }
            }
            Strategy::Interrupt(monitor) => match monitor.process_pending(&mut self.rig.mux, &mut self.delay) {
                Some(event) => StepOutcome::Event(event),
                None => StepOutcome::Idle,
            },
        }
    }

    /// Worker loop: step until a stop is requested, then clean up and hand
    /// the rig back. `yield_now` runs whenever there was nothing to do.
    pub fn run(mut self, mut on_outcome: impl FnMut(&StepOutcome), mut yield_now: impl FnMut()) -> Rig<I2C> {
        while self.ctx.control.is_active() {
            match self.step() {
                StepOutcome::Idle => yield_now(),
                outcome => on_outcome(&outcome),
            }
        }
        self.shutdown()
    }

    /// Stop from the owning context without a separate worker.
    pub fn into_rig(self) -> Rig<I2C> {
        self.ctx.control.request_stop();
        self.shutdown()
    }

    fn shutdown(mut self) -> Rig<I2C> {
        let interrupt_mode = matches!(self.strategy, Strategy::Interrupt(_));
        if interrupt_mode {
            self.ctx.table.disarm();
        }

        let mux = &mut self.rig.mux;
        for position in Position::all() {
            if !mux.is_sensor_available(position) || !mux.select_sensor(position) {
                continue;
            }
            if let Err(e) = vcnl4040::disable_interrupts(mux.bus()) {
                log::debug!("{}: interrupt disable failed: {}", position.name(), e);
            }
        }
        mux.disable_all();

        if interrupt_mode {
            let s = self.ctx.stats();
            log::info!(
                "Acquisition stopped: {} handler calls, {} events ({} close, {} away, {} unknown), {} dropped",
                s.handler_count,
                s.total_events,
                s.close_events,
                s.away_events,
                s.unknown_events,
                s.dropped_events
            );
        } else if let Strategy::Polling { sampler, detector } = &self.strategy {
            let s = sampler.stats();
            log::info!(
                "Acquisition stopped: {} cycles, {} reads ({} failed), {} detections",
                s.cycles,
                s.reads_ok,
                s.reads_failed,
                detector.diagnostics().detections
            );
        }

        self.ctx.control.worker_exited();
        self.rig
    }
}
