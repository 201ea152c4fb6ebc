/// Interrupt-driven acquisition.
///
/// Each module's two sensors share one active-low interrupt line. The line
/// handler runs in interrupt context and only records *when* a module fired:
/// it stores a timestamp and raises a pending flag. All bus I/O (reading
/// which sensor fired and clearing its flags) happens later in the
/// processing task, which turns each pending trigger into an
/// [`InterruptEvent`] on a bounded queue. When the queue is full the newest
/// event is dropped and counted.
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use serde::Serialize;

use crate::defaults;
use crate::mux::MuxController;
use crate::sensor::{ModuleId, Position, Side, NUM_MODULES};
use crate::vcnl4040;

/// What the sensor reported when its module's line fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InterruptKind {
    #[serde(rename = "close")]
    Close,
    #[serde(rename = "away")]
    Away,
    /// The line fired but neither sensor had a flag latched
    #[serde(rename = "unknown")]
    Unknown,
}

/// One processed interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptEvent {
    /// Microseconds since the session started, captured in the line handler
    pub timestamp_us: u32,
    pub module: ModuleId,
    /// Sensor whose flag was set; `None` for [`InterruptKind::Unknown`]
    pub sensor: Option<Position>,
    pub kind: InterruptKind,
    /// Raw INT_FLAG high byte, 0 for unknown events
    pub raw_flags: u8,
}

// ── Handler-side state ───────────────────────────────────────────────

struct ModuleLine {
    last_trigger_us: AtomicU32,
    pending: AtomicBool,
}

impl ModuleLine {
    const fn new() -> Self {
        Self {
            last_trigger_us: AtomicU32::new(0),
            pending: AtomicBool::new(false),
        }
    }
}

/// Cumulative per-session event counters, written by the processing task
/// and readable from anywhere.
struct EventCounters {
    total: AtomicU32,
    close: AtomicU32,
    away: AtomicU32,
    unknown: AtomicU32,
}

impl EventCounters {
    const fn new() -> Self {
        Self {
            total: AtomicU32::new(0),
            close: AtomicU32::new(0),
            away: AtomicU32::new(0),
            unknown: AtomicU32::new(0),
        }
    }

    fn record(&self, kind: InterruptKind) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let counter = match kind {
            InterruptKind::Close => &self.close,
            InterruptKind::Away => &self.away,
            InterruptKind::Unknown => &self.unknown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for c in [&self.total, &self.close, &self.away, &self.unknown] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

/// State shared between the line handlers and the processing task.
///
/// Intended to live in a `static`; every method takes `&self`.
pub struct InterruptTable {
    armed: AtomicBool,
    session_start_us: AtomicU32,
    handler_count: AtomicU32,
    lines: [ModuleLine; NUM_MODULES],
    counters: EventCounters,
}

impl InterruptTable {
    pub const fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
            session_start_us: AtomicU32::new(0),
            handler_count: AtomicU32::new(0),
            lines: [ModuleLine::new(), ModuleLine::new(), ModuleLine::new()],
            counters: EventCounters::new(),
        }
    }

    /// Clear pending triggers and counters, then start accepting triggers.
    pub fn arm(&self, session_start_us: u32) {
        for line in &self.lines {
            line.pending.store(false, Ordering::Relaxed);
        }
        self.handler_count.store(0, Ordering::Relaxed);
        self.counters.reset();
        self.session_start_us.store(session_start_us, Ordering::Relaxed);
        self.armed.store(true, Ordering::Release);
    }

    /// Stop accepting triggers. Already-pending triggers are discarded.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
        for line in &self.lines {
            line.pending.store(false, Ordering::Relaxed);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Record a trigger. Interrupt-safe: no locks, no bus, no logging.
    #[inline]
    pub fn on_trigger(&self, module: ModuleId, now_us: u32) {
        if !self.armed.load(Ordering::Acquire) {
            return;
        }
        let line = &self.lines[module.index()];
        line.last_trigger_us.store(now_us, Ordering::Relaxed);
        line.pending.store(true, Ordering::Release);
        self.handler_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_pending(&self, module: ModuleId) -> bool {
        self.lines[module.index()].pending.load(Ordering::Acquire)
    }

    /// Claim the pending trigger with the oldest timestamp.
    ///
    /// Returns the module and the trigger time relative to session start.
    /// Taking the oldest first keeps event timestamps non-decreasing when
    /// several modules fire before the task gets to run.
    pub fn take_oldest_pending(&self) -> Option<(ModuleId, u32)> {
        let start = self.session_start_us.load(Ordering::Relaxed);
        let oldest = ModuleId::ALL
            .into_iter()
            .filter(|&m| self.is_pending(m))
            .min_by_key(|&m| {
                self.lines[m.index()]
                    .last_trigger_us
                    .load(Ordering::Relaxed)
                    .wrapping_sub(start)
            })?;

        let line = &self.lines[oldest.index()];
        if !line.pending.swap(false, Ordering::AcqRel) {
            return None;
        }
        let at = line.last_trigger_us.load(Ordering::Relaxed).wrapping_sub(start);
        Some((oldest, at))
    }

    /// Line handler invocations since the session was armed
    pub fn handler_count(&self) -> u32 {
        self.handler_count.load(Ordering::Relaxed)
    }

    pub fn stats<const N: usize>(&self, queue: &EventQueue<N>) -> SessionStats {
        SessionStats {
            handler_count: self.handler_count(),
            total_events: self.counters.total.load(Ordering::Relaxed),
            close_events: self.counters.close.load(Ordering::Relaxed),
            away_events: self.counters.away.load(Ordering::Relaxed),
            unknown_events: self.counters.unknown.load(Ordering::Relaxed),
            dropped_events: queue.dropped(),
        }
    }
}

impl Default for InterruptTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point for a platform interrupt handler: `module_index` is the
/// zero-based module whose line fell, `now_us` a free-running microsecond
/// timestamp.
#[inline]
pub fn line_handler(table: &InterruptTable, module_index: usize, now_us: u32) {
    if let Some(module) = ModuleId::from_index(module_index) {
        table.on_trigger(module, now_us);
    }
}

/// Snapshot of the session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub handler_count: u32,
    pub total_events: u32,
    pub close_events: u32,
    pub away_events: u32,
    pub unknown_events: u32,
    pub dropped_events: u32,
}

// ── Event queue ──────────────────────────────────────────────────────

/// Bounded FIFO of processed events with an overflow counter.
pub struct EventQueue<const N: usize> {
    channel: Channel<CriticalSectionRawMutex, InterruptEvent, N>,
    dropped: AtomicU32,
}

/// Queue with the default depth
pub type InterruptEventQueue = EventQueue<{ defaults::EVENT_QUEUE_DEPTH }>;

impl<const N: usize> EventQueue<N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Enqueue without blocking. A full queue drops the new event.
    pub fn push(&self, event: InterruptEvent) -> bool {
        match self.channel.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn has_events(&self) -> bool {
        !self.channel.is_empty()
    }

    pub fn try_next_event(&self) -> Option<InterruptEvent> {
        self.channel.try_receive().ok()
    }

    /// Wait up to `timeout_ms` for an event, checking once per millisecond.
    pub fn get_next_event<D: DelayNs>(&self, timeout_ms: u32, delay: &mut D) -> Option<InterruptEvent> {
        let mut waited = 0;
        loop {
            if let Some(event) = self.try_next_event() {
                return Some(event);
            }
            if waited >= timeout_ms {
                return None;
            }
            delay.delay_ms(1);
            waited += 1;
        }
    }

    pub fn event_count(&self) -> usize {
        self.channel.len()
    }

    pub fn clear_events(&self) {
        self.channel.clear();
    }

    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn reset_dropped(&self) {
        self.dropped.store(0, Ordering::Relaxed);
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for EventQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Processing task ──────────────────────────────────────────────────

/// Turns pending triggers into events. Owned by the acquisition worker,
/// which is the only context doing bus I/O.
pub struct InterruptMonitor<'a, const N: usize> {
    table: &'a InterruptTable,
    queue: &'a EventQueue<N>,
    settle_us: u32,
}

impl<'a, const N: usize> InterruptMonitor<'a, N> {
    pub fn new(table: &'a InterruptTable, queue: &'a EventQueue<N>) -> Self {
        Self {
            table,
            queue,
            settle_us: defaults::CHANNEL_SETTLE_US,
        }
    }

    pub fn table(&self) -> &'a InterruptTable {
        self.table
    }

    pub fn queue(&self) -> &'a EventQueue<N> {
        self.queue
    }

    /// Handle the oldest pending trigger, if any. Returns the event that was
    /// produced (whether or not the queue had room for it).
    pub fn process_pending<I2C: I2c, D: DelayNs>(
        &mut self,
        mux: &mut MuxController<I2C>,
        delay: &mut D,
    ) -> Option<InterruptEvent> {
        let (module, timestamp_us) = self.table.take_oldest_pending()?;
        let event = self.resolve(mux, delay, module, timestamp_us);
        self.table.counters.record(event.kind);
        if !self.queue.push(event) {
            log::debug!("Event queue full, dropped module {} event", module.get());
        }
        Some(event)
    }

    /// Check side A then side B for a latched flag. Reading the flags clears
    /// them, which releases the shared line.
    fn resolve<I2C: I2c, D: DelayNs>(
        &self,
        mux: &mut MuxController<I2C>,
        delay: &mut D,
        module: ModuleId,
        timestamp_us: u32,
    ) -> InterruptEvent {
        for side in Side::BOTH {
            let position = module.position(side);
            if !mux.select_sensor(position) {
                continue;
            }
            delay.delay_us(self.settle_us);
            match vcnl4040::read_interrupt_flags(mux.bus()) {
                Ok(flags) if flags.any_proximity() => {
                    mux.disable_current_inner();
                    let kind = if flags.is_close() {
                        InterruptKind::Close
                    } else {
                        InterruptKind::Away
                    };
                    return InterruptEvent {
                        timestamp_us,
                        module,
                        sensor: Some(position),
                        kind,
                        raw_flags: flags.raw(),
                    };
                }
                Ok(_) => {}
                Err(e) => log::debug!("{}: flag read failed: {}", position.name(), e),
            }
        }
        mux.disable_current_inner();
        InterruptEvent {
            timestamp_us,
            module,
            sensor: None,
            kind: InterruptKind::Unknown,
            raw_flags: 0,
        }
    }
}
