//! motionplay: ESP-IDF std firmware
//!
//! Thread-based runtime around the motionplay library. The acquisition
//! worker owns the I²C bus while a session runs; the main thread owns it
//! otherwise and serves NDJSON host commands read from the console.

use std::io::Read;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use motionplay::{board, comm, config, defaults, detector, interrupt, mux, protocol, session};

use comm::{CommandOutcome, LineReader};
use config::EngineConfig;
use detector::DetectionChannel;
use esp_idf_svc::hal::delay::Delay;
use esp_idf_svc::hal::gpio::{AnyIOPin, IOPin, Input, InterruptType, PinDriver, Pull};
use esp_idf_svc::hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::sys::esp_timer_get_time;
use interrupt::{InterruptEventQueue, InterruptTable};
use mux::MuxController;
use protocol::{DeviceMessage, MsgBuffer, DEFAULT_STRATEGY, VERSION};
use session::{Rig, SessionContext, SessionControl, StepOutcome, StrategyKind};

// ── Shared state ─────────────────────────────────────────────────────

static TABLE: InterruptTable = InterruptTable::new();
static EVENTS: InterruptEventQueue = InterruptEventQueue::new();
static DETECTIONS: DetectionChannel = DetectionChannel::new();
static CONTROL: SessionControl = SessionControl::new();
static SENSOR_COUNT: AtomicU8 = AtomicU8::new(0);

/// Boot time, captured once in main, used for uptime calculation.
static BOOT_INSTANT: Mutex<Option<Instant>> = Mutex::new(None);

fn uptime_secs() -> u32 {
    BOOT_INSTANT
        .lock()
        .ok()
        .and_then(|i| i.map(|boot| boot.elapsed().as_secs() as u32))
        .unwrap_or(0)
}

fn session_context() -> SessionContext<'static, { defaults::EVENT_QUEUE_DEPTH }> {
    SessionContext {
        control: &CONTROL,
        table: &TABLE,
        queue: &EVENTS,
    }
}

/// Microsecond timer, safe to read from interrupt context. Wraps after
/// about 71 minutes; the polling sampler accumulates deltas across the wrap.
fn now_us() -> u32 {
    unsafe { esp_timer_get_time() as u32 }
}

#[derive(Clone, Copy)]
struct EspClock;

impl motionplay::polling::Clock for EspClock {
    fn now_us(&self) -> u32 {
        now_us()
    }
}

type Bus = I2cDriver<'static>;
type Line = PinDriver<'static, AnyIOPin, Input>;
type Lines = [Line; 3];

/// Who holds the bus right now
enum Station {
    Idle(Rig<Bus>, Lines),
    Running(JoinHandle<(Rig<Bus>, Lines)>),
    /// Transient while ownership moves between states
    Empty,
}

fn main() -> anyhow::Result<()> {
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();

    // Record boot time
    if let Ok(mut boot) = BOOT_INSTANT.lock() {
        *boot = Some(Instant::now());
    }

    log::info!("motionplay v{} starting on {} (std)", VERSION, board::BOARD_NAME);

    // ── Peripherals ──────────────────────────────────────────────────

    let peripherals = Peripherals::take()?;

    let i2c_config = I2cConfig::new().baudrate(Hertz(board::I2C_FREQ_HZ));
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio43,
        peripherals.pins.gpio44,
        &i2c_config,
    )?;
    log::info!(
        "I2C on SDA={} SCL={} at {} Hz",
        board::I2C_SDA_PIN,
        board::I2C_SCL_PIN,
        board::I2C_FREQ_HZ
    );

    let mut mux = MuxController::new(i2c);
    let found = mux.discover();
    SENSOR_COUNT.store(found as u8, Ordering::Relaxed);
    if found == 0 {
        log::warn!("No sensors found; waiting for commands anyway");
    }

    let lines = [
        interrupt_line(peripherals.pins.gpio13.downgrade(), 0)?,
        interrupt_line(peripherals.pins.gpio12.downgrade(), 1)?,
        interrupt_line(peripherals.pins.gpio11.downgrade(), 2)?,
    ];
    log::info!("Interrupt lines on GPIO {:?}", board::INT_PINS);

    let config = EngineConfig::new();
    if let Err(e) = config.validate() {
        anyhow::bail!("default configuration rejected: {e}");
    }

    // ── Channels ─────────────────────────────────────────────────────

    let (output_tx, output_rx) = mpsc::sync_channel::<MsgBuffer>(8);

    // ── Output thread ────────────────────────────────────────────────

    thread::Builder::new()
        .name("output".into())
        .stack_size(4096)
        .spawn(move || {
            output_thread(output_rx);
        })?;
    log::info!("Output thread spawned");

    // ── Relay thread ─────────────────────────────────────────────────

    let relay_output_tx = output_tx.clone();
    thread::Builder::new()
        .name("relay".into())
        .stack_size(4096)
        .spawn(move || {
            relay_thread(relay_output_tx);
        })?;
    log::info!("Relay thread spawned");

    // ── Status thread ────────────────────────────────────────────────

    let status_output_tx = output_tx.clone();
    thread::Builder::new()
        .name("status".into())
        .stack_size(4096)
        .spawn(move || {
            status_thread(status_output_tx);
        })?;
    log::info!("Status thread spawned");

    // ── Command loop (main thread) ───────────────────────────────────

    let mut station = Station::Idle(Rig::new(mux, config), lines);
    station = launch(station, DEFAULT_STRATEGY, &output_tx);
    command_loop(station, output_tx)
}

fn interrupt_line(pin: AnyIOPin, module_index: usize) -> anyhow::Result<Line> {
    let mut line = PinDriver::input(pin)?;
    line.set_pull(Pull::Up)?;
    line.set_interrupt_type(InterruptType::NegEdge)?;
    // Safety: the handler only touches atomics in a static table
    unsafe {
        line.subscribe(move || interrupt::line_handler(&TABLE, module_index, now_us()))?;
    }
    Ok(line)
}

fn send(output_tx: &SyncSender<MsgBuffer>, msg: &DeviceMessage) {
    if let Some(buf) = comm::encode(msg) {
        let _ = output_tx.try_send(buf);
    }
}

// ── Acquisition worker ───────────────────────────────────────────────

fn launch(station: Station, kind: StrategyKind, output_tx: &SyncSender<MsgBuffer>) -> Station {
    let (rig, mut lines) = match station {
        Station::Idle(rig, lines) => (rig, lines),
        other => return other,
    };

    let acquisition = match rig.start(session_context(), kind, EspClock, Delay::new_default()) {
        Ok(acquisition) => acquisition,
        Err((rig, e)) => {
            log::warn!("Start failed: {}", e);
            send(
                output_tx,
                &DeviceMessage::Error {
                    cmd: "start",
                    error: e.code(),
                },
            );
            return Station::Idle(rig, lines);
        }
    };

    if kind == StrategyKind::Interrupt {
        for line in lines.iter_mut() {
            if let Err(e) = line.enable_interrupt() {
                log::warn!("Interrupt line enable failed: {}", e);
            }
        }
    }

    let spawned = thread::Builder::new()
        .name("acquire".into())
        .stack_size(8192)
        .spawn(move || {
            let rig = acquisition.run(
                |outcome| match outcome {
                    StepOutcome::Cycle {
                        detection: Some(d), ..
                    } => {
                        detector::publish(&DETECTIONS, *d);
                    }
                    // ESP-IDF disables a GPIO interrupt after it fires
                    StepOutcome::Event(event) => {
                        let _ = lines[event.module.index()].enable_interrupt();
                    }
                    _ => {}
                },
                thread::yield_now,
            );
            for line in lines.iter_mut() {
                let _ = line.disable_interrupt();
            }
            (rig, lines)
        });

    match spawned {
        Ok(handle) => Station::Running(handle),
        Err(e) => {
            // The acquisition was moved into the failed closure and dropped
            // with it; the bus is gone until reboot.
            log::error!("Acquisition thread spawn failed: {}", e);
            TABLE.disarm();
            CONTROL.request_stop();
            CONTROL.worker_exited();
            Station::Empty
        }
    }
}

/// Take the rig back from a worker that has exited. Once the worker has
/// confirmed its exit only the line teardown remains, so the join is short.
fn reap(station: Station) -> Station {
    match station {
        Station::Running(handle) if handle.is_finished() || !CONTROL.is_worker_running() => match handle.join() {
            Ok((rig, lines)) => Station::Idle(rig, lines),
            Err(_) => {
                log::error!("Acquisition thread panicked");
                Station::Empty
            }
        },
        other => other,
    }
}

// ── Command loop ─────────────────────────────────────────────────────

fn command_loop(mut station: Station, output_tx: SyncSender<MsgBuffer>) -> ! {
    let mut reader = LineReader::new();
    let mut delay = Delay::new_default();
    let mut stdin = std::io::stdin();
    let mut byte = [0u8; 1];

    loop {
        station = reap(station);

        match stdin.read(&mut byte) {
            Ok(1) => {}
            _ => {
                thread::sleep(Duration::from_millis(10));
                continue;
            }
        }
        let Some(cmd) = reader.feed(byte[0]).and_then(comm::parse_command) else {
            continue;
        };
        log::debug!("Host command '{}'", cmd.name());

        let outcome = comm::handle_command(&cmd, &CONTROL, &mut delay);
        if let Some(msg) = outcome.error_message(&cmd) {
            send(&output_tx, &msg);
            continue;
        }
        station = reap(station);
        station = match outcome {
            CommandOutcome::Launch(kind) => launch(station, kind, &output_tx),
            CommandOutcome::Stopped { confirmed } => {
                if !confirmed {
                    log::warn!("Worker still running; bus stays with it");
                }
                station
            }
            CommandOutcome::Calibrate => calibrate(station, &mut delay, &output_tx),
            CommandOutcome::ReportStatus => {
                report_status(&output_tx);
                station
            }
            CommandOutcome::Rejected(_) => station,
        };
    }
}

fn calibrate(station: Station, delay: &mut Delay, output_tx: &SyncSender<MsgBuffer>) -> Station {
    let (mut rig, lines) = match station {
        Station::Idle(rig, lines) => (rig, lines),
        other => {
            log::warn!("Calibration skipped: bus not available");
            return other;
        }
    };
    match rig.calibrate(&CONTROL, delay) {
        Ok(report) => {
            let calibrated = report.calibrated_count() as u8;
            let baselines = rig.baselines().values();
            send(
                output_tx,
                &DeviceMessage::Calibration {
                    baselines: &baselines,
                    calibrated,
                },
            );
        }
        Err(e) => send(
            output_tx,
            &DeviceMessage::Error {
                cmd: "calibrate",
                error: e.code(),
            },
        ),
    }
    Station::Idle(rig, lines)
}

fn report_status(output_tx: &SyncSender<MsgBuffer>) {
    let stats = session_context().stats();
    let msg = DeviceMessage::status(
        CONTROL.strategy(),
        &stats,
        SENSOR_COUNT.load(Ordering::Relaxed) as usize,
        uptime_secs(),
    );
    send(output_tx, &msg);
}

// ── Relay thread ─────────────────────────────────────────────────────

/// Moves interrupt events and detections from the library queues to the
/// output channel.
fn relay_thread(output_tx: SyncSender<MsgBuffer>) {
    log::info!("Relay thread started");
    let mut delay = Delay::new_default();

    loop {
        if let Some(event) = EVENTS.get_next_event(10, &mut delay) {
            send(&output_tx, &DeviceMessage::interrupt(&event));
        }
        while let Ok(detection) = DETECTIONS.try_receive() {
            send(&output_tx, &DeviceMessage::detection(&detection));
        }
    }
}

// ── Output thread ────────────────────────────────────────────────────

fn output_thread(output_rx: mpsc::Receiver<MsgBuffer>) {
    log::info!("Output thread started");

    while let Ok(msg) = output_rx.recv() {
        if let Ok(s) = std::str::from_utf8(&msg) {
            log::info!("{}", s.trim_end());
        }
    }
}

// ── Status thread ────────────────────────────────────────────────────

fn status_thread(output_tx: SyncSender<MsgBuffer>) {
    loop {
        thread::sleep(Duration::from_secs(30));
        report_status(&output_tx);
    }
}
