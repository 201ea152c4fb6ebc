/// JSON message protocol between the hoop and a host.
///
/// All messages are newline-delimited JSON (NDJSON).
/// Uses `heapless` types for no_std/no-alloc operation.
use heapless::Vec;
use serde::{Deserialize, Serialize, Serializer};

use crate::interrupt::{InterruptEvent, InterruptKind, SessionStats};
use crate::matcher::{Detection, Direction};
use crate::sensor::{ModuleId, Position};
use crate::session::StrategyKind;

/// Sensor that fired an interrupt, or `"unresolved"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorLabel(pub Option<Position>);

impl Serialize for SensorLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(position) => serializer.serialize_str(&position.name()),
            None => serializer.serialize_str("unresolved"),
        }
    }
}

/// Messages sent from the device to the host
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DeviceMessage<'a> {
    /// A confirmed transit
    #[serde(rename = "detection")]
    Detection {
        dir: Direction,
        conf: f32,
        /// Center-of-mass gap in ms
        gap: f32,
        com_a: f32,
        com_b: f32,
        peak_a: f32,
        peak_b: f32,
        /// Session time in ms
        ts: u32,
    },
    /// A processed interrupt
    #[serde(rename = "interrupt")]
    Interrupt {
        /// Session time in µs
        ts: u32,
        module: ModuleId,
        sensor: SensorLabel,
        kind: InterruptKind,
        flags: u8,
    },
    /// Result of a calibration run
    #[serde(rename = "calibration")]
    Calibration {
        /// Per-position baselines, 0 for excluded sensors
        baselines: &'a [u16],
        calibrated: u8,
    },
    /// Device status report
    #[serde(rename = "status")]
    Status {
        monitoring: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        strategy: Option<StrategyKind>,
        /// Sensors found during discovery
        sensors: u8,
        /// Interrupt handler invocations
        isr: u32,
        close: u32,
        away: u32,
        unknown: u32,
        dropped: u32,
        /// Uptime in seconds
        uptime: u32,
        /// Board identifier
        board: &'static str,
        /// Firmware version
        version: &'static str,
    },
    /// A host command could not be carried out
    #[serde(rename = "error")]
    Error {
        cmd: &'static str,
        error: &'static str,
    },
}

impl DeviceMessage<'_> {
    pub fn detection(d: &Detection) -> DeviceMessage<'static> {
        DeviceMessage::Detection {
            dir: d.direction,
            conf: d.confidence,
            gap: d.com_gap_ms,
            com_a: d.com_a_ms,
            com_b: d.com_b_ms,
            peak_a: d.peak_a,
            peak_b: d.peak_b,
            ts: d.timestamp_ms,
        }
    }

    pub fn interrupt(event: &InterruptEvent) -> DeviceMessage<'static> {
        DeviceMessage::Interrupt {
            ts: event.timestamp_us,
            module: event.module,
            sensor: SensorLabel(event.sensor),
            kind: event.kind,
            flags: event.raw_flags,
        }
    }

    /// Status from the active strategy (`None` when idle) and the session
    /// counters.
    pub fn status(
        strategy: Option<StrategyKind>,
        stats: &SessionStats,
        sensors: usize,
        uptime_s: u32,
    ) -> DeviceMessage<'static> {
        DeviceMessage::Status {
            monitoring: strategy.is_some(),
            strategy,
            sensors: sensors as u8,
            isr: stats.handler_count,
            close: stats.close_events,
            away: stats.away_events,
            unknown: stats.unknown_events,
            dropped: stats.dropped_events,
            uptime: uptime_s,
            board: crate::board::BOARD_NAME,
            version: VERSION,
        }
    }
}

/// Commands sent from the host to the device.
///
/// Deserialized manually via [`RawCommand`] in `comm::parse_command()` because
/// `serde_json_core` does not support internally tagged enums (`deserialize_any`).
#[derive(Debug, PartialEq)]
pub enum HostCommand {
    /// Start an acquisition session
    Start { strategy: StrategyKind },
    /// Stop the running session
    Stop,
    /// Recalibrate all sensors
    Calibrate,
    /// Request current status
    GetStatus,
}

impl HostCommand {
    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            HostCommand::Start { .. } => "start",
            HostCommand::Stop => "stop",
            HostCommand::Calibrate => "calibrate",
            HostCommand::GetStatus => "status",
        }
    }
}

/// Wire format for host commands, a flat struct that `serde_json_core` can
/// deserialize without `deserialize_any`. Converted to [`HostCommand`] in
/// `comm::parse_command()`.
#[derive(Deserialize)]
pub(crate) struct RawCommand {
    pub cmd: heapless::String<16>,
    #[serde(default)]
    pub strategy: Option<StrategyKind>,
}

/// Strategy used when a start command does not name one
pub const DEFAULT_STRATEGY: StrategyKind = StrategyKind::Polling;

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 256;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;
