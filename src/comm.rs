/// Host communication: NDJSON serialization, command parsing and dispatch.
///
/// The device streams detections, interrupt events and status as
/// newline-delimited JSON. Commands arrive the same way, one JSON object per
/// line, accumulated byte by byte with a [`LineReader`].
use embedded_hal::delay::DelayNs;

use crate::error::SessionError;
use crate::protocol::{DeviceMessage, HostCommand, MsgBuffer, RawCommand, DEFAULT_STRATEGY, MAX_MSG_LEN};
use crate::session::{SessionControl, StrategyKind};

// ── Serialization helpers ──────────────────────────────────────────────

/// Serialize a DeviceMessage to one NDJSON line in the output buffer.
/// Returns the number of bytes written including the newline, or None if
/// the line does not fit.
pub fn serialize_message(msg: &DeviceMessage, buf: &mut [u8]) -> Option<usize> {
    // Keep the last byte for the newline
    let body_len = buf.len().checked_sub(1)?;
    let len = serde_json_core::to_slice(msg, &mut buf[..body_len]).ok()?;
    buf[len] = b'\n';
    Some(len + 1)
}

/// Serialize into an owned buffer ready to hand to an output channel.
pub fn encode(msg: &DeviceMessage) -> Option<MsgBuffer> {
    let mut buf = MsgBuffer::new();
    buf.resize_default(MAX_MSG_LEN).ok();
    let len = serialize_message(msg, &mut buf)?;
    buf.truncate(len);
    Some(buf)
}

/// Deserialize a HostCommand from a JSON byte slice.
pub fn parse_command(data: &[u8]) -> Option<HostCommand> {
    // Strip trailing newline/whitespace
    let trimmed = trim_trailing_whitespace(data);
    if trimmed.is_empty() {
        return None;
    }
    let (raw, _) = serde_json_core::from_slice::<RawCommand>(trimmed).ok()?;
    match raw.cmd.as_str() {
        "start" => Some(HostCommand::Start {
            strategy: raw.strategy.unwrap_or(DEFAULT_STRATEGY),
        }),
        "stop" => Some(HostCommand::Stop),
        "calibrate" => Some(HostCommand::Calibrate),
        "status" => Some(HostCommand::GetStatus),
        other => {
            log::debug!("Unknown host command '{}'", other);
            None
        }
    }
}

/// What the caller must do after [`handle_command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Start a session with this strategy
    Launch(StrategyKind),
    /// The session was stopped; `confirmed` is false if the worker did not
    /// exit in time
    Stopped { confirmed: bool },
    /// Run a calibration and report it
    Calibrate,
    /// Send a status report
    ReportStatus,
    /// The command was refused in the current state
    Rejected(SessionError),
}

impl CommandOutcome {
    /// Error message for a rejected command, if any
    pub fn error_message(&self, cmd: &HostCommand) -> Option<DeviceMessage<'static>> {
        match self {
            CommandOutcome::Rejected(e) => Some(DeviceMessage::Error {
                cmd: cmd.name(),
                error: e.code(),
            }),
            _ => None,
        }
    }
}

/// Check a received host command against the session state. Stop is carried
/// out here (bounded wait on the worker); the rest is returned to the caller,
/// which owns the hardware.
pub fn handle_command<D: DelayNs>(cmd: &HostCommand, control: &SessionControl, delay: &mut D) -> CommandOutcome {
    match cmd {
        HostCommand::Start { strategy } => {
            if control.is_active() {
                log::warn!("Start ignored: {} session already running", strategy.as_str());
                CommandOutcome::Rejected(SessionError::AlreadyActive)
            } else {
                CommandOutcome::Launch(*strategy)
            }
        }
        HostCommand::Stop => {
            let confirmed = control.stop(delay);
            log::info!("Acquisition stopped by host command");
            CommandOutcome::Stopped { confirmed }
        }
        HostCommand::Calibrate => {
            if control.is_active() {
                CommandOutcome::Rejected(SessionError::Busy)
            } else {
                CommandOutcome::Calibrate
            }
        }
        HostCommand::GetStatus => CommandOutcome::ReportStatus,
    }
}

// ── Serial NDJSON reader ───────────────────────────────────────────────

/// Serial NDJSON reader state machine.
/// Accumulates bytes until a newline is found, then yields the line.
pub struct LineReader {
    buf: [u8; MAX_MSG_LEN],
    pos: usize,
}

impl LineReader {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_MSG_LEN],
            pos: 0,
        }
    }

    /// Feed a byte into the reader. Returns a complete line (without newline)
    /// when one is detected.
    pub fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        if byte == b'\n' || byte == b'\r' {
            if self.pos > 0 {
                let line = &self.buf[..self.pos];
                self.pos = 0;
                Some(line)
            } else {
                None
            }
        } else if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
            self.pos += 1;
            None
        } else {
            // Overflow: discard and reset
            self.pos = 0;
            None
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_trailing_whitespace(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    while end > 0 && matches!(data[end - 1], b' ' | b'\n' | b'\r' | b'\t') {
        end -= 1;
    }
    &data[..end]
}
