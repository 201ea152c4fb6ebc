/// Error types for configuration, sensor I/O and session control.
///
/// Bus-level operations that only need a yes/no answer (channel selection,
/// queue pushes) return `bool` instead; these enums cover the failures a
/// caller can act on.
use embedded_hal::i2c::ErrorKind;
use thiserror::Error;

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The JSON document was malformed or a required field was missing
    #[error("config parse failed: {0}")]
    Parse(serde_json_core::de::Error),

    /// A field parsed but is outside its allowed range
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl ConfigError {
    pub(crate) const fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::Invalid { field, reason }
    }
}

/// Proximity sensor register access failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("bus transaction failed: {0}")]
    Bus(ErrorKind),

    #[error("unexpected device id {0:#06x}")]
    WrongDevice(u16),
}

/// Acquisition session lifecycle failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A session is already running; starting twice is rejected
    #[error("acquisition already active")]
    AlreadyActive,

    /// Calibration touches the bus and cannot run during acquisition
    #[error("cannot calibrate while acquisition is active")]
    Busy,

    /// No sensor could be configured for the session
    #[error("no sensors available")]
    NoSensors,
}

impl SessionError {
    /// Short machine-readable identifier used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::AlreadyActive => "already_active",
            SessionError::Busy => "busy",
            SessionError::NoSensors => "no_sensors",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    fn render(err: &dyn core::fmt::Display) -> heapless::String<64> {
        let mut s = heapless::String::new();
        write!(s, "{err}").unwrap();
        s
    }

    #[test]
    fn invalid_config_message_names_field() {
        let err = ConfigError::invalid("multi_pulse", "must be 1, 2, 4 or 8");
        assert_eq!(render(&err).as_str(), "invalid multi_pulse: must be 1, 2, 4 or 8");
    }

    #[test]
    fn wrong_device_formats_hex() {
        let err = SensorError::WrongDevice(0x0186);
        assert_eq!(render(&err).as_str(), "unexpected device id 0x0186");
    }

    #[test]
    fn session_error_codes() {
        assert_eq!(SessionError::AlreadyActive.code(), "already_active");
        assert_eq!(SessionError::Busy.code(), "busy");
        assert_eq!(render(&SessionError::NoSensors).as_str(), "no sensors available");
    }
}
