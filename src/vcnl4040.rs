/// VCNL4040 proximity sensor register driver.
///
/// Registers are 16 bits wide, transferred little-endian after a one-byte
/// command code. Paired registers (PS_CONF1/PS_CONF2, PS_CONF3/PS_MS) share
/// one command code: the low byte is the first register, the high byte the
/// second.
///
/// All functions talk to whichever sensor the multiplexer currently routes
/// to [`SENSOR_ADDR`]; selecting the sensor is the caller's job.
use embedded_hal::i2c::{Error as _, I2c};

use crate::calibration::SensorThresholds;
use crate::config::{multi_pulse_bits, AcquisitionConfig, InterruptMode};
use crate::error::SensorError;
use crate::mux::SENSOR_ADDR;

/// Value of the ID register
pub const DEVICE_ID: u16 = 0x0186;

/// Command codes
pub mod reg {
    pub const PS_CONF1_2: u8 = 0x03;
    pub const PS_CONF3_MS: u8 = 0x04;
    pub const PS_CANC: u8 = 0x05;
    pub const PS_THDL: u8 = 0x06;
    pub const PS_THDH: u8 = 0x07;
    pub const PS_DATA: u8 = 0x08;
    pub const INT_FLAG: u8 = 0x0B;
    pub const ID: u8 = 0x0C;
}

// PS_CONF1 (low byte of PS_CONF1_2)
const PS_SD: u8 = 0x01;
const PS_IT_SHIFT: u8 = 1;
const PS_PERS_SHIFT: u8 = 4;
/// 1/40 duty cycle, the fastest measurement rate
const PS_DUTY_1_40: u8 = 0x00;

// PS_CONF2 (high byte of PS_CONF1_2)
const PS_HD_16BIT: u8 = 0x08;

// PS_CONF3 (low byte of PS_CONF3_MS)
const PS_SMART_PERS: u8 = 0x10;
const PS_MPS_SHIFT: u8 = 5;

// PS_MS (high byte of PS_CONF3_MS)
const PS_MS_LOGIC: u8 = 0x40;

// INT_FLAG high byte
const PS_IF_AWAY: u8 = 0x01;
const PS_IF_CLOSE: u8 = 0x02;

/// Which proximity threshold crossings raise the interrupt pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProximityInterrupt {
    Disabled = 0,
    Close = 1,
    Away = 2,
    Both = 3,
}

/// Latched interrupt flags (high byte of INT_FLAG). Reading clears them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptFlags(u8);

impl InterruptFlags {
    pub const fn from_register(value: u16) -> Self {
        Self((value >> 8) as u8)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub const fn is_close(self) -> bool {
        self.0 & PS_IF_CLOSE != 0
    }

    pub const fn is_away(self) -> bool {
        self.0 & PS_IF_AWAY != 0
    }

    pub const fn any_proximity(self) -> bool {
        self.is_close() || self.is_away()
    }
}

// ── Register encoding ────────────────────────────────────────────────

/// PS_CONF1_2 value: 1/40 duty, persistence, integration time, sensor on,
/// 16-bit output and the interrupt selection.
pub fn encode_ps_conf1_2(config: &AcquisitionConfig, interrupt: ProximityInterrupt) -> u16 {
    let persistence = config.persistence.clamp(1, 4) - 1;
    let conf1 = PS_DUTY_1_40
        | (persistence << PS_PERS_SHIFT)
        | (config.integration_time.bits() << PS_IT_SHIFT);
    let conf2 = PS_HD_16BIT | interrupt as u8;
    u16::from_le_bytes([conf1, conf2])
}

/// PS_CONF3_MS value: multi-pulse, smart persistence, interrupt mode and
/// LED current.
pub fn encode_ps_conf3_ms(config: &AcquisitionConfig) -> u16 {
    let mps = multi_pulse_bits(config.multi_pulse).unwrap_or(0);
    let mut conf3 = mps << PS_MPS_SHIFT;
    if config.smart_persistence {
        conf3 |= PS_SMART_PERS;
    }
    let mut ms = config.led_current.bits();
    if config.interrupt_mode == InterruptMode::LogicOutput {
        ms |= PS_MS_LOGIC;
    }
    u16::from_le_bytes([conf3, ms])
}

// ── Bus access ───────────────────────────────────────────────────────

pub fn write_register<I2C: I2c>(i2c: &mut I2C, register: u8, value: u16) -> Result<(), SensorError> {
    let [lo, hi] = value.to_le_bytes();
    i2c.write(SENSOR_ADDR, &[register, lo, hi])
        .map_err(|e| SensorError::Bus(e.kind()))
}

pub fn read_register<I2C: I2c>(i2c: &mut I2C, register: u8) -> Result<u16, SensorError> {
    let mut buf = [0u8; 2];
    i2c.write_read(SENSOR_ADDR, &[register], &mut buf)
        .map_err(|e| SensorError::Bus(e.kind()))?;
    Ok(u16::from_le_bytes(buf))
}

/// True if a VCNL4040 answers with the expected device ID
pub fn probe<I2C: I2c>(i2c: &mut I2C) -> bool {
    matches!(read_register(i2c, reg::ID), Ok(DEVICE_ID))
}

pub fn check_id<I2C: I2c>(i2c: &mut I2C) -> Result<(), SensorError> {
    match read_register(i2c, reg::ID)? {
        DEVICE_ID => Ok(()),
        other => Err(SensorError::WrongDevice(other)),
    }
}

/// Program drive settings and, when thresholds are given, arm the
/// close/away interrupt. Any latched flags are cleared afterwards.
pub fn configure<I2C: I2c>(
    i2c: &mut I2C,
    config: &AcquisitionConfig,
    thresholds: Option<SensorThresholds>,
) -> Result<(), SensorError> {
    write_register(i2c, reg::PS_CONF3_MS, encode_ps_conf3_ms(config))?;
    write_register(i2c, reg::PS_CANC, 0)?;

    let interrupt = match thresholds {
        Some(t) => {
            write_register(i2c, reg::PS_THDL, t.low)?;
            write_register(i2c, reg::PS_THDH, t.high)?;
            ProximityInterrupt::Both
        }
        None => ProximityInterrupt::Disabled,
    };
    write_register(i2c, reg::PS_CONF1_2, encode_ps_conf1_2(config, interrupt))?;
    read_interrupt_flags(i2c)?;
    Ok(())
}

pub fn read_proximity<I2C: I2c>(i2c: &mut I2C) -> Result<u16, SensorError> {
    read_register(i2c, reg::PS_DATA)
}

/// Read and clear the latched interrupt flags
pub fn read_interrupt_flags<I2C: I2c>(i2c: &mut I2C) -> Result<InterruptFlags, SensorError> {
    read_register(i2c, reg::INT_FLAG).map(InterruptFlags::from_register)
}

/// Stop raising proximity interrupts, keep measuring, and clear any latched
/// flags so the line is released.
pub fn disable_interrupts<I2C: I2c>(i2c: &mut I2C) -> Result<(), SensorError> {
    let conf = read_register(i2c, reg::PS_CONF1_2)?;
    let [conf1, conf2] = conf.to_le_bytes();
    let conf2 = conf2 & !(ProximityInterrupt::Both as u8);
    write_register(i2c, reg::PS_CONF1_2, u16::from_le_bytes([conf1 & !PS_SD, conf2]))?;
    read_interrupt_flags(i2c)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IntegrationTime, LedCurrent};
    use crate::mux::MuxController;
    use crate::sensor::Position;
    use crate::testutil::FakeBus;

    fn selected(position: u8) -> (MuxController<FakeBus>, Position) {
        let mut mux = MuxController::new(FakeBus::new());
        mux.discover();
        let pos = Position::new(position).unwrap();
        assert!(mux.select_sensor(pos));
        (mux, pos)
    }

    // ── Encoding ────────────────────────────────────────────────────

    #[test]
    fn default_conf1_2_encoding() {
        let config = AcquisitionConfig::new();
        // IT=8T (7<<1), persistence 1 (0), duty 1/40, HD set, both interrupts
        assert_eq!(encode_ps_conf1_2(&config, ProximityInterrupt::Both), 0x0B0E);
        assert_eq!(encode_ps_conf1_2(&config, ProximityInterrupt::Disabled), 0x080E);
    }

    #[test]
    fn persistence_and_integration_fields() {
        let mut config = AcquisitionConfig::new();
        config.persistence = 4;
        config.integration_time = IntegrationTime::T1;
        assert_eq!(encode_ps_conf1_2(&config, ProximityInterrupt::Close), 0x0930);
    }

    #[test]
    fn default_conf3_ms_encoding() {
        let config = AcquisitionConfig::new();
        // MPS=8 (3<<5), smart persistence, LED 200 mA, normal mode
        assert_eq!(encode_ps_conf3_ms(&config), 0x0770);
    }

    #[test]
    fn logic_mode_and_led_current() {
        let mut config = AcquisitionConfig::new();
        config.interrupt_mode = InterruptMode::LogicOutput;
        config.led_current = LedCurrent::Ma50;
        config.smart_persistence = false;
        config.multi_pulse = 1;
        assert_eq!(encode_ps_conf3_ms(&config), 0x4000);
    }

    #[test]
    fn flags_decode() {
        let close = InterruptFlags::from_register(0x0200);
        assert!(close.is_close() && !close.is_away());
        let away = InterruptFlags::from_register(0x0100);
        assert!(away.is_away() && !away.is_close());
        assert!(!InterruptFlags::from_register(0x00FF).any_proximity());
    }

    // ── Bus access ──────────────────────────────────────────────────

    #[test]
    fn configure_writes_thresholds() {
        let (mut mux, pos) = selected(2);
        let thresholds = SensorThresholds { high: 60, low: 55 };
        configure(mux.bus(), &AcquisitionConfig::new(), Some(thresholds)).unwrap();
        let bus = mux.release();
        assert_eq!(bus.register(pos, reg::PS_THDH), 60);
        assert_eq!(bus.register(pos, reg::PS_THDL), 55);
        assert_eq!(bus.register(pos, reg::PS_CONF1_2), 0x0B0E);
        assert_eq!(bus.register(pos, reg::PS_CONF3_MS), 0x0770);
    }

    #[test]
    fn configure_without_thresholds_disables_interrupt() {
        let (mut mux, pos) = selected(0);
        configure(mux.bus(), &AcquisitionConfig::new(), None).unwrap();
        assert_eq!(mux.release().register(pos, reg::PS_CONF1_2) >> 8, 0x08);
    }

    #[test]
    fn flags_clear_on_read() {
        let (mut mux, pos) = selected(1);
        mux.bus().raise_flags(pos, PS_IF_CLOSE);
        assert!(read_interrupt_flags(mux.bus()).unwrap().is_close());
        assert_eq!(read_interrupt_flags(mux.bus()).unwrap().raw(), 0);
    }

    #[test]
    fn disable_interrupts_clears_selection_and_flags() {
        let (mut mux, pos) = selected(4);
        configure(mux.bus(), &AcquisitionConfig::new(), Some(SensorThresholds { high: 30, low: 25 })).unwrap();
        mux.bus().raise_flags(pos, PS_IF_AWAY);
        disable_interrupts(mux.bus()).unwrap();
        let bus = mux.release();
        assert_eq!(bus.register(pos, reg::PS_CONF1_2) >> 8 & 0x03, 0);
        assert_eq!(bus.register(pos, reg::INT_FLAG), 0);
    }

    #[test]
    fn proximity_read_and_id_check() {
        let (mut mux, pos) = selected(3);
        mux.bus().set_proximity(pos, 321);
        assert_eq!(read_proximity(mux.bus()).unwrap(), 321);
        assert!(check_id(mux.bus()).is_ok());
    }

    #[test]
    fn read_without_selection_fails() {
        let mut mux = MuxController::new(FakeBus::new());
        mux.discover();
        assert!(matches!(read_proximity(mux.bus()), Err(SensorError::Bus(_))));
    }
}
