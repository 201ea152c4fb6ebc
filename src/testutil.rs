/// Host-side fakes for the hardware seams: a simulated multiplexer tree with
/// six proximity sensors, a no-op delay and a manually advanced clock.
use core::sync::atomic::{AtomicU32, Ordering};
use std::collections::VecDeque;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{self, ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

use crate::mux::{OUTER_SWITCH_ADDR, SENSOR_ADDR};
use crate::polling::Clock;
use crate::sensor::{Position, NUM_MODULES, NUM_SENSORS};
use crate::vcnl4040::{reg, DEVICE_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeError;

impl i2c::Error for FakeError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
    }
}

/// Simulated register file of one proximity sensor.
#[derive(Debug, Clone)]
pub struct FakeSensor {
    pub present: bool,
    pub registers: [u16; 16],
    /// Scripted PS_DATA values, returned in order; the last one repeats
    pub proximity: VecDeque<u16>,
    pub last_proximity: u16,
    pub fail_reads: bool,
    pointer: u8,
}

impl FakeSensor {
    fn new() -> Self {
        let mut registers = [0u16; 16];
        registers[reg::ID as usize] = DEVICE_ID;
        Self {
            present: true,
            registers,
            proximity: VecDeque::new(),
            last_proximity: 0,
            fail_reads: false,
            pointer: 0,
        }
    }

    fn read(&mut self, register: u8) -> u16 {
        match register {
            reg::PS_DATA => {
                if let Some(v) = self.proximity.pop_front() {
                    self.last_proximity = v;
                }
                self.last_proximity
            }
            reg::INT_FLAG => {
                let v = self.registers[reg::INT_FLAG as usize];
                self.registers[reg::INT_FLAG as usize] = 0;
                v
            }
            r => self.registers[r as usize & 0x0F],
        }
    }
}

/// Outer switch at 0x70, one inner switch per module, two sensors per inner
/// switch. A sensor answers only when its full path is selected.
#[derive(Debug)]
pub struct FakeBus {
    pub outer_present: bool,
    pub outer_mask: u8,
    pub inner_addrs: [Option<u8>; NUM_MODULES],
    pub inner_masks: [u8; NUM_MODULES],
    pub sensors: [FakeSensor; NUM_SENSORS],
    /// Writes addressed to the outer switch, probes excluded
    pub outer_writes: usize,
    pub inner_writes: usize,
    /// Every transaction fails while set
    pub fail_all: bool,
    pub fail_outer_writes: bool,
}

impl FakeBus {
    /// All three modules populated, inner switches at 0x74, 0x75, 0x76
    pub fn new() -> Self {
        Self {
            outer_present: true,
            outer_mask: 0,
            inner_addrs: [Some(0x74), Some(0x75), Some(0x76)],
            inner_masks: [0; NUM_MODULES],
            sensors: core::array::from_fn(|_| FakeSensor::new()),
            outer_writes: 0,
            inner_writes: 0,
            fail_all: false,
            fail_outer_writes: false,
        }
    }

    pub fn sensor(&mut self, position: Position) -> &mut FakeSensor {
        &mut self.sensors[position.index()]
    }

    pub fn register(&self, position: Position, register: u8) -> u16 {
        self.sensors[position.index()].registers[register as usize]
    }

    pub fn set_proximity(&mut self, position: Position, value: u16) {
        let s = self.sensor(position);
        s.proximity.clear();
        s.last_proximity = value;
    }

    pub fn raise_flags(&mut self, position: Position, flags_high_byte: u8) {
        self.sensor(position).registers[reg::INT_FLAG as usize] = (flags_high_byte as u16) << 8;
    }

    /// Module index whose inner switch sits at `addr`, if it is reachable
    fn reachable_inner(&self, addr: u8) -> Option<usize> {
        (0..NUM_MODULES).find(|&m| self.inner_addrs[m] == Some(addr) && self.outer_mask & (1 << m) != 0)
    }

    /// The single sensor currently wired through to the bus, if any
    fn selected_sensor(&self) -> Option<usize> {
        let mut found = None;
        for m in 0..NUM_MODULES {
            if self.outer_mask & (1 << m) == 0 || self.inner_addrs[m].is_none() {
                continue;
            }
            for side in 0..2 {
                if self.inner_masks[m] & (1 << side) != 0 {
                    if found.is_some() {
                        // Two sensors share 0x60: the bus is garbage
                        return None;
                    }
                    found = Some(m * 2 + side);
                }
            }
        }
        found.filter(|&i| self.sensors[i].present)
    }

    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), FakeError> {
        if addr == OUTER_SWITCH_ADDR {
            if !self.outer_present {
                return Err(FakeError);
            }
            if let Some(&mask) = bytes.first() {
                if self.fail_outer_writes {
                    return Err(FakeError);
                }
                self.outer_writes += 1;
                self.outer_mask = mask;
            }
            return Ok(());
        }
        if let Some(m) = self.reachable_inner(addr) {
            if let Some(&mask) = bytes.first() {
                self.inner_writes += 1;
                self.inner_masks[m] = mask;
            }
            return Ok(());
        }
        if addr == SENSOR_ADDR {
            let idx = self.selected_sensor().ok_or(FakeError)?;
            let sensor = &mut self.sensors[idx];
            match bytes {
                [] => {}
                [register] => sensor.pointer = *register,
                [register, lo, hi, ..] => {
                    sensor.registers[*register as usize & 0x0F] = u16::from_le_bytes([*lo, *hi]);
                }
                [register, _] => sensor.pointer = *register,
            }
            return Ok(());
        }
        Err(FakeError)
    }

    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), FakeError> {
        if addr == OUTER_SWITCH_ADDR && self.outer_present {
            buf.fill(self.outer_mask);
            return Ok(());
        }
        if addr != SENSOR_ADDR {
            return Err(FakeError);
        }
        let idx = self.selected_sensor().ok_or(FakeError)?;
        let sensor = &mut self.sensors[idx];
        if sensor.fail_reads {
            return Err(FakeError);
        }
        let value = sensor.read(sensor.pointer).to_le_bytes();
        for (dst, src) in buf.iter_mut().zip(value) {
            *dst = src;
        }
        Ok(())
    }
}

impl ErrorType for FakeBus {
    type Error = FakeError;
}

impl I2c for FakeBus {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        if self.fail_all {
            return Err(FakeError);
        }
        for op in operations {
            match op {
                Operation::Write(bytes) => self.write(address, bytes)?,
                Operation::Read(buf) => self.read(address, buf)?,
            }
        }
        Ok(())
    }
}

/// Delay that returns immediately and records how long it was asked to wait.
#[derive(Debug, Default)]
pub struct NoDelay {
    pub total_ns: u64,
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}

/// Clock advanced by hand. Shareable with a worker thread.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU32,
}

impl ManualClock {
    pub fn new(start_us: u32) -> Self {
        Self {
            now_us: AtomicU32::new(start_us),
        }
    }

    pub fn set(&self, now_us: u32) {
        self.now_us.store(now_us, Ordering::Relaxed);
    }

    pub fn advance(&self, us: u32) {
        self.now_us.fetch_add(us, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u32 {
        self.now_us.load(Ordering::Relaxed)
    }
}

/// Delay that really sleeps, for tests that run a worker thread.
#[derive(Debug, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(std::time::Duration::from_nanos(ns as u64));
    }
}
