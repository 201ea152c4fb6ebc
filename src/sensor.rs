/// Sensor topology and the raw proximity reading.
///
/// The hoop carries three modules with two sensors each. A sensor's logical
/// position is `module_index * 2 + side_index`, so positions 0/1 belong to
/// module 1, 2/3 to module 2 and 4/5 to module 3.
use core::fmt::Write;

use serde::Serialize;

/// Number of physical sensor modules on the hoop
pub const NUM_MODULES: usize = 3;

/// Sensors per module (side A and side B)
pub const SENSORS_PER_MODULE: usize = 2;

/// Total number of logical sensor positions
pub const NUM_SENSORS: usize = NUM_MODULES * SENSORS_PER_MODULE;

/// Short human-readable sensor name ("P1S1" .. "P3S2")
pub type SensorName = heapless::String<4>;

/// Which face of the detection plane a sensor looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::A, Side::B];

    /// Index of this side inside a module (A = 0, B = 1)
    pub const fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    pub const fn from_index(index: usize) -> Option<Side> {
        match index {
            0 => Some(Side::A),
            1 => Some(Side::B),
            _ => None,
        }
    }

    pub const fn opposite(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::A => "A",
            Side::B => "B",
        }
    }
}

/// Module identifier, 1-based as printed on the PCBs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ModuleId(u8);

impl ModuleId {
    pub const ALL: [ModuleId; NUM_MODULES] = [ModuleId(1), ModuleId(2), ModuleId(3)];

    pub const fn new(id: u8) -> Option<Self> {
        if id >= 1 && id as usize <= NUM_MODULES {
            Some(Self(id))
        } else {
            None
        }
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        if index < NUM_MODULES {
            Some(Self(index as u8 + 1))
        } else {
            None
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Zero-based index, also the outer switch channel for this module
    pub const fn index(self) -> usize {
        self.0 as usize - 1
    }

    pub const fn position(self, side: Side) -> Position {
        Position((self.index() * SENSORS_PER_MODULE + side.index()) as u8)
    }
}

/// Logical sensor position, 0..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Position(u8);

impl Position {
    pub const fn new(position: u8) -> Option<Self> {
        if (position as usize) < NUM_SENSORS {
            Some(Self(position))
        } else {
            None
        }
    }

    /// Iterate all six positions in ascending order
    pub fn all() -> impl Iterator<Item = Position> {
        (0..NUM_SENSORS as u8).map(Position)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn module(self) -> ModuleId {
        ModuleId(self.0 / SENSORS_PER_MODULE as u8 + 1)
    }

    pub const fn side(self) -> Side {
        if self.0 % 2 == 0 {
            Side::A
        } else {
            Side::B
        }
    }

    /// "P<module>S<side>" with sides numbered 1 and 2
    pub fn name(self) -> SensorName {
        let mut name = SensorName::new();
        let _ = write!(name, "P{}S{}", self.module().get(), self.side().index() + 1);
        name
    }
}

/// One proximity sample from one sensor.
///
/// Timestamps are milliseconds since the acquisition session started. All
/// readings of one polling cycle share the cycle timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reading {
    pub timestamp_ms: u32,
    pub position: Position,
    pub module: ModuleId,
    pub side: Side,
    pub proximity: u16,
}

impl Reading {
    pub const fn new(timestamp_ms: u32, position: Position, proximity: u16) -> Self {
        Self {
            timestamp_ms,
            position,
            module: position.module(),
            side: position.side(),
            proximity,
        }
    }
}
