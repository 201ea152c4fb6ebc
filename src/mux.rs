/// Two-level I²C multiplexer addressing.
///
/// Every proximity sensor answers at the same fixed address, so only one may
/// be wired through to the bus at a time. An outer 8-channel switch selects
/// the module; each module carries its own 4-channel inner switch that picks
/// side A (channel 0) or side B (channel 1).
///
/// The controller remembers which channels it last selected and skips the
/// outer write when the requested module is already selected, which halves
/// the bus traffic of a polling cycle.
use embedded_hal::i2c::I2c;

use crate::sensor::{ModuleId, Position, Side, NUM_MODULES, SENSORS_PER_MODULE};
use crate::vcnl4040;

/// Default address of the outer (module) switch
pub const OUTER_SWITCH_ADDR: u8 = 0x70;

/// Fixed address shared by every proximity sensor
pub const SENSOR_ADDR: u8 = 0x60;

/// Addresses an inner switch may be strapped to, in probe order
pub const INNER_SWITCH_CANDIDATES: [u8; 8] = [0x74, 0x75, 0x76, 0x70, 0x71, 0x72, 0x73, 0x77];

/// What the controller believes is currently selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressState {
    /// Module index selected on the outer switch
    pub outer: Option<u8>,
    /// Side index selected on that module's inner switch
    pub inner: Option<u8>,
}

/// Discovery result for one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleBus {
    pub inner_addr: Option<u8>,
    pub sensors: [bool; SENSORS_PER_MODULE],
}

pub struct MuxController<I2C> {
    i2c: I2C,
    outer_addr: u8,
    modules: [ModuleBus; NUM_MODULES],
    state: AddressState,
}

impl<I2C: I2c> MuxController<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self::with_outer_address(i2c, OUTER_SWITCH_ADDR)
    }

    pub fn with_outer_address(i2c: I2C, outer_addr: u8) -> Self {
        Self {
            i2c,
            outer_addr,
            modules: [ModuleBus::default(); NUM_MODULES],
            state: AddressState::default(),
        }
    }

    /// Probe the switch tree and every sensor, rebuilding the availability
    /// map. Returns the number of sensors found. Ends with all channels off.
    pub fn discover(&mut self) -> usize {
        self.modules = [ModuleBus::default(); NUM_MODULES];
        self.state = AddressState::default();

        if self.i2c.write(self.outer_addr, &[]).is_err() {
            log::warn!("Outer switch not found at {:#04x}", self.outer_addr);
            return 0;
        }

        for module in ModuleId::ALL {
            let m = module.index();
            if self.i2c.write(self.outer_addr, &[1 << m]).is_err() {
                log::warn!("Module {}: outer channel select failed", module.get());
                continue;
            }

            let outer_addr = self.outer_addr;
            let inner = INNER_SWITCH_CANDIDATES
                .iter()
                .copied()
                .filter(|&addr| addr != outer_addr)
                .find(|&addr| self.i2c.write(addr, &[]).is_ok());
            let Some(inner_addr) = inner else {
                log::warn!("Module {}: no inner switch found", module.get());
                continue;
            };
            self.modules[m].inner_addr = Some(inner_addr);

            for side in Side::BOTH {
                if self.i2c.write(inner_addr, &[1 << side.index()]).is_err() {
                    continue;
                }
                let position = module.position(side);
                let found = vcnl4040::probe(&mut self.i2c);
                self.modules[m].sensors[side.index()] = found;
                if found {
                    log::info!("{} found (module {} at {:#04x})", position.name(), module.get(), inner_addr);
                } else {
                    log::warn!("{} missing", position.name());
                }
            }
            let _ = self.i2c.write(inner_addr, &[0]);
        }

        let _ = self.i2c.write(self.outer_addr, &[0]);
        let count = self.active_sensor_count();
        log::info!("Bus discovery complete: {} sensors available", count);
        count
    }

    /// Route the bus to one sensor. Returns false if the sensor is not
    /// available or a switch write failed.
    pub fn select_sensor(&mut self, position: Position) -> bool {
        if !self.is_sensor_available(position) {
            return false;
        }
        let module = position.module().index();
        let side = position.side().index();
        let Some(inner_addr) = self.modules[module].inner_addr else {
            return false;
        };

        if self.state.outer != Some(module as u8) {
            if self.i2c.write(self.outer_addr, &[1 << module]).is_err() {
                self.state = AddressState::default();
                return false;
            }
            self.state.outer = Some(module as u8);
            self.state.inner = None;
        }

        if self.i2c.write(inner_addr, &[1 << side]).is_err() {
            self.state.inner = None;
            return false;
        }
        self.state.inner = Some(side as u8);
        true
    }

    pub fn is_sensor_available(&self, position: Position) -> bool {
        let bus = &self.modules[position.module().index()];
        bus.inner_addr.is_some() && bus.sensors[position.side().index()]
    }

    /// Turn off every inner switch, then the outer switch. Safe to call
    /// repeatedly; failed writes are ignored.
    pub fn disable_all(&mut self) {
        for (m, bus) in self.modules.iter().enumerate() {
            let Some(inner_addr) = bus.inner_addr else {
                continue;
            };
            if self.i2c.write(self.outer_addr, &[1 << m]).is_ok() {
                let _ = self.i2c.write(inner_addr, &[0]);
            }
        }
        let _ = self.i2c.write(self.outer_addr, &[0]);
        self.state = AddressState::default();
    }

    /// Turn off the inner switch of the currently selected module only.
    pub fn disable_current_inner(&mut self) {
        let Some(module) = self.state.outer else {
            return;
        };
        if let Some(inner_addr) = self.modules[module as usize].inner_addr {
            let _ = self.i2c.write(inner_addr, &[0]);
        }
        self.state.inner = None;
    }

    pub fn active_sensor_count(&self) -> usize {
        self.modules
            .iter()
            .filter(|b| b.inner_addr.is_some())
            .map(|b| b.sensors.iter().filter(|&&s| s).count())
            .sum()
    }

    pub fn address_state(&self) -> AddressState {
        self.state
    }

    pub fn module_bus(&self, module: ModuleId) -> ModuleBus {
        self.modules[module.index()]
    }

    /// Raw bus access for the sensor driver once a sensor is selected
    pub fn bus(&mut self) -> &mut I2C {
        &mut self.i2c
    }

    pub fn release(self) -> I2C {
        self.i2c
    }
}
