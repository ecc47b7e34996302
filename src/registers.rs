//! Modbus register map
//!
//! Fixed 21-register projection of [`EngineState`]. 32-bit values occupy
//! two consecutive addresses, high word first.
//!
//! | Address | Field | Unit |
//! |---------|-------|------|
//! | 0-1 | rpm | rpm |
//! | 2 | engine temp | °C × 10 |
//! | 3 | oil pressure | kPa |
//! | 4-5 | fuel rate | L/h × 100 |
//! | 6-7 | engine hours | h |
//! | 8 | coolant temp | °C × 10 |
//! | 9 | intake temp | °C × 10 |
//! | 10 | exhaust temp | °C × 10 |
//! | 11 | engine load | % |
//! | 12 | throttle position | % |
//! | 13-14 | engine torque | N·m |
//! | 15 | battery voltage | V × 10 |
//! | 16 | status flags | bit 15 = CAN data stale |
//! | 17 | error flags | DM1 lamp/flash |
//! | 18 | DTC count | |
//! | 19-20 | last update | ms |

use std::ops::Index;

use crate::constants::REGISTER_COUNT;
use crate::state::EngineState;

pub const REG_ENGINE_RPM: u16 = 0;
pub const REG_ENGINE_TEMP: u16 = 2;
pub const REG_OIL_PRESSURE: u16 = 3;
pub const REG_FUEL_RATE: u16 = 4;
pub const REG_ENGINE_HOURS: u16 = 6;
pub const REG_COOLANT_TEMP: u16 = 8;
pub const REG_INTAKE_TEMP: u16 = 9;
pub const REG_EXHAUST_TEMP: u16 = 10;
pub const REG_ENGINE_LOAD: u16 = 11;
pub const REG_THROTTLE_POS: u16 = 12;
pub const REG_ENGINE_TORQUE: u16 = 13;
pub const REG_BATTERY_VOLTAGE: u16 = 15;
pub const REG_STATUS_FLAGS: u16 = 16;
pub const REG_ERROR_FLAGS: u16 = 17;
pub const REG_DTC_COUNT: u16 = 18;
pub const REG_LAST_UPDATE: u16 = 19;

/// Split a 32-bit value into registers, high word first
#[inline]
pub fn split_u32(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, (value & 0xFFFF) as u16]
}

/// Join two registers (high word first) into a 32-bit value
#[inline]
pub fn join_u32(regs: [u16; 2]) -> u32 {
    (u32::from(regs[0]) << 16) | u32::from(regs[1])
}

/// Projected register array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterMap {
    registers: [u16; REGISTER_COUNT],
}

impl RegisterMap {
    /// Project an engine state snapshot
    pub fn project(state: &EngineState) -> Self {
        let mut map = Self::default();

        map.set_u32(REG_ENGINE_RPM, state.rpm);
        map.set(REG_ENGINE_TEMP, state.engine_temp);
        map.set(REG_OIL_PRESSURE, state.oil_pressure);
        map.set_u32(REG_FUEL_RATE, state.fuel_rate);
        map.set_u32(REG_ENGINE_HOURS, state.engine_hours);
        map.set(REG_COOLANT_TEMP, state.coolant_temp);
        map.set(REG_INTAKE_TEMP, state.intake_temp);
        map.set(REG_EXHAUST_TEMP, state.exhaust_temp);
        map.set(REG_ENGINE_LOAD, state.engine_load);
        map.set(REG_THROTTLE_POS, state.throttle_pos);
        map.set_u32(REG_ENGINE_TORQUE, state.engine_torque);
        map.set(REG_BATTERY_VOLTAGE, state.battery_voltage);
        map.set(REG_STATUS_FLAGS, state.status_flags);
        map.set(REG_ERROR_FLAGS, state.error_flags);
        map.set(REG_DTC_COUNT, state.dtc_count);
        map.set_u32(REG_LAST_UPDATE, state.last_update);

        map
    }

    #[inline]
    fn set(&mut self, address: u16, value: u16) {
        self.registers[address as usize] = value;
    }

    #[inline]
    fn set_u32(&mut self, address: u16, value: u32) {
        let [high, low] = split_u32(value);
        self.set(address, high);
        self.set(address + 1, low);
    }

    /// Register at `address`
    pub fn get(&self, address: u16) -> Option<u16> {
        self.registers.get(address as usize).copied()
    }

    /// 32-bit value stored at `address` and `address + 1`
    pub fn get_u32(&self, address: u16) -> Option<u32> {
        Some(join_u32([self.get(address)?, self.get(address.checked_add(1)?)?]))
    }

    /// `quantity` registers starting at `start`, or `None` if the range
    /// leaves the map
    pub fn slice(&self, start: u16, quantity: u16) -> Option<&[u16]> {
        let start = start as usize;
        let end = start.checked_add(quantity as usize)?;
        if end > REGISTER_COUNT {
            return None;
        }
        Some(&self.registers[start..end])
    }

    #[inline]
    pub fn as_slice(&self) -> &[u16] {
        &self.registers
    }

    #[inline]
    pub fn len(&self) -> usize {
        REGISTER_COUNT
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Index<u16> for RegisterMap {
    type Output = u16;

    fn index(&self, address: u16) -> &u16 {
        &self.registers[address as usize]
    }
}

/// Project an engine state into the register map
#[inline]
pub fn project(state: &EngineState) -> RegisterMap {
    RegisterMap::project(state)
}
