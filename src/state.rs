//! Canonical engine state
//!
//! [`EngineStore`] owns the single [`EngineState`] record. The J1939 decoder
//! writes through [`EngineStore::apply`], the staleness monitor toggles the
//! stale bit, and every other consumer works on a [`EngineStore::snapshot`].

use serde::Serialize;
use tracing::trace;

use crate::constants::STATUS_COMM_STALE;
use crate::error::GatewayResult;
use crate::j1939::{DecodedFrame, EngineParameter};

/// Most recently decoded engine parameters.
///
/// Units follow the register map: temperatures in °C × 10, fuel rate in
/// L/h × 100, battery voltage in V × 10, `last_update` in milliseconds of
/// monotonic time since gateway start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub rpm: u32,
    pub engine_temp: u16,
    pub oil_pressure: u16,
    pub fuel_rate: u32,
    pub engine_hours: u32,
    pub coolant_temp: u16,
    pub intake_temp: u16,
    pub exhaust_temp: u16,
    pub engine_load: u16,
    pub throttle_pos: u16,
    pub engine_torque: u32,
    pub battery_voltage: u16,
    pub status_flags: u16,
    pub error_flags: u16,
    pub dtc_count: u16,
    pub last_update: u32,
}

impl EngineState {
    /// True while the communication-stale bit is raised
    #[inline]
    pub fn is_stale(&self) -> bool {
        self.status_flags & STATUS_COMM_STALE != 0
    }

    /// Field name / value pairs in register map order
    pub fn fields(&self) -> [(&'static str, u32); 16] {
        [
            ("rpm", self.rpm),
            ("engineTemp", u32::from(self.engine_temp)),
            ("oilPressure", u32::from(self.oil_pressure)),
            ("fuelRate", self.fuel_rate),
            ("engineHours", self.engine_hours),
            ("coolantTemp", u32::from(self.coolant_temp)),
            ("intakeTemp", u32::from(self.intake_temp)),
            ("exhaustTemp", u32::from(self.exhaust_temp)),
            ("engineLoad", u32::from(self.engine_load)),
            ("throttlePos", u32::from(self.throttle_pos)),
            ("engineTorque", self.engine_torque),
            ("batteryVoltage", u32::from(self.battery_voltage)),
            ("statusFlags", u32::from(self.status_flags)),
            ("errorFlags", u32::from(self.error_flags)),
            ("dtcCount", u32::from(self.dtc_count)),
            ("lastUpdate", self.last_update),
        ]
    }

    /// JSON document for the status page
    pub fn to_json(&self) -> GatewayResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Owner of the engine state record
#[derive(Debug, Default)]
pub struct EngineStore {
    state: EngineState,
}

impl EngineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a decoded frame received at `now_ms`.
    ///
    /// Returns `false` (and leaves `last_update` untouched) when the frame
    /// carried no parameters.
    pub fn apply(&mut self, decoded: &DecodedFrame, now_ms: u32) -> bool {
        if decoded.parameters.is_empty() {
            return false;
        }

        for param in &decoded.parameters {
            let s = &mut self.state;
            match *param {
                EngineParameter::Rpm(v) => s.rpm = v,
                EngineParameter::EngineTemp(v) => s.engine_temp = v,
                EngineParameter::CoolantTemp(v) => s.coolant_temp = v,
                EngineParameter::OilPressure(v) => s.oil_pressure = v,
                EngineParameter::FuelRate(v) => s.fuel_rate = v,
                EngineParameter::EngineHours(v) => s.engine_hours = v,
                EngineParameter::EngineLoad(v) => s.engine_load = v,
                EngineParameter::ThrottlePos(v) => s.throttle_pos = v,
                EngineParameter::BatteryVoltage(v) => s.battery_voltage = v,
                EngineParameter::ErrorFlags(v) => s.error_flags = v,
                EngineParameter::DtcCount(v) => s.dtc_count = v,
            }
        }
        self.state.last_update = now_ms;
        trace!("engine state updated from pgn 0x{:04X} at {} ms", decoded.pgn, now_ms);
        true
    }

    /// Read-only copy of the current state
    #[inline]
    pub fn snapshot(&self) -> EngineState {
        self.state
    }

    /// Timestamp of the last applied frame
    #[inline]
    pub fn last_update(&self) -> u32 {
        self.state.last_update
    }

    #[inline]
    pub fn is_stale(&self) -> bool {
        self.state.is_stale()
    }

    /// Raise the communication-stale bit
    pub fn mark_stale(&mut self) {
        self.state.status_flags |= STATUS_COMM_STALE;
    }

    /// Clear the communication-stale bit
    pub fn clear_stale(&mut self) {
        self.state.status_flags &= !STATUS_COMM_STALE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::j1939::{decode, CanFrame, PGN_ELECTRONIC_ENGINE_1, PGN_ENGINE_SPEED};

    fn decoded(pgn: u32, payload: &[u8]) -> DecodedFrame {
        let id = (3 << 26) | (pgn << 8);
        decode(&CanFrame::new_extended(id, payload).unwrap()).unwrap()
    }

    #[test]
    fn test_apply_updates_fields_and_timestamp() {
        let mut store = EngineStore::new();
        let raw = 16000u16.to_le_bytes();
        assert!(store.apply(&decoded(PGN_ENGINE_SPEED, &[0, 0, raw[0], raw[1]]), 1234));

        let snap = store.snapshot();
        assert_eq!(snap.rpm, 2000);
        assert_eq!(snap.last_update, 1234);
        assert_eq!(store.last_update(), 1234);

        assert!(store.apply(&decoded(PGN_ELECTRONIC_ENGINE_1, &[0, 200, 55]), 2000));
        let snap = store.snapshot();
        assert_eq!(snap.rpm, 2000);
        assert_eq!(snap.engine_load, 55);
        assert_eq!(snap.throttle_pos, 75);
        assert_eq!(snap.last_update, 2000);
    }

    #[test]
    fn test_empty_frame_does_not_touch_timestamp() {
        let mut store = EngineStore::new();
        let mut frame = decoded(PGN_ENGINE_SPEED, &[0, 0, 8, 0]);
        frame.parameters.clear();
        assert!(!store.apply(&frame, 500));
        assert_eq!(store.last_update(), 0);
    }

    #[test]
    fn test_stale_bit() {
        let mut store = EngineStore::new();
        assert!(!store.is_stale());

        store.mark_stale();
        assert!(store.is_stale());
        assert_eq!(store.snapshot().status_flags, 0x8000);

        store.clear_stale();
        assert!(!store.is_stale());
        assert_eq!(store.snapshot().status_flags, 0);
    }

    #[test]
    fn test_json_uses_status_page_names() {
        let state = EngineState {
            rpm: 1500,
            battery_voltage: 276,
            last_update: 42,
            ..Default::default()
        };
        let json = state.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["rpm"], 1500);
        assert_eq!(value["batteryVoltage"], 276);
        assert_eq!(value["lastUpdate"], 42);
        assert_eq!(value.as_object().unwrap().len(), 16);
    }

    #[test]
    fn test_fields_order() {
        let state = EngineState {
            dtc_count: 2,
            ..Default::default()
        };
        let fields = state.fields();
        assert_eq!(fields[0].0, "rpm");
        assert_eq!(fields[14], ("dtcCount", 2));
        assert_eq!(fields[15].0, "lastUpdate");
    }
}
