//! J1939 frame decoding
//!
//! Turns raw extended CAN frames into typed engine parameters.
//!
//! # J1939 CAN ID Structure (29-bit Extended)
//!
//! ```text
//! | Priority | Reserved | Data Page | PDU Format | PDU Specific | Source Addr |
//! |  3 bits  |  1 bit   |   1 bit   |   8 bits   |    8 bits    |   8 bits    |
//! ```
//!
//! PDU format values below 240 (PDU1) carry a destination address in the
//! PDU specific byte, which is then not part of the PGN.
//!
//! # Supported PGNs
//!
//! | PGN | Name | Bytes | Scaling | Field |
//! |-----|------|-------|---------|-------|
//! | 0xF004 | Engine Speed | 2-3 LE | 0.125 rpm/bit | rpm |
//! | 0xFEEE | Engine Temperature | 0 | 1 °C/bit, -40 | coolant/engine temp (°C × 10) |
//! | 0xFEFC | Fluid Level/Pressure | 3 | 4 kPa/bit | oil pressure |
//! | 0xFEE5 | Engine Hours | 0-3 LE | 0.05 h/bit | engine hours |
//! | 0xFEF2 | Fuel Economy | 0-1 LE | 0.05 L/h/bit | fuel rate (L/h × 100) |
//! | 0xFEF7 | Vehicle Electrical Power | 4-5 LE | 0.05 V/bit | battery (V × 10) |
//! | 0xF003 | Electronic Engine Controller | 1, 2 | 1 %/bit | throttle, load |
//! | 0xFECA | DM1 | 0-1, length | | error flags, DTC count |
//!
//! Multi-packet transport protocol (TP.CM/TP.DT) is not reassembled.

use std::fmt;

use tracing::trace;

use crate::constants::{EXTENDED_ID_MASK, MAX_CAN_PAYLOAD, PDU2_THRESHOLD};
use crate::error::{DecodeError, GatewayError, GatewayResult};

/// Engine Speed
pub const PGN_ENGINE_SPEED: u32 = 0xF004;
/// Engine Temperature 1
pub const PGN_ENGINE_TEMP: u32 = 0xFEEE;
/// Engine Fluid Level/Pressure 1
pub const PGN_ENGINE_FLUID_LEVEL: u32 = 0xFEFC;
/// Engine Hours, Revolutions
pub const PGN_ENGINE_HOURS: u32 = 0xFEE5;
/// Fuel Economy (Liquid)
pub const PGN_FUEL_ECONOMY: u32 = 0xFEF2;
/// Vehicle Electrical Power 1
pub const PGN_VEHICLE_ELECTRICAL: u32 = 0xFEF7;
/// Electronic Engine Controller 1 (load and demand torque)
pub const PGN_ELECTRONIC_ENGINE_1: u32 = 0xF003;
/// DM1 Active Diagnostic Trouble Codes
pub const PGN_DIAGNOSTIC_MESSAGE_1: u32 = 0xFECA;

/// Raw CAN frame as delivered by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    extended: bool,
    data: [u8; MAX_CAN_PAYLOAD],
    len: u8,
}

impl CanFrame {
    /// Extended (29-bit) data frame
    pub fn new_extended(id: u32, payload: &[u8]) -> GatewayResult<Self> {
        if id > EXTENDED_ID_MASK {
            return Err(GatewayError::invalid_frame(format!(
                "identifier 0x{:08X} exceeds 29 bits",
                id
            )));
        }
        Self::with_payload(id, true, payload)
    }

    /// Standard (11-bit) data frame
    pub fn new_standard(id: u16, payload: &[u8]) -> GatewayResult<Self> {
        if id > 0x7FF {
            return Err(GatewayError::invalid_frame(format!(
                "identifier 0x{:04X} exceeds 11 bits",
                id
            )));
        }
        Self::with_payload(u32::from(id), false, payload)
    }

    fn with_payload(id: u32, extended: bool, payload: &[u8]) -> GatewayResult<Self> {
        if payload.len() > MAX_CAN_PAYLOAD {
            return Err(GatewayError::invalid_frame(format!(
                "CAN payload of {} bytes exceeds {}",
                payload.len(),
                MAX_CAN_PAYLOAD
            )));
        }
        let mut data = [0u8; MAX_CAN_PAYLOAD];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            id,
            extended,
            data,
            len: payload.len() as u8,
        })
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Payload bytes (`len` of them)
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Data length code
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Fields of a 29-bit J1939 identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct J1939Id {
    pub priority: u8,
    pub data_page: bool,
    pub pdu_format: u8,
    pub pdu_specific: u8,
    pub source_address: u8,
}

impl J1939Id {
    pub fn from_raw(id: u32) -> Self {
        Self {
            priority: ((id >> 26) & 0x07) as u8,
            data_page: (id >> 24) & 0x01 != 0,
            pdu_format: ((id >> 16) & 0xFF) as u8,
            pdu_specific: ((id >> 8) & 0xFF) as u8,
            source_address: (id & 0xFF) as u8,
        }
    }

    /// PDU1 frames are destination-specific
    #[inline]
    pub fn is_pdu1(&self) -> bool {
        self.pdu_format < PDU2_THRESHOLD
    }

    /// Parameter group number
    pub fn pgn(&self) -> u32 {
        let pf = u32::from(self.pdu_format);
        if self.is_pdu1() {
            pf << 8
        } else {
            (pf << 8) | u32::from(self.pdu_specific)
        }
    }

    /// Destination address of a PDU1 frame
    pub fn destination(&self) -> Option<u8> {
        self.is_pdu1().then_some(self.pdu_specific)
    }
}

impl fmt::Display for J1939Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pgn=0x{:04X} sa=0x{:02X} prio={}",
            self.pgn(),
            self.source_address,
            self.priority
        )
    }
}

/// One decoded engine parameter in gateway storage units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineParameter {
    /// rpm
    Rpm(u32),
    /// °C × 10
    EngineTemp(u16),
    /// °C × 10
    CoolantTemp(u16),
    /// kPa
    OilPressure(u16),
    /// L/h × 100
    FuelRate(u32),
    /// hours
    EngineHours(u32),
    /// percent
    EngineLoad(u16),
    /// percent
    ThrottlePos(u16),
    /// V × 10
    BatteryVoltage(u16),
    /// DM1 lamp status (high byte) and flash status (low byte)
    ErrorFlags(u16),
    DtcCount(u16),
}

/// Parameters carried by one frame
pub type ParameterSet = heapless::Vec<EngineParameter, 4>;

/// Successful decode result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub id: J1939Id,
    pub pgn: u32,
    pub name: &'static str,
    pub parameters: ParameterSet,
}

/// Entry of the PGN decode table
struct PgnDecoder {
    pgn: u32,
    name: &'static str,
    min_len: usize,
    decode: fn(&[u8]) -> ParameterSet,
}

/// Canonical PGN table; every recognized PGN is decoded here and nowhere else.
const DECODERS: &[PgnDecoder] = &[
    PgnDecoder {
        pgn: PGN_ENGINE_SPEED,
        name: "Engine Speed",
        min_len: 4,
        decode: decode_engine_speed,
    },
    PgnDecoder {
        pgn: PGN_ENGINE_TEMP,
        name: "Engine Temperature",
        min_len: 1,
        decode: decode_engine_temp,
    },
    PgnDecoder {
        pgn: PGN_ENGINE_FLUID_LEVEL,
        name: "Engine Fluid Level/Pressure",
        min_len: 4,
        decode: decode_fluid_level,
    },
    PgnDecoder {
        pgn: PGN_ENGINE_HOURS,
        name: "Engine Hours",
        min_len: 4,
        decode: decode_engine_hours,
    },
    PgnDecoder {
        pgn: PGN_FUEL_ECONOMY,
        name: "Fuel Economy",
        min_len: 2,
        decode: decode_fuel_economy,
    },
    PgnDecoder {
        pgn: PGN_VEHICLE_ELECTRICAL,
        name: "Vehicle Electrical Power",
        min_len: 6,
        decode: decode_vehicle_electrical,
    },
    PgnDecoder {
        pgn: PGN_ELECTRONIC_ENGINE_1,
        name: "Electronic Engine Controller 1",
        min_len: 3,
        decode: decode_electronic_engine,
    },
    PgnDecoder {
        pgn: PGN_DIAGNOSTIC_MESSAGE_1,
        name: "DM1 Active Diagnostics",
        min_len: 2,
        decode: decode_dm1,
    },
];

fn single(param: EngineParameter) -> ParameterSet {
    let mut set = ParameterSet::new();
    // Capacity is 4; a single push cannot fail
    let _ = set.push(param);
    set
}

fn pair(first: EngineParameter, second: EngineParameter) -> ParameterSet {
    let mut set = single(first);
    let _ = set.push(second);
    set
}

fn decode_engine_speed(data: &[u8]) -> ParameterSet {
    let raw = u16::from_le_bytes([data[2], data[3]]);
    single(EngineParameter::Rpm(u32::from(raw) / 8))
}

fn decode_engine_temp(data: &[u8]) -> ParameterSet {
    // Sub-zero readings keep their two's-complement bit pattern
    let tenths = ((i16::from(data[0]) - 40) * 10) as u16;
    pair(
        EngineParameter::CoolantTemp(tenths),
        EngineParameter::EngineTemp(tenths),
    )
}

fn decode_fluid_level(data: &[u8]) -> ParameterSet {
    single(EngineParameter::OilPressure(u16::from(data[3]) * 4))
}

fn decode_engine_hours(data: &[u8]) -> ParameterSet {
    let raw = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    single(EngineParameter::EngineHours(raw / 20))
}

fn decode_fuel_economy(data: &[u8]) -> ParameterSet {
    let raw = u16::from_le_bytes([data[0], data[1]]);
    single(EngineParameter::FuelRate(u32::from(raw) * 5))
}

fn decode_vehicle_electrical(data: &[u8]) -> ParameterSet {
    let raw = u16::from_le_bytes([data[4], data[5]]);
    single(EngineParameter::BatteryVoltage(raw / 2))
}

fn decode_electronic_engine(data: &[u8]) -> ParameterSet {
    let demand = (i16::from(data[1]) - 125).max(0) as u16;
    pair(
        EngineParameter::EngineLoad(u16::from(data[2])),
        EngineParameter::ThrottlePos(demand),
    )
}

fn decode_dm1(data: &[u8]) -> ParameterSet {
    let flags = u16::from_be_bytes([data[0], data[1]]);
    // DTCs follow the two lamp bytes, four bytes each
    let dtc_count = ((data.len() - 2) / 4) as u16;
    pair(
        EngineParameter::ErrorFlags(flags),
        EngineParameter::DtcCount(dtc_count),
    )
}

/// True if the PGN has an entry in the decode table
pub fn is_supported_pgn(pgn: u32) -> bool {
    DECODERS.iter().any(|d| d.pgn == pgn)
}

/// Human-readable name of a supported PGN
pub fn pgn_name(pgn: u32) -> Option<&'static str> {
    DECODERS.iter().find(|d| d.pgn == pgn).map(|d| d.name)
}

/// Decode one CAN frame.
///
/// Standard frames, unknown PGNs and short payloads produce a
/// [`DecodeError`] and no parameters.
pub fn decode(frame: &CanFrame) -> Result<DecodedFrame, DecodeError> {
    if !frame.is_extended() {
        return Err(DecodeError::NotExtended { id: frame.id() });
    }

    let id = J1939Id::from_raw(frame.id());
    let pgn = id.pgn();
    let decoder = DECODERS
        .iter()
        .find(|d| d.pgn == pgn)
        .ok_or(DecodeError::UnrecognizedPgn { pgn })?;

    let payload = frame.payload();
    if payload.len() < decoder.min_len {
        return Err(DecodeError::TruncatedPayload {
            pgn,
            len: payload.len(),
            required: decoder.min_len,
        });
    }

    let parameters = (decoder.decode)(payload);
    trace!("J1939 {} ({}): {:?}", id, decoder.name, parameters);

    Ok(DecodedFrame {
        id,
        pgn,
        name: decoder.name,
        parameters,
    })
}
