//! # J1939 Modbus Gateway - Engine Telemetry Bridge
//!
//! Listens to a J1939 CAN bus (250 kbit/s, 29-bit identifiers), decodes a
//! fixed set of engine PGNs into one engine state record, and serves that
//! record to a Modbus RTU master as a fixed block of 21 registers.
//!
//! ## Features
//!
//! - **Single decode table**: one `PGN -> decoder` table with minimum payload lengths
//! - **Standard RTU framing**: t3.5 silent-interval frame boundaries, CRC16/MODBUS
//! - **Stale data flag**: status register bit 15 raised after 5 s without CAN data
//! - **Hardware-free testing**: CAN and serial access behind capability traits
//! - **Cooperative loop**: no locking, nothing blocks
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Served |
//! |------|----------|--------|
//! | 0x03 | Read Holding Registers | ✅ |
//! | 0x04 | Read Input Registers | ✅ (same map) |
//! | other | | exception 0x01 |
//!
//! ## Decoded PGNs
//!
//! | PGN | Name | Fields |
//! |-----|------|--------|
//! | 0xF004 | Engine Speed | rpm |
//! | 0xFEEE | Engine Temperature | coolant temp, engine temp |
//! | 0xFEFC | Engine Fluid Level/Pressure | oil pressure |
//! | 0xFEE5 | Engine Hours | engine hours |
//! | 0xFEF2 | Fuel Economy | fuel rate |
//! | 0xFEF7 | Vehicle Electrical Power | battery voltage |
//! | 0xF003 | Electronic Engine Controller 1 | engine load, throttle |
//! | 0xFECA | DM1 Active Diagnostics | error flags, DTC count |
//!
//! ## Quick Start
//!
//! Requires the `rtu` and `socketcan` features.
//!
//! ```rust,ignore
//! use j1939_modbus_gateway::{Gateway, GatewayConfig, GatewayResult};
//! use j1939_modbus_gateway::transport::{SerialPortTransport, SocketCanTransceiver};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> GatewayResult<()> {
//!     let config = GatewayConfig::new().with_slave_id(1);
//!     let can = SocketCanTransceiver::open(&config.can_interface).ok();
//!     let serial = SerialPortTransport::open(&config.serial)?;
//!
//!     let mut gateway = Gateway::new(config, can, serial)?;
//!     gateway.run_until(tokio::signal::ctrl_c()).await;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Error types and result handling
pub mod error;

/// Protocol constants
pub mod constants;

/// Stack-allocated Modbus PDU
pub mod pdu;

/// RTU CRC and silent-interval framing
pub mod rtu;

/// J1939 identifier parsing and PGN decoding
pub mod j1939;

// ============================================================================
// Gateway modules
// ============================================================================

/// Engine state record and its owner
pub mod state;

/// Register map projection
pub mod registers;

/// Modbus RTU slave engine
pub mod server;

/// Communication staleness monitor
pub mod staleness;

/// CAN and serial capability traits
pub mod transport;

/// Monotonic time source
pub mod clock;

/// Runtime configuration and persisted settings
pub mod config;

/// Control loop
pub mod gateway;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime ===
pub use tokio;

// === Error handling ===
pub use error::{DecodeError, ExceptionCode, GatewayError, GatewayResult, ProtocolError};

// === Core types ===
pub use j1939::{decode, CanFrame, DecodedFrame, EngineParameter, J1939Id};
pub use pdu::{ModbusPdu, PduBuilder, ReadRequest, RegisterKind};
pub use registers::{project, RegisterMap};
pub use rtu::{crc16, RtuAdu, RtuFramer};
pub use state::{EngineState, EngineStore};

// === Gateway ===
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ConfigStore, GatewayConfig, MemoryConfigStore, NetworkCredentials, SerialParity,
    SerialSettings,
};
pub use gateway::{Gateway, GatewayStats};
pub use server::{RtuServer, ServerState, ServerStats};
pub use staleness::StalenessMonitor;
pub use transport::{CanErrorStatus, CanErrorTracker, CanFault, CanTransceiver, SerialTransport};

// === Protocol limits ===
pub use constants::{MAX_PDU_SIZE, MAX_READ_REGISTERS, REGISTER_COUNT, STATUS_COMM_STALE};

#[cfg(feature = "socketcan")]
pub use transport::SocketCanTransceiver;

#[cfg(feature = "rtu")]
pub use transport::SerialPortTransport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "J1939 Modbus Gateway v{} - J1939 engine data served over Modbus RTU",
        VERSION
    )
}
