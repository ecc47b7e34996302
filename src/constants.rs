//! Gateway protocol constants
//!
//! Modbus values are derived from the official Modbus over Serial Line
//! specification; J1939 values from SAE J1939-21/-71.
//! - Maximum RTU ADU size: 256 bytes
//! - Maximum PDU size: 253 bytes (ADU - slave address - CRC)

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum RTU ADU size (slave address + PDU + CRC)
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Smallest well-formed RTU frame: slave id + function code + CRC
pub const MIN_RTU_FRAME_SIZE: usize = 4;

/// Size of a read request PDU: FC(1) + Address(2) + Quantity(2)
pub const READ_REQUEST_PDU_SIZE: usize = 5;

/// Maximum number of registers for FC03/FC04 (Read Holding/Input Registers)
///
/// Calculation for response PDU:
/// - Function Code: 1 byte
/// - Byte Count: 1 byte
/// - Register Data: N × 2 bytes
/// - Total: 1 + 1 + (N × 2) ≤ 253
/// - Therefore: N ≤ (253 - 2) / 2 = 125.5 → 125 registers
pub const MAX_READ_REGISTERS: u16 = 125;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

// ============================================================================
// Register Map
// ============================================================================

/// Number of registers exposed by the gateway (addresses 0-20)
pub const REGISTER_COUNT: usize = 21;

/// `statusFlags` bit raised while CAN data is older than the stale timeout
pub const STATUS_COMM_STALE: u16 = 0x8000;

// ============================================================================
// Serial Line
// ============================================================================

/// Default Modbus slave address
pub const DEFAULT_SLAVE_ID: u8 = 1;

/// Lowest assignable slave address
pub const MIN_SLAVE_ID: u8 = 1;

/// Highest assignable slave address (248-255 are reserved)
pub const MAX_SLAVE_ID: u8 = 247;

/// Default serial baud rate (8N1)
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Bits per RTU character: start + 8 data + parity/stop + stop
pub const BITS_PER_CHAR: u64 = 11;

/// Fixed t3.5 used above 19200 baud (Modbus over Serial Line, 2.5.1.1)
pub const FIXED_SILENT_INTERVAL_US: u64 = 1750;

// ============================================================================
// CAN / J1939
// ============================================================================

/// J1939 bus bitrate
pub const J1939_BITRATE: u32 = 250_000;

/// Mask for a 29-bit extended CAN identifier
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// Maximum classic CAN payload
pub const MAX_CAN_PAYLOAD: usize = 8;

/// PDU format values below this carry a destination address (PDU1)
pub const PDU2_THRESHOLD: u8 = 240;

/// Default communication-stale timeout in milliseconds
pub const DEFAULT_STALE_TIMEOUT_MS: u32 = 5000;

/// Upper bound on CAN frames drained per control loop iteration
pub const MAX_CAN_FRAMES_PER_POLL: usize = 32;
