//! Error types for the gateway
//!
//! Errors are split by the bus they originate from:
//!
//! | Type | Origin | Handling |
//! |------|--------|----------|
//! | [`ProtocolError`] | Modbus RTU request | silent drop or exception response |
//! | [`DecodeError`] | J1939 CAN frame | ignored, no state change |
//! | [`GatewayError`] | transports, configuration | logged by the control loop |
//!
//! Per-frame errors never halt the control loop.

use thiserror::Error;

use crate::constants::{
    EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_DATA_VALUE, EXCEPTION_ILLEGAL_FUNCTION,
};

/// Result type used across the crate
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Modbus exception codes produced by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    /// Function code not supported (0x01)
    IllegalFunction,
    /// Requested range outside the register map (0x02)
    IllegalDataAddress,
    /// Malformed request body or quantity (0x03)
    IllegalDataValue,
}

impl ExceptionCode {
    /// Wire value of the exception code
    pub fn to_u8(self) -> u8 {
        match self {
            Self::IllegalFunction => EXCEPTION_ILLEGAL_FUNCTION,
            Self::IllegalDataAddress => EXCEPTION_ILLEGAL_DATA_ADDRESS,
            Self::IllegalDataValue => EXCEPTION_ILLEGAL_DATA_VALUE,
        }
    }
}

/// Failure while validating or dispatching a Modbus RTU request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("runt frame: {len} bytes")]
    RuntFrame { len: usize },

    #[error("crc mismatch: expected 0x{expected:04X}, got 0x{received:04X}")]
    CrcMismatch { expected: u16, received: u16 },

    #[error("frame addressed to slave {received}, configured as {expected}")]
    ForeignSlaveAddress { expected: u8, received: u8 },

    #[error("illegal function: 0x{code:02X}")]
    IllegalFunction { code: u8 },

    #[error("illegal data address: start={start}, quantity={quantity}")]
    IllegalDataAddress { start: u16, quantity: u16 },

    #[error("illegal data value: {message}")]
    IllegalDataValue { message: String },
}

impl ProtocolError {
    /// Exception to answer with, or `None` when the frame is dropped silently.
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        match self {
            Self::RuntFrame { .. } | Self::CrcMismatch { .. } | Self::ForeignSlaveAddress { .. } => {
                None
            }
            Self::IllegalFunction { .. } => Some(ExceptionCode::IllegalFunction),
            Self::IllegalDataAddress { .. } => Some(ExceptionCode::IllegalDataAddress),
            Self::IllegalDataValue { .. } => Some(ExceptionCode::IllegalDataValue),
        }
    }
}

/// Reason a CAN frame produced no engine parameter update
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("standard identifier 0x{id:03X} is not a J1939 frame")]
    NotExtended { id: u32 },

    #[error("unrecognized pgn 0x{pgn:04X}")]
    UnrecognizedPgn { pgn: u32 },

    #[error("truncated payload for pgn 0x{pgn:04X}: {len} bytes, need {required}")]
    TruncatedPayload { pgn: u32, len: usize, required: usize },
}

/// Top-level gateway error
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("can error: {message}")]
    Can { message: String },

    #[error("serial error: {message}")]
    Serial { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("invalid frame: {message}")]
    InvalidFrame { message: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    pub fn can(message: impl Into<String>) -> Self {
        Self::Can {
            message: message.into(),
        }
    }

    pub fn serial(message: impl Into<String>) -> Self {
        Self::Serial {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_errors_have_no_exception() {
        assert_eq!(ProtocolError::RuntFrame { len: 2 }.exception_code(), None);
        assert_eq!(
            ProtocolError::CrcMismatch {
                expected: 0xCDC5,
                received: 0x0000
            }
            .exception_code(),
            None
        );
        assert_eq!(
            ProtocolError::ForeignSlaveAddress {
                expected: 1,
                received: 2
            }
            .exception_code(),
            None
        );
    }

    #[test]
    fn test_exception_mapping() {
        assert_eq!(
            ProtocolError::IllegalFunction { code: 0x06 }.exception_code(),
            Some(ExceptionCode::IllegalFunction)
        );
        assert_eq!(
            ProtocolError::IllegalDataAddress {
                start: 19,
                quantity: 5
            }
            .exception_code()
            .map(ExceptionCode::to_u8),
            Some(0x02)
        );
    }

    #[test]
    fn test_exception_code_wire_values() {
        assert_eq!(ExceptionCode::IllegalFunction.to_u8(), 0x01);
        assert_eq!(ExceptionCode::IllegalDataAddress.to_u8(), 0x02);
        assert_eq!(ExceptionCode::IllegalDataValue.to_u8(), 0x03);
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::CrcMismatch {
            expected: 0xCDC5,
            received: 0x1234,
        };
        assert_eq!(err.to_string(), "crc mismatch: expected 0xCDC5, got 0x1234");

        let err = DecodeError::TruncatedPayload {
            pgn: 0xF004,
            len: 3,
            required: 4,
        };
        assert_eq!(
            err.to_string(),
            "truncated payload for pgn 0xF004: 3 bytes, need 4"
        );

        let err = GatewayError::config("slave address 0 out of range");
        assert_eq!(
            err.to_string(),
            "configuration error: slave address 0 out of range"
        );
    }

    #[test]
    fn test_from_protocol_error() {
        let err: GatewayError = ProtocolError::IllegalFunction { code: 0x10 }.into();
        assert!(matches!(err, GatewayError::Protocol(_)));
        assert_eq!(err.to_string(), "illegal function: 0x10");
    }
}
