//! Modbus PDU data structure
//!
//! Use a fixed-size stack array to avoid heap allocation on the request path.

use tracing::trace;

use crate::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, MAX_PDU_SIZE,
    MAX_READ_REGISTERS, READ_REQUEST_PDU_SIZE,
};
use crate::error::{ExceptionCode, GatewayError, GatewayResult, ProtocolError};

/// PDU with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    /// Fixed-size buffer (stack)
    data: [u8; MAX_PDU_SIZE],
    /// Actual data length
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> GatewayResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(GatewayError::invalid_frame("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> GatewayResult<()> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)?;
        Ok(())
    }

    /// Get immutable data slice
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Get current length
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        if self.len > 0 {
            Some(self.data[0])
        } else {
            None
        }
    }

    /// Get human-readable function code description
    pub fn function_code_description(fc: u8) -> &'static str {
        match fc & 0x7F {
            0x01 => "Read Coils",
            0x02 => "Read Discrete Inputs",
            0x03 => "Read Holding Registers",
            0x04 => "Read Input Registers",
            0x05 => "Write Single Coil",
            0x06 => "Write Single Register",
            0x0F => "Write Multiple Coils",
            0x10 => "Write Multiple Registers",
            0x17 => "Read/Write Multiple Registers",
            _ => "Unknown Function",
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    /// Create a new builder
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    /// Set function code
    #[inline]
    pub fn function_code(mut self, fc: u8) -> GatewayResult<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    /// Add a byte
    #[inline]
    pub fn byte(mut self, b: u8) -> GatewayResult<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    /// Add registers in big-endian
    #[inline]
    pub fn registers(mut self, values: &[u16]) -> GatewayResult<Self> {
        for &value in values {
            self.pdu.push_u16(value)?;
        }
        Ok(self)
    }

    /// Build the PDU
    #[inline]
    pub fn build(self) -> ModbusPdu {
        if let Some(fc) = self.pdu.function_code() {
            trace!(
                "PDU built: FC={:02X} ({}), total_len={}",
                fc,
                ModbusPdu::function_code_description(fc),
                self.pdu.len()
            );
        }
        self.pdu
    }

    /// Build a read registers response PDU
    ///
    /// Layout: `[fc, byte_count, reg0_hi, reg0_lo, ...]`
    pub fn build_read_response(fc: u8, registers: &[u16]) -> GatewayResult<ModbusPdu> {
        if registers.len() > MAX_READ_REGISTERS as usize {
            return Err(GatewayError::invalid_frame(format!(
                "too many registers for one response: {}",
                registers.len()
            )));
        }
        let byte_count = (registers.len() * 2) as u8;
        Ok(PduBuilder::new()
            .function_code(fc)?
            .byte(byte_count)?
            .registers(registers)?
            .build())
    }

    /// Build an exception response PDU: `[fc | 0x80, code]`
    pub fn build_exception(fc: u8, code: ExceptionCode) -> GatewayResult<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(fc | EXCEPTION_FLAG)?
            .byte(code.to_u8())?
            .build())
    }
}

/// Which register space a read addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    Holding,
    Input,
}

/// Parsed FC03/FC04 request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub kind: RegisterKind,
    pub start_address: u16,
    pub quantity: u16,
}

impl ReadRequest {
    /// Parse a request PDU. Validation order: function code, body length,
    /// quantity. Range checks against the register map happen at dispatch.
    pub fn parse(pdu: &[u8]) -> Result<Self, ProtocolError> {
        let fc = pdu.first().copied().unwrap_or(0);
        let kind = match fc {
            FC_READ_HOLDING_REGISTERS => RegisterKind::Holding,
            FC_READ_INPUT_REGISTERS => RegisterKind::Input,
            code => return Err(ProtocolError::IllegalFunction { code }),
        };

        if pdu.len() != READ_REQUEST_PDU_SIZE {
            return Err(ProtocolError::IllegalDataValue {
                message: format!("read request PDU is {} bytes, expected 5", pdu.len()),
            });
        }

        let start_address = u16::from_be_bytes([pdu[1], pdu[2]]);
        let quantity = u16::from_be_bytes([pdu[3], pdu[4]]);
        if quantity == 0 || quantity > MAX_READ_REGISTERS {
            return Err(ProtocolError::IllegalDataValue {
                message: format!("quantity {} outside 1-{}", quantity, MAX_READ_REGISTERS),
            });
        }

        Ok(Self {
            kind,
            start_address,
            quantity,
        })
    }

    /// Function code this request arrived with
    pub fn function_code(&self) -> u8 {
        match self.kind {
            RegisterKind::Holding => FC_READ_HOLDING_REGISTERS,
            RegisterKind::Input => FC_READ_INPUT_REGISTERS,
        }
    }
}
