//! Shared mock transports for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;

use j1939_modbus_gateway::{
    crc16, CanErrorStatus, CanFrame, CanTransceiver, GatewayError, GatewayResult, SerialTransport,
};

/// Scripted CAN receive queue
#[derive(Debug, Default)]
pub struct MockCan {
    pub frames: VecDeque<CanFrame>,
    pub status: CanErrorStatus,
}

impl MockCan {
    pub fn push(&mut self, pgn: u32, payload: &[u8]) {
        self.frames.push_back(j1939_frame(pgn, 0x00, payload));
    }
}

impl CanTransceiver for MockCan {
    fn receive(&mut self) -> Option<CanFrame> {
        self.frames.pop_front()
    }

    fn poll_errors(&mut self) -> CanErrorStatus {
        self.status
    }
}

/// In-memory serial line: `rx` is what the master sent, `tx` what the
/// gateway wrote back.
#[derive(Debug, Default)]
pub struct MockSerial {
    pub rx: Vec<u8>,
    pub tx: Vec<u8>,
    pub fail_reads: bool,
}

impl MockSerial {
    pub fn send_request(&mut self, body: &[u8]) {
        self.rx.extend_from_slice(&with_crc(body));
    }

    pub fn take_tx(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx)
    }
}

impl SerialTransport for MockSerial {
    fn read_available(&mut self, buf: &mut [u8]) -> GatewayResult<usize> {
        if self.fail_reads {
            return Err(GatewayError::serial("line fault"));
        }
        let n = self.rx.len().min(buf.len());
        buf[..n].copy_from_slice(&self.rx[..n]);
        self.rx.drain(..n);
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> GatewayResult<()> {
        self.tx.extend_from_slice(bytes);
        Ok(())
    }
}

/// Priority 6 J1939 frame for a PDU2 PGN
pub fn j1939_frame(pgn: u32, source: u8, payload: &[u8]) -> CanFrame {
    let id = (6 << 26) | (pgn << 8) | u32::from(source);
    CanFrame::new_extended(id, payload).expect("valid test frame")
}

/// Append the little-endian CRC16
pub fn with_crc(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    frame.extend_from_slice(&crc16(body).to_le_bytes());
    frame
}

/// EEC1-style engine speed payload for `rpm`
pub fn engine_speed_payload(rpm: u32) -> [u8; 8] {
    let raw = ((rpm * 8) as u16).to_le_bytes();
    [0xFF, 0xFF, raw[0], raw[1], 0xFF, 0xFF, 0xFF, 0xFF]
}
