//! Modbus RTU slave engine
//!
//! One request/response exchange per completed frame:
//!
//! ```text
//! Idle -> Receiving -> Validating -> Dispatching -> Responding -> Idle
//! ```
//!
//! CRC mismatches and frames for other slaves are dropped without a reply.
//! Unsupported function codes and bad ranges are answered with a standard
//! exception response. Holding and input reads share one register map.

use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::constants::{DEFAULT_BAUD_RATE, MAX_RTU_FRAME_SIZE};
use crate::error::{GatewayResult, ProtocolError};
use crate::pdu::{ModbusPdu, PduBuilder, ReadRequest};
use crate::registers::project;
use crate::rtu::{format_hex_packet, RtuAdu, RtuFramer};
use crate::state::EngineStore;
use crate::transport::SerialTransport;

/// Exchange phase of the slave engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    #[default]
    Idle,
    Receiving,
    Validating,
    Dispatching,
    Responding,
}

/// Server statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Candidate frames delimited by the framer
    pub frames_received: u64,
    pub runt_frames: u64,
    pub crc_errors: u64,
    /// Valid frames addressed to another slave
    pub foreign_frames: u64,
    pub oversize_frames: u64,
    pub responses: u64,
    pub exceptions: u64,
}

impl ServerStats {
    /// Frames dropped without any reply
    pub fn dropped(&self) -> u64 {
        self.runt_frames + self.crc_errors + self.foreign_frames + self.oversize_frames
    }
}

/// Modbus RTU slave serving the projected engine registers
#[derive(Debug)]
pub struct RtuServer {
    slave_id: u8,
    framer: RtuFramer,
    state: ServerState,
    stats: ServerStats,
    packet_logging: bool,
}

impl RtuServer {
    pub fn new(slave_id: u8, baud_rate: u32) -> Self {
        let baud_rate = if baud_rate == 0 {
            DEFAULT_BAUD_RATE
        } else {
            baud_rate
        };
        debug!(
            "RTU server: slave {} at {} baud, t3.5 = {:?}",
            slave_id,
            baud_rate,
            RtuFramer::silent_interval_for(baud_rate)
        );
        Self {
            slave_id,
            framer: RtuFramer::new(baud_rate),
            state: ServerState::Idle,
            stats: ServerStats::default(),
            packet_logging: false,
        }
    }

    /// Enable hex dumps of every frame at debug level
    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn stats(&self) -> ServerStats {
        let mut stats = self.stats;
        stats.oversize_frames = self.framer.overflow_count();
        stats
    }

    /// Service the serial line once: read what is available, and answer a
    /// request whose trailing silent interval has elapsed by `now`.
    pub fn poll<T: SerialTransport>(
        &mut self,
        transport: &mut T,
        store: &EngineStore,
        now: Instant,
    ) -> GatewayResult<()> {
        let mut buf = [0u8; MAX_RTU_FRAME_SIZE];
        let n = transport.read_available(&mut buf)?;

        let completed = self.framer.poll(&buf[..n], now);
        self.state = if self.framer.is_receiving() {
            ServerState::Receiving
        } else {
            ServerState::Idle
        };

        let Some(frame) = completed else {
            return Ok(());
        };

        let reply = self.handle_frame(&frame, store);
        if let Some(adu) = reply {
            self.state = ServerState::Responding;
            let result = transport.write(adu.as_slice());
            if self.packet_logging {
                debug!("RTU tx [{}]", format_hex_packet(adu.as_slice()));
            }
            self.state = if self.framer.is_receiving() {
                ServerState::Receiving
            } else {
                ServerState::Idle
            };
            result?;
        }

        Ok(())
    }

    /// Validate and dispatch one complete frame; returns the reply to
    /// transmit, or `None` when the frame is dropped.
    pub fn handle_frame(&mut self, frame: &[u8], store: &EngineStore) -> Option<RtuAdu> {
        self.stats.frames_received += 1;
        if self.packet_logging {
            debug!("RTU rx [{}]", format_hex_packet(frame));
        }

        self.state = ServerState::Validating;
        let (fc, outcome) = self.process(frame, store);
        self.state = ServerState::Idle;

        match outcome {
            Ok(adu) => {
                self.stats.responses += 1;
                Some(adu)
            }
            Err(err) => match err.exception_code() {
                Some(code) => {
                    debug!("RTU exception 0x{:02X}: {}", code.to_u8(), err);
                    let reply = PduBuilder::build_exception(fc, code)
                        .and_then(|pdu| RtuAdu::encode(self.slave_id, &pdu));
                    match reply {
                        Ok(adu) => {
                            self.stats.exceptions += 1;
                            Some(adu)
                        }
                        Err(e) => {
                            warn!("failed to encode exception response: {}", e);
                            None
                        }
                    }
                }
                None => {
                    self.record_drop(&err);
                    None
                }
            },
        }
    }

    /// Returns the request function code alongside the outcome so that
    /// exceptions can echo it.
    fn process(
        &mut self,
        frame: &[u8],
        store: &EngineStore,
    ) -> (u8, Result<RtuAdu, ProtocolError>) {
        let (slave_id, pdu) = match RtuAdu::verify(frame) {
            Ok(parts) => parts,
            Err(e) => return (0, Err(e)),
        };
        let fc = pdu.first().copied().unwrap_or(0);

        if slave_id != self.slave_id {
            return (
                fc,
                Err(ProtocolError::ForeignSlaveAddress {
                    expected: self.slave_id,
                    received: slave_id,
                }),
            );
        }

        self.state = ServerState::Dispatching;
        let request = match ReadRequest::parse(pdu) {
            Ok(r) => r,
            Err(e) => return (fc, Err(e)),
        };
        trace!(
            "{} start={} qty={}",
            ModbusPdu::function_code_description(fc),
            request.start_address,
            request.quantity
        );

        (fc, self.read_registers(&request, store))
    }

    fn read_registers(
        &self,
        request: &ReadRequest,
        store: &EngineStore,
    ) -> Result<RtuAdu, ProtocolError> {
        // Quantity and body length were already checked by ReadRequest::parse,
        // so an oversized quantity answers 0x03 even when the range is also bad.
        let map = project(&store.snapshot());
        let registers = map
            .slice(request.start_address, request.quantity)
            .ok_or(ProtocolError::IllegalDataAddress {
                start: request.start_address,
                quantity: request.quantity,
            })?;

        PduBuilder::build_read_response(request.function_code(), registers)
            .and_then(|pdu| RtuAdu::encode(self.slave_id, &pdu))
            .map_err(|e| ProtocolError::IllegalDataValue {
                message: e.to_string(),
            })
    }

    fn record_drop(&mut self, err: &ProtocolError) {
        match err {
            ProtocolError::RuntFrame { .. } => {
                self.stats.runt_frames += 1;
                trace!("RTU drop: {}", err);
            }
            ProtocolError::CrcMismatch { .. } => {
                self.stats.crc_errors += 1;
                debug!("RTU drop: {}", err);
            }
            ProtocolError::ForeignSlaveAddress { .. } => {
                self.stats.foreign_frames += 1;
                trace!("RTU drop: {}", err);
            }
            _ => {}
        }
    }

    /// Apply a new slave address; pending bytes are discarded.
    pub fn set_slave_id(&mut self, slave_id: u8) {
        if slave_id != self.slave_id {
            info!("RTU slave address {} -> {}", self.slave_id, slave_id);
            self.slave_id = slave_id;
            self.framer.reset();
            self.state = ServerState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::j1939::{decode, CanFrame, PGN_ENGINE_SPEED};
    use crate::rtu::crc16;
    use std::time::Duration;

    fn with_crc(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        frame.extend_from_slice(&crc16(body).to_le_bytes());
        frame
    }

    fn store_with_rpm(rpm: u32) -> EngineStore {
        let raw = ((rpm * 8) as u16).to_le_bytes();
        let id = (3 << 26) | (PGN_ENGINE_SPEED << 8);
        let frame = CanFrame::new_extended(id, &[0, 0, raw[0], raw[1]]).unwrap();
        let mut store = EngineStore::new();
        store.apply(&decode(&frame).unwrap(), 100);
        store
    }

    #[test]
    fn test_read_holding_rpm() {
        let mut server = RtuServer::new(1, 19200);
        let store = store_with_rpm(2500);

        let reply = server
            .handle_frame(&with_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]), &store)
            .unwrap();
        assert_eq!(
            reply.as_slice(),
            with_crc(&[0x01, 0x03, 0x04, 0x00, 0x00, 0x09, 0xC4]).as_slice()
        );
        assert_eq!(server.stats().responses, 1);
        assert_eq!(server.state(), ServerState::Idle);
    }

    #[test]
    fn test_read_input_uses_same_map() {
        let mut server = RtuServer::new(1, 19200);
        let store = store_with_rpm(2500);

        let reply = server
            .handle_frame(&with_crc(&[0x01, 0x04, 0x00, 0x01, 0x00, 0x01]), &store)
            .unwrap();
        assert_eq!(
            reply.as_slice(),
            with_crc(&[0x01, 0x04, 0x02, 0x09, 0xC4]).as_slice()
        );
    }

    #[test]
    fn test_exceptions() {
        let mut server = RtuServer::new(1, 19200);
        let store = EngineStore::new();

        // 19 + 5 > 21
        let reply = server
            .handle_frame(&with_crc(&[0x01, 0x03, 0x00, 0x13, 0x00, 0x05]), &store)
            .unwrap();
        assert_eq!(reply.as_slice(), with_crc(&[0x01, 0x83, 0x02]).as_slice());

        // write single register is not supported
        let reply = server
            .handle_frame(&with_crc(&[0x01, 0x06, 0x00, 0x00, 0x00, 0x01]), &store)
            .unwrap();
        assert_eq!(reply.as_slice(), with_crc(&[0x01, 0x86, 0x01]).as_slice());

        // quantity 0
        let reply = server
            .handle_frame(&with_crc(&[0x01, 0x04, 0x00, 0x00, 0x00, 0x00]), &store)
            .unwrap();
        assert_eq!(reply.as_slice(), with_crc(&[0x01, 0x84, 0x03]).as_slice());

        // quantity is checked before the address range
        let reply = server
            .handle_frame(&with_crc(&[0x01, 0x03, 0x00, 0x30, 0x00, 0x7E]), &store)
            .unwrap();
        assert_eq!(reply.as_slice(), with_crc(&[0x01, 0x83, 0x03]).as_slice());

        assert_eq!(server.stats().exceptions, 4);
    }

    #[test]
    fn test_oversized_quantity_beats_bad_range() {
        let mut server = RtuServer::new(1, 19200);
        let store = EngineStore::new();

        // start 100, quantity 200: both invalid, quantity wins
        let reply = server
            .handle_frame(&with_crc(&[0x01, 0x03, 0x00, 0x64, 0x00, 0xC8]), &store)
            .unwrap();
        assert_eq!(reply.as_slice(), with_crc(&[0x01, 0x83, 0x03]).as_slice());

        // start 100, quantity 1: range alone is bad
        let reply = server
            .handle_frame(&with_crc(&[0x01, 0x03, 0x00, 0x64, 0x00, 0x01]), &store)
            .unwrap();
        assert_eq!(reply.as_slice(), with_crc(&[0x01, 0x83, 0x02]).as_slice());
    }

    #[test]
    fn test_silent_drops() {
        let mut server = RtuServer::new(1, 19200);
        let store = store_with_rpm(2500);

        let mut bad_crc = with_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]);
        bad_crc[7] ^= 0xFF;
        assert!(server.handle_frame(&bad_crc, &store).is_none());

        let foreign = with_crc(&[0x02, 0x03, 0x00, 0x00, 0x00, 0x02]);
        assert!(server.handle_frame(&foreign, &store).is_none());

        let broadcast = with_crc(&[0x00, 0x03, 0x00, 0x00, 0x00, 0x02]);
        assert!(server.handle_frame(&broadcast, &store).is_none());

        assert!(server.handle_frame(&[0x01, 0x03], &store).is_none());

        let stats = server.stats();
        assert_eq!(stats.crc_errors, 1);
        assert_eq!(stats.foreign_frames, 2);
        assert_eq!(stats.runt_frames, 1);
        assert_eq!(stats.dropped(), 4);
        assert_eq!(stats.responses + stats.exceptions, 0);
    }

    struct LoopbackSerial {
        rx: Vec<u8>,
        tx: Vec<u8>,
    }

    impl SerialTransport for LoopbackSerial {
        fn read_available(&mut self, buf: &mut [u8]) -> GatewayResult<usize> {
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

    #[test]
    fn test_poll_waits_for_silent_interval() {
        let mut server = RtuServer::new(1, 19200);
        let store = store_with_rpm(2500);
        let mut serial = LoopbackSerial {
            rx: with_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]),
            tx: Vec::new(),
        };

        let t0 = Instant::now();
        server.poll(&mut serial, &store, t0).unwrap();
        assert_eq!(server.state(), ServerState::Receiving);
        assert!(serial.tx.is_empty());

        server
            .poll(&mut serial, &store, t0 + Duration::from_micros(500))
            .unwrap();
        assert!(serial.tx.is_empty());

        server
            .poll(&mut serial, &store, t0 + Duration::from_millis(3))
            .unwrap();
        assert_eq!(serial.tx.len(), 9);
        assert_eq!(serial.tx[2], 4);
        assert_eq!(server.state(), ServerState::Idle);
    }

    #[test]
    fn test_set_slave_id() {
        let mut server = RtuServer::new(1, 9600);
        server.set_slave_id(7);
        assert_eq!(server.slave_id(), 7);

        let store = EngineStore::new();
        let request = with_crc(&[0x07, 0x03, 0x00, 0x10, 0x00, 0x01]);
        let reply = server.handle_frame(&request, &store).unwrap();
        assert_eq!(reply.slave_id(), 7);
    }
}
