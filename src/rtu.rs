//! Modbus RTU framing
//!
//! An RTU ADU is `slave id + PDU + CRC16`, the CRC transmitted low byte first.
//! Frame boundaries on the wire are marked by a silent interval of at least
//! 3.5 character times (t3.5); [`RtuFramer`] applies that rule to bytes read
//! from a non-blocking serial transport.

use std::time::{Duration, Instant};

use crc::{Crc, CRC_16_MODBUS};
use tracing::{debug, trace};

use crate::constants::{
    BITS_PER_CHAR, DEFAULT_BAUD_RATE, FIXED_SILENT_INTERVAL_US, MAX_RTU_FRAME_SIZE,
    MIN_RTU_FRAME_SIZE,
};
use crate::error::{GatewayError, GatewayResult, ProtocolError};
use crate::pdu::ModbusPdu;

/// CRC calculator for RTU (poly 0xA001 reflected, init 0xFFFF)
pub const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Fixed-capacity buffer holding one RTU frame
pub type FrameBuffer = heapless::Vec<u8, MAX_RTU_FRAME_SIZE>;

/// Calculate the Modbus CRC16 of `data`
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Format raw bytes as hex string for packet logging
pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Encoded RTU application data unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuAdu {
    data: FrameBuffer,
}

impl RtuAdu {
    /// Wrap a PDU with the slave address and trailing CRC
    pub fn encode(slave_id: u8, pdu: &ModbusPdu) -> GatewayResult<Self> {
        let mut data = FrameBuffer::new();
        data.push(slave_id)
            .map_err(|_| GatewayError::invalid_frame("RTU frame buffer full"))?;
        data.extend_from_slice(pdu.as_slice())
            .map_err(|_| GatewayError::invalid_frame("PDU does not fit in RTU frame"))?;

        let crc = crc16(&data);
        data.extend_from_slice(&crc.to_le_bytes())
            .map_err(|_| GatewayError::invalid_frame("no room for RTU CRC"))?;

        Ok(Self { data })
    }

    /// Check length and CRC of a received frame.
    ///
    /// Returns the slave address and the PDU slice between address and CRC.
    pub fn verify(frame: &[u8]) -> Result<(u8, &[u8]), ProtocolError> {
        if frame.len() < MIN_RTU_FRAME_SIZE {
            return Err(ProtocolError::RuntFrame { len: frame.len() });
        }

        let data_len = frame.len() - 2;
        let received = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
        let expected = crc16(&frame[..data_len]);
        if received != expected {
            return Err(ProtocolError::CrcMismatch { expected, received });
        }

        Ok((frame[0], &frame[1..data_len]))
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Slave address of the frame
    pub fn slave_id(&self) -> u8 {
        self.data.first().copied().unwrap_or(0)
    }
}

/// Silent-interval frame assembler.
///
/// Bytes are accumulated until the line has been idle for t3.5; the buffered
/// bytes are then released as one candidate frame. Frames that grow past the
/// RTU size limit are discarded whole.
#[derive(Debug)]
pub struct RtuFramer {
    buffer: FrameBuffer,
    last_byte_at: Option<Instant>,
    silent_interval: Duration,
    overflowed: bool,
    overflow_count: u64,
}

impl RtuFramer {
    /// Create a framer for the given baud rate
    pub fn new(baud_rate: u32) -> Self {
        Self {
            buffer: FrameBuffer::new(),
            last_byte_at: None,
            silent_interval: Self::silent_interval_for(baud_rate),
            overflowed: false,
            overflow_count: 0,
        }
    }

    /// t3.5 for a baud rate: 3.5 characters of 11 bits, or 1.75 ms above 19200 baud
    pub fn silent_interval_for(baud_rate: u32) -> Duration {
        let baud = if baud_rate == 0 {
            DEFAULT_BAUD_RATE
        } else {
            baud_rate
        };
        if baud > 19200 {
            return Duration::from_micros(FIXED_SILENT_INTERVAL_US);
        }
        // 3.5 * 11 bits * 1e6 us / baud
        let micros = (BITS_PER_CHAR * 35 * 1_000_000 / 10).div_ceil(u64::from(baud));
        Duration::from_micros(micros)
    }

    /// Current t3.5
    pub fn silent_interval(&self) -> Duration {
        self.silent_interval
    }

    /// Frames discarded for exceeding the RTU size limit
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// True while a frame is partially received
    pub fn is_receiving(&self) -> bool {
        !self.buffer.is_empty() || self.overflowed
    }

    /// Feed bytes read at `now` (possibly none).
    ///
    /// Returns the previously buffered frame when the silence before `now`
    /// reached t3.5; new bytes then start the next frame.
    pub fn poll(&mut self, incoming: &[u8], now: Instant) -> Option<FrameBuffer> {
        let completed = match self.last_byte_at {
            Some(last) if now.saturating_duration_since(last) >= self.silent_interval => {
                self.take_frame()
            }
            _ => None,
        };

        if !incoming.is_empty() {
            trace!("RTU rx {} bytes", incoming.len());
            if !self.overflowed && self.buffer.extend_from_slice(incoming).is_err() {
                debug!(
                    "RTU frame exceeds {} bytes, discarding",
                    MAX_RTU_FRAME_SIZE
                );
                self.buffer.clear();
                self.overflowed = true;
            }
            self.last_byte_at = Some(now);
        }

        completed
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_byte_at = None;
        self.overflowed = false;
    }

    fn take_frame(&mut self) -> Option<FrameBuffer> {
        self.last_byte_at = None;
        if self.overflowed {
            self.overflowed = false;
            self.overflow_count += 1;
            return None;
        }
        if self.buffer.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_reference_vectors() {
        // Canonical read request examples from the Modbus serial line guide
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_encode_appends_crc_low_byte_first() {
        let mut pdu = ModbusPdu::new();
        pdu.push(0x03).unwrap();
        pdu.push_u16(0x0000).unwrap();
        pdu.push_u16(0x000A).unwrap();
        let adu = RtuAdu::encode(1, &pdu).unwrap();
        assert_eq!(
            adu.as_slice(),
            &[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]
        );
        assert_eq!(adu.slave_id(), 1);
    }

    #[test]
    fn test_verify() {
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];
        let (slave, pdu) = RtuAdu::verify(&frame).unwrap();
        assert_eq!(slave, 1);
        assert_eq!(pdu, &[0x03, 0x00, 0x00, 0x00, 0x01]);

        let corrupted = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0B];
        assert!(matches!(
            RtuAdu::verify(&corrupted),
            Err(ProtocolError::CrcMismatch {
                expected: 0x0A84,
                received: 0x0B84
            })
        ));

        assert_eq!(
            RtuAdu::verify(&[0x01, 0x03, 0x00]),
            Err(ProtocolError::RuntFrame { len: 3 })
        );
    }

    #[test]
    fn test_silent_interval() {
        // 38.5 bits at 9600 baud
        assert_eq!(
            RtuFramer::silent_interval_for(9600),
            Duration::from_micros(4011)
        );
        assert_eq!(
            RtuFramer::silent_interval_for(19200),
            Duration::from_micros(2006)
        );
        assert_eq!(
            RtuFramer::silent_interval_for(115200),
            Duration::from_micros(1750)
        );
    }

    #[test]
    fn test_framer_waits_for_silence() {
        let mut framer = RtuFramer::new(19200);
        let t0 = Instant::now();
        let request = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];

        // Request split across two reads
        assert!(framer.poll(&request[..3], t0).is_none());
        assert!(framer
            .poll(&request[3..], t0 + Duration::from_micros(500))
            .is_none());
        assert!(framer.is_receiving());

        // Not yet silent for t3.5
        assert!(framer.poll(&[], t0 + Duration::from_millis(2)).is_none());

        let frame = framer.poll(&[], t0 + Duration::from_millis(3)).unwrap();
        assert_eq!(&frame[..], &request);
        assert!(!framer.is_receiving());
    }

    #[test]
    fn test_framer_separates_frames_by_gap() {
        let mut framer = RtuFramer::new(19200);
        let t0 = Instant::now();

        assert!(framer.poll(&[0xAA, 0xBB], t0).is_none());
        let first = framer
            .poll(&[0x01, 0x02], t0 + Duration::from_millis(5))
            .unwrap();
        assert_eq!(&first[..], &[0xAA, 0xBB]);

        let second = framer.poll(&[], t0 + Duration::from_millis(10)).unwrap();
        assert_eq!(&second[..], &[0x01, 0x02]);
    }

    #[test]
    fn test_framer_discards_oversize_frame() {
        let mut framer = RtuFramer::new(19200);
        let t0 = Instant::now();

        let junk = [0x55u8; 200];
        assert!(framer.poll(&junk, t0).is_none());
        assert!(framer.poll(&junk, t0 + Duration::from_micros(100)).is_none());
        assert!(framer.poll(&[], t0 + Duration::from_millis(10)).is_none());
        assert_eq!(framer.overflow_count(), 1);

        // Next frame is unaffected
        assert!(framer
            .poll(&[0x01, 0x02, 0x03, 0x04], t0 + Duration::from_millis(20))
            .is_none());
        let frame = framer.poll(&[], t0 + Duration::from_millis(30)).unwrap();
        assert_eq!(frame.len(), 4);
    }
}
