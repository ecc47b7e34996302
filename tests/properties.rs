//! Property tests for the wire-level invariants

use j1939_modbus_gateway::j1939::J1939Id;
use j1939_modbus_gateway::registers::{join_u32, split_u32};
use j1939_modbus_gateway::{
    crc16, project, EngineState, EngineStore, RtuAdu, RtuServer, REGISTER_COUNT,
};
use proptest::prelude::*;

/// Bitwise CRC16/MODBUS, straight from the protocol description
fn reference_crc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[test]
fn crc_reference_vector() {
    assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
    assert_eq!(reference_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
}

proptest! {
    #[test]
    fn crc_matches_reference(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        prop_assert_eq!(crc16(&data), reference_crc(&data));
    }

    #[test]
    fn appended_crc_verifies(body in proptest::collection::vec(any::<u8>(), 2..250)) {
        let mut frame = body.clone();
        frame.extend_from_slice(&crc16(&body).to_le_bytes());
        let (slave, pdu) = RtuAdu::verify(&frame).unwrap();
        prop_assert_eq!(slave, body[0]);
        prop_assert_eq!(pdu, &body[1..]);
    }

    #[test]
    fn split_join_u32(value in any::<u32>()) {
        let [high, low] = split_u32(value);
        prop_assert_eq!(high, (value >> 16) as u16);
        prop_assert_eq!(low, (value & 0xFFFF) as u16);
        prop_assert_eq!(join_u32([high, low]), value);
    }

    #[test]
    fn projection_places_32_bit_fields(rpm in any::<u32>(), hours in any::<u32>(), ts in any::<u32>()) {
        let state = EngineState { rpm, engine_hours: hours, last_update: ts, ..Default::default() };
        let map = project(&state);
        prop_assert_eq!(map.len(), REGISTER_COUNT);
        prop_assert_eq!(map.get_u32(0), Some(rpm));
        prop_assert_eq!(map.get_u32(6), Some(hours));
        prop_assert_eq!(map.get_u32(19), Some(ts));
    }

    #[test]
    fn pgn_extraction(pf in any::<u8>(), ps in any::<u8>(), sa in any::<u8>(), prio in 0u32..8) {
        let raw = (prio << 26) | (u32::from(pf) << 16) | (u32::from(ps) << 8) | u32::from(sa);
        let id = J1939Id::from_raw(raw);
        prop_assert_eq!(id.source_address, sa);
        if pf < 240 {
            prop_assert_eq!(id.pgn(), u32::from(pf) << 8);
            prop_assert_eq!(id.destination(), Some(ps));
        } else {
            prop_assert_eq!(id.pgn(), (u32::from(pf) << 8) | u32::from(ps));
            prop_assert_eq!(id.destination(), None);
        }
    }

    #[test]
    fn read_requests_answer_or_raise_address_exception(start in 0u16..40, qty in 1u16..=125) {
        let mut server = RtuServer::new(1, 19200);
        let store = EngineStore::new();
        let mut body = vec![0x01, 0x03];
        body.extend_from_slice(&start.to_be_bytes());
        body.extend_from_slice(&qty.to_be_bytes());
        let mut frame = body.clone();
        frame.extend_from_slice(&crc16(&body).to_le_bytes());

        let reply = server.handle_frame(&frame, &store).unwrap();
        let bytes = reply.as_slice();
        if usize::from(start) + usize::from(qty) > REGISTER_COUNT {
            prop_assert_eq!(&bytes[1..3], &[0x83, 0x02]);
        } else {
            prop_assert_eq!(bytes[1], 0x03);
            prop_assert_eq!(usize::from(bytes[2]), usize::from(qty) * 2);
            prop_assert_eq!(bytes.len(), 5 + usize::from(qty) * 2);
        }
        prop_assert!(RtuAdu::verify(bytes).is_ok());
    }

    #[test]
    fn arbitrary_bytes_never_panic(frame in proptest::collection::vec(any::<u8>(), 0..300)) {
        let mut server = RtuServer::new(1, 19200);
        let _ = server.handle_frame(&frame, &EngineStore::new());
    }
}
