#![no_main]

use arbitrary::Arbitrary;
use j1939_modbus_gateway::{decode, CanFrame, EngineStore};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    id: u32,
    extended: bool,
    payload: Vec<u8>,
    now_ms: u32,
}

fuzz_target!(|input: Input| {
    let payload = &input.payload[..input.payload.len().min(8)];
    let frame = if input.extended {
        CanFrame::new_extended(input.id & 0x1FFF_FFFF, payload)
    } else {
        CanFrame::new_standard((input.id & 0x7FF) as u16, payload)
    };
    let Ok(frame) = frame else {
        return;
    };

    let mut store = EngineStore::new();
    if let Ok(decoded) = decode(&frame) {
        if store.apply(&decoded, input.now_ms) {
            assert_eq!(store.last_update(), input.now_ms);
        }
    }
});
