#![no_main]

use std::time::{Duration, Instant};

use j1939_modbus_gateway::{EngineStore, RtuAdu, RtuFramer, RtuServer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let store = EngineStore::new();
    let mut server = RtuServer::new(1, 19200);

    // Whole input as one frame
    if let Some(reply) = server.handle_frame(data, &store) {
        assert!(RtuAdu::verify(reply.as_slice()).is_ok());
        assert_eq!(reply.slave_id(), 1);
    }

    // Same input as a byte stream split at every 0x00, with gaps between chunks
    let mut framer = RtuFramer::new(19200);
    let mut now = Instant::now();
    for chunk in data.split(|b| *b == 0) {
        now += Duration::from_millis(if chunk.len() % 2 == 0 { 5 } else { 1 });
        if let Some(frame) = framer.poll(chunk, now) {
            assert!(frame.len() <= 256);
            let _ = server.handle_frame(&frame, &store);
        }
    }
});
