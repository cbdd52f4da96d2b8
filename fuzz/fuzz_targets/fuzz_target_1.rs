#![no_main]

use libfuzzer_sys::fuzz_target;
use rnp_protocol::core::event::{deserialize_events, EntityEvents};
use rnp_protocol::core::packet::{decode_header, payload_slice};
use rnp_protocol::Packet;

fuzz_target!(|data: &[u8]| {
    // Fuzz packet and event decoding - test for panics, crashes, infinite loops
    let _ = Packet::from_bytes(data);
    if let Ok(header) = decode_header(data) {
        let _ = payload_slice(&header, data);
    }
    let _ = deserialize_events(data);
    let _ = EntityEvents::decode(data);
});
