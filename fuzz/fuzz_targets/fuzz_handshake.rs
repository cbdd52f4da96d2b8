#![no_main]

use libfuzzer_sys::fuzz_target;
use rnp_protocol::core::packet::PacketType;
use rnp_protocol::protocol::handshake::ClientHandshake;
use rnp_protocol::protocol::message::Message;

fuzz_target!(|data: &[u8]| {
    // First byte picks the packet type, the rest is the payload
    let Some((&kind, payload)) = data.split_first() else {
        return;
    };
    let Some(packet_type) = PacketType::from_byte(kind) else {
        return;
    };

    if let Ok(message) = Message::decode(packet_type, payload) {
        // Anything that decodes must re-encode and decode again
        if let Ok(encoded) = message.encode_payload() {
            let _ = Message::decode(packet_type, &encoded);
        }
    }

    let mut handshake = ClientHandshake::new();
    if handshake.begin_connect("fuzz", 0).is_ok() {
        let _ = handshake.accept(payload);
    }
});
