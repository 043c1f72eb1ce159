//! Fuzz target for catalog validation
//!
//! Decodes arbitrary bytes as a typed message addressed to a fixed
//! receiver. Schema, direction and receiver checks must reject bad input
//! with an error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use simlink_proto::{Identifier, Message};

fuzz_target!(|data: &[u8]| {
    let receiver = Identifier::from("FS");
    if let Ok(message) = Message::decode(data, &receiver) {
        assert_eq!(message.route().receiver_id, receiver);
        let _ = message.to_envelope();
    }
});
