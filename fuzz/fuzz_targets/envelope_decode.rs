//! Fuzz target for Envelope::decode
//!
//! Arbitrary bytes must never panic the decoder. Anything that decodes
//! must re-encode, and the re-encoding must be stable.

#![no_main]

use libfuzzer_sys::fuzz_target;
use simlink_proto::Envelope;

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = Envelope::decode(data) {
        let encoded = envelope.to_bytes().expect("decoded envelope re-encodes");
        let again = Envelope::decode(&encoded).expect("re-encoded envelope decodes");
        assert_eq!(again.to_bytes().expect("stable encoding"), encoded);
    }
});
