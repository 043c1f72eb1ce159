//! Fuzz target for the model controller
//!
//! Every frame is either answered or dropped; the controller must never
//! panic, whatever state the M/M/1 model is in.

#![no_main]

use libfuzzer_sys::fuzz_target;
use simlink_model::{Mm1Model, ModelController};
use simlink_proto::Identifier;

fuzz_target!(|frames: Vec<Vec<u8>>| {
    let mut controller = ModelController::new(Identifier::from("MM1.0"), Mm1Model::new());
    for frame in frames {
        let _ = controller.handle_frame(&frame);
        let _ = controller.handle_elapsed();
    }
});
