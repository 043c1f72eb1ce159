//! Fuzz target for the federate lifecycle machine
//!
//! Feeds an arbitrary interleaving of reply frames, wake-ups and transport
//! failures. The machine must never panic, and once finished it must stay
//! finished and emit no further requests.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use simlink_core::{FederateLifecycle, FederateSpec, LifecycleAction, LifecycleConfig};
use simlink_proto::{RunControl, SetParameter, SimTime, StartFederate};

#[derive(Debug, Arbitrary)]
enum Event {
    Reply(Vec<u8>),
    Wake,
    TransportFailure,
}

fuzz_target!(|events: Vec<Event>| {
    let spec = FederateSpec {
        start: StartFederate::new("MM1.0", "mm1"),
        run_control: RunControl::new(SimTime::seconds(10.0), SimTime::seconds(0.0)),
        parameters: vec![SetParameter::new("iat", 1.0)],
        statistics: vec!["qN.max".to_string()],
    };
    let mut machine = FederateLifecycle::new(LifecycleConfig::default(), spec);
    let _ = machine.start();

    for event in events {
        let was_finished = machine.is_finished();
        let actions = match event {
            Event::Reply(frame) => machine.handle_reply(&frame),
            Event::Wake => machine.handle_wake(),
            Event::TransportFailure => machine.handle_transport_failure("connection reset"),
        };
        if was_finished {
            assert!(machine.is_finished());
            assert!(!actions.iter().any(|a| matches!(a, LifecycleAction::Request { .. })));
        }
    }
});
