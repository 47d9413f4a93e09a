#![no_main]

use libfuzzer_sys::fuzz_target;

use tally_core::transport::RecordingTransport;
use tally_core::{ResponseAggregate, SnapshotPayload, StateType, StateValue};

fuzz_target!(|data: &[u8]| {
    let Ok(body) = std::str::from_utf8(data) else {
        return;
    };
    let mut aggregate = ResponseAggregate::new("fuzz", Box::new(RecordingTransport::new()));
    let _ = aggregate.register_state("selection", StateType::Set);
    let _ = aggregate.register_state("vote", StateType::Scalar);
    let _ = aggregate.add_state("selection", StateValue::from("local"));

    if aggregate.apply_snapshot(body).is_err() {
        return;
    }

    // An applied snapshot must survive its own round trip.
    let Ok(data) = aggregate.snapshot() else {
        return;
    };
    let json = serde_json::to_string(&SnapshotPayload { participant_data: data.clone() })
        .unwrap_or_default();
    if aggregate.apply_snapshot(&json).is_ok() {
        assert_eq!(aggregate.snapshot().ok(), Some(data));
    }
});
