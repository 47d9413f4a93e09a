use proptest::prelude::*;
use tally_core::transport::RecordingTransport;
use tally_core::{ResponseAggregate, SnapshotPayload, StateReading, StateType};

use generators::*;

fn fresh_aggregate(local: &str) -> ResponseAggregate {
    let mut agg = ResponseAggregate::new(local, Box::new(RecordingTransport::new()));
    agg.register_state(SCALAR_STATE, StateType::Scalar)
        .expect("register");
    agg.register_state(FLAG_STATE, StateType::Scalar)
        .expect("register");
    agg.register_state(SET_STATE, StateType::Set)
        .expect("register");
    agg
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(512))]

    #[test]
    fn disjoint_participants_commute(
        a in arb_ops("alice"),
        b in arb_ops("bob"),
        picks in prop::collection::vec(any::<bool>(), 1..16),
    ) {
        let mut a_then_b = registered_engine();
        apply_all(&mut a_then_b, &a);
        apply_all(&mut a_then_b, &b);

        let mut b_then_a = registered_engine();
        apply_all(&mut b_then_a, &b);
        apply_all(&mut b_then_a, &a);

        let mut mixed = registered_engine();
        apply_all(&mut mixed, &interleave(&a, &b, &picks));

        prop_assert_eq!(a_then_b.store().snapshot(), b_then_a.store().snapshot());
        prop_assert_eq!(a_then_b.store().snapshot(), mixed.store().snapshot());
    }

    #[test]
    fn snapshot_application_is_idempotent(a in arb_ops("alice"), b in arb_ops("bob")) {
        let mut source = registered_engine();
        apply_all(&mut source, &a);
        apply_all(&mut source, &b);
        let body = SnapshotPayload { participant_data: source.store().snapshot() }
            .to_json()
            .expect("json");

        let mut target = fresh_aggregate("carol");
        target.apply_snapshot(&body).expect("first");
        let once = target.snapshot().expect("snapshot");
        target.apply_snapshot(&body).expect("second");
        prop_assert_eq!(once, target.snapshot().expect("snapshot"));
    }

    #[test]
    fn snapshot_round_trips_losslessly(a in arb_ops("alice"), b in arb_ops("bob")) {
        let mut source = fresh_aggregate("alice");
        let mut engine = registered_engine();
        apply_all(&mut engine, &a);
        apply_all(&mut engine, &b);
        source
            .apply_snapshot_payload(SnapshotPayload { participant_data: engine.store().snapshot() })
            .expect("seed");

        let body = source.snapshot_payload().expect("payload").to_json().expect("json");
        let mut replica = fresh_aggregate("bob");
        replica.apply_snapshot(&body).expect("apply");

        prop_assert_eq!(source.snapshot().expect("a"), replica.snapshot().expect("b"));
    }

    #[test]
    fn added_scalar_reads_back(value in arb_scalar()) {
        let mut agg = fresh_aggregate("alice");
        agg.add_state(SCALAR_STATE, value.clone()).expect("add");
        prop_assert_eq!(
            agg.get_state(SCALAR_STATE, "alice").expect("get"),
            Some(StateReading::Scalar(value))
        );
    }

    #[test]
    fn added_member_is_present(members in prop::collection::vec(arb_member(), 1..8)) {
        let mut agg = fresh_aggregate("alice");
        for member in &members {
            agg.add_state(SET_STATE, member.as_str()).expect("add");
        }
        let reading = agg.get_state(SET_STATE, "alice").expect("get").expect("present");
        let got = reading.members().expect("set reading");
        for member in &members {
            prop_assert!(got.contains(member));
        }
        let mut sorted = got.to_vec();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(sorted.as_slice(), got);
    }
}
