use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tally_core::merge::MergeEngine;
use tally_core::{OpKind, ParticipantId, SnapshotPayload, StateType, StateValue};

const PARTICIPANT_TIERS: [usize; 3] = [10, 100, 1_000];

fn engine() -> MergeEngine {
    let mut engine = MergeEngine::new();
    let registry = engine.registry_mut();
    let _ = registry.register_state("vote", StateType::Scalar);
    let _ = registry.register_state("selection", StateType::Set);
    engine
}

fn populated(participants: usize) -> MergeEngine {
    let mut engine = engine();
    for i in 0..participants {
        let pid = ParticipantId::new(format!("participant-{i}"));
        let _ = engine.apply_local(&pid, "vote", StateValue::from("yes"), OpKind::Add, 0);
        for member in ["red", "green", "blue"] {
            let _ = engine.apply_local(&pid, "selection", StateValue::from(member), OpKind::Add, 0);
        }
    }
    engine
}

fn bench_set_mutations(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge.set_add");
    for members in [8_u64, 64, 256] {
        group.throughput(Throughput::Elements(members));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, &n| {
            b.iter(|| {
                let mut engine = engine();
                let pid = ParticipantId::from("bench");
                for i in 0..n {
                    let _ = engine.apply_local(
                        &pid,
                        "selection",
                        StateValue::from(format!("m{i}")),
                        OpKind::Add,
                        0,
                    );
                }
                black_box(engine.store().is_empty())
            });
        });
    }
    group.finish();
}

fn bench_snapshot_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge.snapshot_apply");
    for participants in PARTICIPANT_TIERS {
        let body = SnapshotPayload {
            participant_data: populated(participants).store().snapshot(),
        }
        .to_json()
        .unwrap_or_default();

        group.throughput(Throughput::Elements(participants as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(participants),
            &body,
            |b, body| {
                let mut target = engine();
                b.iter(|| {
                    let payload = SnapshotPayload::parse(body).unwrap_or_default();
                    let _ = target.apply_remote_snapshot(payload.participant_data, &[]);
                    black_box(target.store().participants().count())
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_set_mutations, bench_snapshot_apply);
criterion_main!(benches);
