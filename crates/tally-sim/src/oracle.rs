use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tally_core::merge::MergeEngine;
use tally_core::{ParticipantData, ParticipantId, PendingOperation};

use crate::participant::register_states;
use crate::rng::DeterministicRng;

// ── Result types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// Combine two results; failures accumulate.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantViolation {
    /// A participant's final view differs from the relay's store.
    Convergence {
        participant: usize,
        /// Participants whose slots differ between the two.
        differing: Vec<ParticipantId>,
    },
    /// Operations a participant sent never reached the relay's store.
    Delivery {
        participant: ParticipantId,
        sent: u64,
        applied: u64,
    },
    /// Re-applying the same snapshot with the same pending operations
    /// changed the store.
    Idempotence { participant: ParticipantId },
    /// Interleaving participants' operations differently changed the result.
    Commutativity {
        permutation_index: usize,
        differing: Vec<ParticipantId>,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Convergence {
                participant,
                differing,
            } => write!(
                f,
                "convergence: participant {participant} disagrees with relay on {differing:?}"
            ),
            Self::Delivery {
                participant,
                sent,
                applied,
            } => write!(
                f,
                "delivery: {participant} sent {sent} operations, relay applied {applied}"
            ),
            Self::Idempotence { participant } => write!(
                f,
                "idempotence: replaying {participant}'s operations twice over a snapshot diverged"
            ),
            Self::Commutativity {
                permutation_index,
                differing,
            } => write!(
                f,
                "commutativity: interleaving {permutation_index} diverges on {differing:?}"
            ),
        }
    }
}

/// Everything the oracle needs from a finished run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FinalState {
    /// The relay's store after settling.
    pub authority: ParticipantData,
    /// Each participant's view, by index.
    pub views: Vec<ParticipantData>,
    /// Each participant's sent operations, in sequence order.
    pub streams: Vec<(ParticipantId, Vec<PendingOperation>)>,
    /// Relay-side applied count per entry of `streams`.
    pub applied: Vec<u64>,
}

// ── Oracle ───────────────────────────────────────────────────────────────────

/// Invariants checked after a simulation has settled.
///
/// 1. **Convergence**: every participant's view equals the relay's store.
/// 2. **Delivery**: every sent operation was applied by the relay.
/// 3. **Idempotence**: a snapshot plus replay applied twice equals once.
/// 4. **Commutativity**: any interleaving of the per-participant operation
///    streams yields the relay's store.
pub struct ConvergenceOracle;

impl ConvergenceOracle {
    #[must_use]
    pub fn check_all(state: &FinalState, rng: &mut DeterministicRng) -> OracleResult {
        Self::check_convergence(&state.authority, &state.views)
            .merge(Self::check_delivery(&state.streams, &state.applied))
            .merge(Self::check_idempotence(&state.authority, &state.streams))
            .merge(Self::check_commutativity(
                &state.authority,
                &state.streams,
                rng,
                8,
            ))
    }

    #[must_use]
    pub fn check_convergence(authority: &ParticipantData, views: &[ParticipantData]) -> OracleResult {
        let violations = views
            .iter()
            .enumerate()
            .filter(|(_, view)| *view != authority)
            .map(|(participant, view)| InvariantViolation::Convergence {
                participant,
                differing: differing_participants(authority, view),
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_delivery(
        streams: &[(ParticipantId, Vec<PendingOperation>)],
        applied: &[u64],
    ) -> OracleResult {
        let violations = streams
            .iter()
            .zip(applied)
            .filter_map(|((participant, ops), &applied)| {
                let sent = u64::try_from(ops.len()).unwrap_or(u64::MAX);
                (sent != applied).then(|| InvariantViolation::Delivery {
                    participant: participant.clone(),
                    sent,
                    applied,
                })
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    /// Replays each participant's whole stream over `authority` twice and
    /// compares.
    #[must_use]
    pub fn check_idempotence(
        authority: &ParticipantData,
        streams: &[(ParticipantId, Vec<PendingOperation>)],
    ) -> OracleResult {
        let mut violations = Vec::new();
        for (participant, ops) in streams {
            let Some(mut engine) = fresh_engine() else {
                return OracleResult::pass();
            };
            let once = engine
                .apply_remote_snapshot(authority.clone(), ops)
                .map(|_| engine.store().snapshot());
            let twice = engine
                .apply_remote_snapshot(authority.clone(), ops)
                .map(|_| engine.store().snapshot());
            if once.ok() != twice.ok() {
                violations.push(InvariantViolation::Idempotence {
                    participant: participant.clone(),
                });
            }
        }
        OracleResult::from_violations(violations)
    }

    /// Applies `iterations` random interleavings of the streams, each
    /// keeping per-participant order, and compares against `authority`.
    #[must_use]
    pub fn check_commutativity(
        authority: &ParticipantData,
        streams: &[(ParticipantId, Vec<PendingOperation>)],
        rng: &mut DeterministicRng,
        iterations: usize,
    ) -> OracleResult {
        let mut violations = Vec::new();
        for permutation_index in 0..iterations {
            let Some(mut engine) = fresh_engine() else {
                return OracleResult::pass();
            };
            for op in interleave(streams, rng) {
                let _ = engine.apply_local(
                    &op.participant_id,
                    &op.name,
                    op.value.clone(),
                    op.op,
                    op.wall_ts_us,
                );
            }
            let result = engine.store().snapshot();
            if !same_contents(&result, authority) {
                violations.push(InvariantViolation::Commutativity {
                    permutation_index,
                    differing: differing_participants(authority, &result),
                });
            }
        }
        OracleResult::from_violations(violations)
    }
}

fn fresh_engine() -> Option<MergeEngine> {
    let mut engine = MergeEngine::new();
    register_states(engine.registry_mut()).ok()?;
    Some(engine)
}

/// Random merge of the streams that preserves each stream's own order.
fn interleave<'a>(
    streams: &'a [(ParticipantId, Vec<PendingOperation>)],
    rng: &mut DeterministicRng,
) -> Vec<&'a PendingOperation> {
    let mut cursors = vec![0_usize; streams.len()];
    let total: usize = streams.iter().map(|(_, ops)| ops.len()).sum();
    let mut out = Vec::with_capacity(total);
    while out.len() < total {
        let live: Vec<usize> = (0..streams.len())
            .filter(|&i| cursors[i] < streams[i].1.len())
            .collect();
        let Some(&pick) = rng.pick(&live) else { break };
        out.push(&streams[pick].1[cursors[pick]]);
        cursors[pick] += 1;
    }
    out
}

/// Equality that ignores participants with empty slots.
fn same_contents(a: &ParticipantData, b: &ParticipantData) -> bool {
    differing_participants(a, b).is_empty()
}

fn differing_participants(a: &ParticipantData, b: &ParticipantData) -> Vec<ParticipantId> {
    let keys: BTreeSet<&ParticipantId> = a.keys().chain(b.keys()).collect();
    keys.into_iter()
        .filter(|k| {
            let left = a.get(*k).filter(|slot| !slot.is_empty());
            let right = b.get(*k).filter(|slot| !slot.is_empty());
            left != right
        })
        .cloned()
        .collect()
}
