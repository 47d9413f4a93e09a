//! A simulated participant: a real [`ResponseAggregate`] on a manual clock,
//! driven by seeded random user actions.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tally_core::clock::ManualClock;
use tally_core::transport::RecordingTransport;
use tally_core::{
    OpKind, OutboundUpdate, ParticipantData, ParticipantId, PendingOperation, ResponseAggregate,
    StateReading, StateType, StateValue, TallyError, TypeRegistry,
};

use crate::rng::DeterministicRng;

pub const VOTE: &str = "vote";
pub const SELECTION: &str = "selection";
pub const CLICK_COUNT: &str = "click-count";

/// States every simulated participant and the relay agree on.
pub const STATES: [(&str, StateType); 3] = [
    (VOTE, StateType::Scalar),
    (SELECTION, StateType::Set),
    (CLICK_COUNT, StateType::Scalar),
];

const VOTES: [&str; 3] = ["yes", "no", "maybe"];
const COLORS: [&str; 4] = ["red", "green", "blue", "amber"];

/// Register [`STATES`] into `registry`.
///
/// # Errors
///
/// Only on a conflicting earlier registration.
pub fn register_states(registry: &mut TypeRegistry) -> Result<(), TallyError> {
    for (name, state_type) in STATES {
        registry.register_state(name, state_type)?;
    }
    Ok(())
}

/// One user action taken during a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub op: OpKind,
    pub value: StateValue,
}

pub struct SimParticipant {
    index: usize,
    id: ParticipantId,
    aggregate: ResponseAggregate,
    clock: ManualClock,
    outbox: RecordingTransport,
    sent: Vec<OutboundUpdate>,
    clicks: i64,
    frozen_rounds: u8,
}

impl SimParticipant {
    /// # Errors
    ///
    /// Fails only if state registration fails.
    pub fn new(index: usize, start_us: i64, window: Duration) -> Result<Self> {
        let id = ParticipantId::new(format!("participant-{index}"));
        let clock = ManualClock::new(start_us);
        let outbox = RecordingTransport::new();
        let mut aggregate = ResponseAggregate::new(id.clone(), Box::new(outbox.clone()))
            .with_clock(Box::new(clock.clone()))
            .with_window(window);
        for (name, state_type) in STATES {
            aggregate
                .register_state(name, state_type)
                .with_context(|| format!("registering {name} for {id}"))?;
        }

        Ok(Self {
            index,
            id,
            aggregate,
            clock,
            outbox,
            sent: Vec::new(),
            clicks: 0,
            frozen_rounds: 0,
        })
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub const fn id(&self) -> &ParticipantId {
        &self.id
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.aggregate.pending_len()
    }

    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.frozen_rounds > 0
    }

    /// Stall this participant's clock for `rounds` rounds.
    pub const fn freeze(&mut self, rounds: u8) {
        self.frozen_rounds = rounds;
    }

    pub const fn unfreeze(&mut self) {
        self.frozen_rounds = 0;
    }

    /// Every operation this participant has handed to its transport, in
    /// send order.
    #[must_use]
    pub fn sent_operations(&self) -> Vec<PendingOperation> {
        self.sent
            .iter()
            .flat_map(|update| update.operations.iter().cloned())
            .collect()
    }

    /// Bodies of every update sent so far.
    ///
    /// # Errors
    ///
    /// Serialization failure.
    pub fn sent_bodies(&self) -> Result<Vec<String>> {
        self.sent
            .iter()
            .map(|update| update.to_json().context("encoding outbound update"))
            .collect()
    }

    /// Perform one random user action.
    ///
    /// # Errors
    ///
    /// Any aggregate failure, which indicates a simulator bug.
    pub fn act(&mut self, rng: &mut DeterministicRng) -> Result<Action> {
        let action = match rng.next_bounded(6) {
            0 => Action {
                name: VOTE.into(),
                op: OpKind::Remove,
                value: StateValue::Null,
            },
            1 | 2 => Action {
                name: SELECTION.into(),
                op: if rng.hit_rate_percent(35) {
                    OpKind::Remove
                } else {
                    OpKind::Add
                },
                value: StateValue::from(*rng.pick(&COLORS).unwrap_or(&"red")),
            },
            3 => {
                self.clicks = self.clicks.saturating_add(1);
                Action {
                    name: CLICK_COUNT.into(),
                    op: OpKind::Add,
                    value: StateValue::from(self.clicks),
                }
            }
            _ => Action {
                name: VOTE.into(),
                op: OpKind::Add,
                value: StateValue::from(*rng.pick(&VOTES).unwrap_or(&"yes")),
            },
        };

        match action.op {
            OpKind::Add => self.aggregate.add_state(&action.name, action.value.clone()),
            OpKind::Remove => self
                .aggregate
                .remove_state(&action.name, action.value.clone()),
        }
        .with_context(|| format!("{} {:?} {}", self.id, action.op, action.name))?;

        if rng.hit_rate_percent(10) {
            self.aggregate
                .set_response_text(format!("{} updated {}", self.id, action.name))?;
        }
        Ok(action)
    }

    /// Advance the clock by `tick` (unless frozen) and poll. Returns the
    /// bodies of any updates that went out.
    ///
    /// # Errors
    ///
    /// Aggregate or serialization failure.
    pub fn tick(&mut self, tick: Duration) -> Result<Vec<String>> {
        if self.frozen_rounds > 0 {
            self.frozen_rounds -= 1;
        } else {
            self.clock.advance(tick);
        }
        self.aggregate.poll()?;
        self.collect_sent()
    }

    /// Send whatever is pending right away.
    ///
    /// # Errors
    ///
    /// Aggregate or serialization failure.
    pub fn flush(&mut self) -> Result<Vec<String>> {
        self.aggregate.flush()?;
        self.collect_sent()
    }

    /// Apply a relay snapshot body.
    ///
    /// # Errors
    ///
    /// Malformed body.
    pub fn receive_snapshot(&mut self, body: &str) -> Result<()> {
        self.aggregate
            .apply_snapshot(body)
            .with_context(|| format!("{} applying snapshot", self.id))
    }

    /// This participant's full view of every participant's state.
    ///
    /// # Errors
    ///
    /// Only if the aggregate was disposed.
    pub fn view(&self) -> Result<ParticipantData> {
        Ok(self.aggregate.snapshot()?)
    }

    /// Typed read, as an application would render it.
    ///
    /// # Errors
    ///
    /// Unregistered state.
    pub fn read(&self, name: &str, participant: &str) -> Result<Option<StateReading>> {
        Ok(self.aggregate.get_state(name, participant)?)
    }

    fn collect_sent(&mut self) -> Result<Vec<String>> {
        let updates = self.outbox.take();
        let bodies = updates
            .iter()
            .map(|update| update.to_json().context("encoding outbound update"))
            .collect::<Result<Vec<_>>>()?;
        self.sent.extend(updates);
        Ok(bodies)
    }
}
