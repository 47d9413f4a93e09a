//! tally-sim: deterministic multi-participant simulation.
//!
//! Participants wrap real [`tally_core::ResponseAggregate`]s on manual
//! clocks and exchange JSON bodies with a [`relay::Relay`] over a
//! fault-injecting [`network::SimulatedNetwork`]. One seed fixes every
//! user action, delay, drop and reorder, so a failing seed replays exactly.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` with context.
//! - **Logging**: `tracing` macros.

pub mod campaign;
pub mod network;
pub mod oracle;
pub mod participant;
pub mod relay;
pub mod rng;

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::network::{Endpoint, FaultConfig, NetworkMessage, SimulatedNetwork};
use crate::oracle::FinalState;
use crate::participant::SimParticipant;
use crate::relay::Relay;
use crate::rng::DeterministicRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub participants: usize,
    pub rounds: u64,
    /// Chance per round that a participant takes an action.
    pub action_rate_percent: u8,
    /// Simulated time per round.
    pub tick_ms: u64,
    /// Coalescing window of every participant.
    pub window_ms: u64,
    pub fault: FaultConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            participants: 4,
            rounds: 32,
            action_rate_percent: 60,
            tick_ms: 40,
            window_ms: 100,
            fault: FaultConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Zero participants, zero rounds or a zero tick.
    pub fn validate(&self) -> Result<()> {
        if self.participants == 0 {
            bail!("participants must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.tick_ms == 0 {
            bail!("tick_ms must be > 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEventKind {
    Act {
        participant: usize,
        name: String,
        op: tally_core::OpKind,
    },
    Freeze {
        participant: usize,
    },
    Send {
        from: Endpoint,
        to: Endpoint,
        dropped: bool,
        duplicated: bool,
        delay_rounds: u8,
    },
    Deliver {
        to: Endpoint,
        reordered: bool,
    },
    /// A snapshot arrived while the participant still had unsent operations.
    ReplayOverSnapshot {
        participant: usize,
        pending: usize,
    },
    Settle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    pub seed: u64,
    pub trace: Vec<TraceEvent>,
    pub final_state: FinalState,
    /// Whether any fault path worth exercising was hit: a snapshot replayed
    /// over pending operations, a dropped, duplicated or reordered message.
    pub interesting_state_reached: bool,
}

pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    participants: Vec<SimParticipant>,
    relay: Relay,
    network: SimulatedNetwork,
    trace: Vec<TraceEvent>,
    interesting: bool,
}

const START_US: i64 = 1_700_000_000_000_000;

impl Simulator {
    /// # Errors
    ///
    /// Invalid config, or participant setup failure.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let window = Duration::from_millis(config.window_ms);
        let participants = (0..config.participants)
            .map(|i| SimParticipant::new(i, START_US, window))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            rng: DeterministicRng::new(config.seed),
            participants,
            relay: Relay::new()?,
            network: SimulatedNetwork::new(config.fault),
            trace: Vec::new(),
            interesting: false,
        })
    }

    /// Run every round, then settle and collect the final state.
    ///
    /// # Errors
    ///
    /// Any participant or relay failure.
    pub fn run(&mut self) -> Result<SimulationResult> {
        for round in 0..self.config.rounds {
            self.step(round)
                .with_context(|| format!("seed {} round {round}", self.config.seed))?;
        }
        self.settle(self.config.rounds)?;

        let final_state = self.final_state()?;
        info!(
            seed = self.config.seed,
            trace_events = self.trace.len(),
            interesting = self.interesting,
            "simulation finished"
        );
        Ok(SimulationResult {
            seed: self.config.seed,
            trace: std::mem::take(&mut self.trace),
            final_state,
            interesting_state_reached: self.interesting,
        })
    }

    fn step(&mut self, round: u64) -> Result<()> {
        let tick = Duration::from_millis(self.config.tick_ms);

        for index in 0..self.participants.len() {
            if self.rng.hit_rate_percent(self.config.fault.freeze_rate_percent)
                && !self.participants[index].is_frozen()
            {
                self.participants[index].freeze(self.config.fault.freeze_duration_rounds);
                self.record(round, TraceEventKind::Freeze { participant: index });
            }

            if self.rng.hit_rate_percent(self.config.action_rate_percent) {
                let action = self.participants[index].act(&mut self.rng)?;
                self.record(
                    round,
                    TraceEventKind::Act {
                        participant: index,
                        name: action.name,
                        op: action.op,
                    },
                );
            }

            for body in self.participants[index].tick(tick)? {
                self.send(round, Endpoint::Participant(index), Endpoint::Relay, body);
            }
        }

        let outcome = self.network.deliver_ready(round, &mut self.rng);
        if outcome.reordered {
            self.interesting = true;
        }
        let mut relay_changed = false;
        for message in outcome.delivered {
            self.record(
                round,
                TraceEventKind::Deliver {
                    to: message.to,
                    reordered: outcome.reordered,
                },
            );
            relay_changed |= self.deliver(round, &message)?;
        }

        if relay_changed {
            let body = self.relay.snapshot_body()?;
            for index in 0..self.participants.len() {
                self.send(round, Endpoint::Relay, Endpoint::Participant(index), body.clone());
            }
        }
        Ok(())
    }

    /// Drain the network, flush every participant, resend every update
    /// over a reliable path, and broadcast the final snapshot.
    fn settle(&mut self, round: u64) -> Result<()> {
        self.record(round, TraceEventKind::Settle);

        for message in self.network.drain_all() {
            self.deliver(round, &message)?;
        }
        for participant in &mut self.participants {
            participant.unfreeze();
            participant.flush()?;
        }
        for participant in &self.participants {
            for body in participant.sent_bodies()? {
                self.relay.receive(&body)?;
            }
        }

        let body = self.relay.snapshot_body()?;
        for participant in &mut self.participants {
            participant.receive_snapshot(&body)?;
        }
        debug!(buffered = self.relay.buffered_count(), "settled");
        Ok(())
    }

    fn send(&mut self, round: u64, from: Endpoint, to: Endpoint, body: String) {
        let outcome = self
            .network
            .send(NetworkMessage { from, to, body }, round, &mut self.rng);
        if outcome.dropped || outcome.duplicated {
            self.interesting = true;
        }
        self.record(
            round,
            TraceEventKind::Send {
                from,
                to,
                dropped: outcome.dropped,
                duplicated: outcome.duplicated,
                delay_rounds: outcome.delay_rounds,
            },
        );
    }

    /// Hand one message to its endpoint. Returns `true` if the relay's
    /// store changed.
    fn deliver(&mut self, round: u64, message: &NetworkMessage) -> Result<bool> {
        match message.to {
            Endpoint::Relay => self.relay.receive(&message.body),
            Endpoint::Participant(index) => {
                let Some(participant) = self.participants.get_mut(index) else {
                    bail!("message for unknown participant {index}");
                };
                let pending = participant.pending_len();
                participant.receive_snapshot(&message.body)?;
                if pending > 0 {
                    self.interesting = true;
                    self.record(
                        round,
                        TraceEventKind::ReplayOverSnapshot {
                            participant: index,
                            pending,
                        },
                    );
                }
                Ok(false)
            }
        }
    }

    fn final_state(&self) -> Result<FinalState> {
        let mut state = FinalState {
            authority: self.relay.authority(),
            ..FinalState::default()
        };
        for participant in &self.participants {
            state.views.push(participant.view()?);
            state.applied.push(self.relay.applied_count(participant.id()));
            state
                .streams
                .push((participant.id().clone(), participant.sent_operations()));
        }
        Ok(state)
    }

    fn record(&mut self, round: u64, kind: TraceEventKind) {
        self.trace.push(TraceEvent { round, kind });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ConvergenceOracle;

    #[test]
    fn reliable_run_converges() {
        let config = SimulationConfig {
            seed: 3,
            fault: FaultConfig::reliable(),
            ..SimulationConfig::default()
        };
        let result = Simulator::new(config).expect("sim").run().expect("run");
        let mut rng = DeterministicRng::new(3);
        let oracle = ConvergenceOracle::check_all(&result.final_state, &mut rng);
        assert!(oracle.passed, "{:?}", oracle.violations);
        assert!(!result.final_state.authority.is_empty());
    }

    #[test]
    fn faulty_run_still_converges() {
        let config = SimulationConfig {
            seed: 99,
            fault: FaultConfig {
                max_delay_rounds: 3,
                drop_rate_percent: 20,
                duplicate_rate_percent: 20,
                reorder_rate_percent: 30,
                freeze_rate_percent: 10,
                freeze_duration_rounds: 3,
            },
            ..SimulationConfig::default()
        };
        let result = Simulator::new(config).expect("sim").run().expect("run");
        let mut rng = DeterministicRng::new(99);
        let oracle = ConvergenceOracle::check_all(&result.final_state, &mut rng);
        assert!(oracle.passed, "{:?}", oracle.violations);
        assert!(result.interesting_state_reached);
    }

    #[test]
    fn same_seed_same_trace() {
        let config = SimulationConfig {
            seed: 17,
            ..SimulationConfig::default()
        };
        let a = Simulator::new(config).expect("sim").run().expect("run");
        let b = Simulator::new(config).expect("sim").run().expect("run");
        assert_eq!(a.trace, b.trace);
        assert_eq!(a.final_state, b.final_state);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SimulationConfig {
            participants: 0,
            ..SimulationConfig::default()
        };
        assert!(Simulator::new(config).is_err());
    }
}
