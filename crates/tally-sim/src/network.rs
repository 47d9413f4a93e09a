//! Fault-injecting message network between participants and the relay.
//!
//! Messages carry serialized JSON bodies, exactly what a real transport
//! would move. Faults are decided by the shared [`DeterministicRng`], so a
//! seed fixes every drop, duplicate, delay and reorder.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// A simulated network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Participant(usize),
    Relay,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Participant(index) => write!(f, "participant-{index}"),
            Self::Relay => f.write_str("relay"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Maximum delivery delay in rounds.
    pub max_delay_rounds: u8,
    pub drop_rate_percent: u8,
    pub duplicate_rate_percent: u8,
    /// Chance per round that the ready batch is delivered in reverse.
    pub reorder_rate_percent: u8,
    /// Chance per round that a participant's clock stalls.
    pub freeze_rate_percent: u8,
    pub freeze_duration_rounds: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 2,
            drop_rate_percent: 5,
            duplicate_rate_percent: 3,
            reorder_rate_percent: 5,
            freeze_rate_percent: 2,
            freeze_duration_rounds: 2,
        }
    }
}

impl FaultConfig {
    /// No faults at all: immediate, exactly-once, in-order delivery.
    #[must_use]
    pub const fn reliable() -> Self {
        Self {
            max_delay_rounds: 0,
            drop_rate_percent: 0,
            duplicate_rate_percent: 0,
            reorder_rate_percent: 0,
            freeze_rate_percent: 0,
            freeze_duration_rounds: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMessage {
    pub from: Endpoint,
    pub to: Endpoint,
    /// Serialized payload.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct InFlight {
    deliver_at_round: u64,
    message: NetworkMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    pub dropped: bool,
    pub duplicated: bool,
    pub delay_rounds: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverOutcome {
    pub delivered: Vec<NetworkMessage>,
    pub reordered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedNetwork {
    in_flight: Vec<InFlight>,
    fault: FaultConfig,
}

impl SimulatedNetwork {
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self {
            in_flight: Vec::new(),
            fault,
        }
    }

    #[must_use]
    pub const fn fault_config(&self) -> FaultConfig {
        self.fault
    }

    /// Number of messages still in flight.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Queue `message` for delivery, subject to fault injection.
    pub fn send(
        &mut self,
        message: NetworkMessage,
        round: u64,
        rng: &mut DeterministicRng,
    ) -> SendOutcome {
        if rng.hit_rate_percent(self.fault.drop_rate_percent) {
            return SendOutcome {
                dropped: true,
                duplicated: false,
                delay_rounds: 0,
            };
        }

        let delay_bound = u64::from(self.fault.max_delay_rounds).saturating_add(1);
        let delay = u8::try_from(rng.next_bounded(delay_bound)).unwrap_or(self.fault.max_delay_rounds);
        let deliver_at_round = round.saturating_add(u64::from(delay));

        let duplicated = rng.hit_rate_percent(self.fault.duplicate_rate_percent);
        if duplicated {
            self.in_flight.push(InFlight {
                deliver_at_round,
                message: message.clone(),
            });
        }
        self.in_flight.push(InFlight {
            deliver_at_round,
            message,
        });

        SendOutcome {
            dropped: false,
            duplicated,
            delay_rounds: delay,
        }
    }

    /// Remove and return every message due by `round`.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> DeliverOutcome {
        let (mut ready, future): (Vec<_>, Vec<_>) = self
            .in_flight
            .drain(..)
            .partition(|m| m.deliver_at_round <= round);
        self.in_flight = future;
        ready.sort_by_key(|m| m.deliver_at_round);

        let mut delivered: Vec<NetworkMessage> = ready.into_iter().map(|m| m.message).collect();
        let reordered =
            delivered.len() > 1 && rng.hit_rate_percent(self.fault.reorder_rate_percent);
        if reordered {
            delivered.reverse();
        }

        DeliverOutcome {
            delivered,
            reordered,
        }
    }

    /// Remove and return everything still in flight, earliest first.
    pub fn drain_all(&mut self) -> Vec<NetworkMessage> {
        let mut rest = std::mem::take(&mut self.in_flight);
        rest.sort_by_key(|m| m.deliver_at_round);
        rest.into_iter().map(|m| m.message).collect()
    }
}
