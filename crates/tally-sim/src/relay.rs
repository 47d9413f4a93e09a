//! The authoritative side of the exchange.
//!
//! The relay folds each sender's operations into its own store and hands
//! the result back out as snapshots. Operations are applied strictly in
//! per-sender sequence order: early arrivals wait in a buffer, repeats are
//! ignored, so duplicated or reordered delivery cannot corrupt the store.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tally_core::merge::MergeEngine;
use tally_core::{OutboundUpdate, ParticipantData, ParticipantId, PendingOperation, SnapshotPayload};
use tracing::{debug, trace};

use crate::participant::register_states;

#[derive(Debug, Clone, Default)]
struct SenderStream {
    next_seq: u64,
    buffered: BTreeMap<u64, PendingOperation>,
    response_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Relay {
    engine: MergeEngine,
    streams: BTreeMap<ParticipantId, SenderStream>,
}

impl Relay {
    /// # Errors
    ///
    /// Fails only if state registration fails.
    pub fn new() -> Result<Self> {
        let mut engine = MergeEngine::new();
        register_states(engine.registry_mut()).context("registering relay states")?;
        Ok(Self {
            engine,
            streams: BTreeMap::new(),
        })
    }

    /// Fold one outbound update body.
    ///
    /// Returns `true` when the authoritative store changed.
    ///
    /// # Errors
    ///
    /// Malformed body, or an operation the relay cannot apply.
    pub fn receive(&mut self, body: &str) -> Result<bool> {
        let update: OutboundUpdate =
            serde_json::from_str(body).context("decoding outbound update")?;
        let before = self.engine.store().snapshot();

        if let (Some(sender), Some(text)) = (update.sender(), update.response_text.as_ref()) {
            self.streams.entry(sender.clone()).or_default().response_text = Some(text.clone());
        }

        for op in update.operations {
            let stream = self.streams.entry(op.participant_id.clone()).or_default();
            if op.seq < stream.next_seq {
                trace!(participant = %op.participant_id, seq = op.seq, "ignoring repeated operation");
                continue;
            }
            stream.buffered.insert(op.seq, op);
        }

        let mut applied = 0_usize;
        for stream in self.streams.values_mut() {
            while let Some(op) = stream.buffered.remove(&stream.next_seq) {
                self.engine
                    .apply_local(&op.participant_id, &op.name, op.value, op.op, op.wall_ts_us)
                    .with_context(|| format!("relay applying seq {} from {}", op.seq, op.participant_id))?;
                stream.next_seq += 1;
                applied += 1;
            }
        }

        let changed = self.engine.store().snapshot() != before;
        debug!(applied, changed, "relay folded update");
        Ok(changed)
    }

    /// Authoritative store contents.
    #[must_use]
    pub fn authority(&self) -> ParticipantData {
        self.engine.store().snapshot()
    }

    /// Snapshot body to broadcast.
    ///
    /// # Errors
    ///
    /// Serialization failure.
    pub fn snapshot_body(&self) -> Result<String> {
        SnapshotPayload {
            participant_data: self.authority(),
        }
        .to_json()
        .context("encoding relay snapshot")
    }

    /// Number of operations applied for `participant`.
    #[must_use]
    pub fn applied_count(&self, participant: &ParticipantId) -> u64 {
        self.streams.get(participant).map_or(0, |s| s.next_seq)
    }

    /// Operations held back waiting for an earlier sequence number.
    #[must_use]
    pub fn buffered_count(&self) -> usize {
        self.streams.values().map(|s| s.buffered.len()).sum()
    }

    #[must_use]
    pub fn response_text(&self, participant: &ParticipantId) -> Option<&str> {
        self.streams
            .get(participant)
            .and_then(|s| s.response_text.as_deref())
    }
}
