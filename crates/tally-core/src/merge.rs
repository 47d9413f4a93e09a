//! Type-directed merge of local mutations and remote snapshots.
//!
//! # Merge Rules
//!
//! | Type     | `Add`                               | `Remove`                          |
//! |----------|-------------------------------------|-----------------------------------|
//! | `Scalar` | store the value (last writer wins)  | store `null` (explicit clear)     |
//! | `Set`    | union the member into the set       | drop the member if present        |
//!
//! Each participant only ever writes its own slot, so operations from
//! different participants commute: there is no cross-participant contention
//! to resolve.
//!
//! # Snapshots
//!
//! A remote snapshot replaces the store wholesale. Local operations that have
//! not been flushed yet are then re-applied in call order, since the
//! snapshot may predate them. Every rule above is idempotent, so applying the same
//! snapshot twice with the same pending operations yields the same store.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::TallyError;
use crate::identity::ParticipantId;
use crate::registry::{StateType, TypeRegistry};
use crate::store::{ParticipantData, ParticipantStateStore};
use crate::value::{MemberSet, StateReading, StateValue, set_member};

/// Kind of local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Remove,
}

/// A local mutation that has not been flushed to the transport yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Monotonic per-aggregate sequence number.
    pub seq: u64,
    pub participant_id: ParticipantId,
    pub name: String,
    pub op: OpKind,
    /// The operand as given by the caller (a scalar, or one set member).
    pub value: StateValue,
    /// Wall-clock time of the call, microseconds since the Unix epoch.
    pub wall_ts_us: i64,
}

/// Outcome of applying one local mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedChange {
    /// Value before the mutation, `None` if never set.
    pub previous: Option<StateValue>,
    /// Value after the mutation, `None` if the entry is still absent.
    pub current: Option<StateValue>,
    /// The recorded operation; `None` when the mutation changed nothing.
    pub operation: Option<PendingOperation>,
}

/// Owns the type registry and the participant store and applies every
/// mutation to them.
#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    registry: TypeRegistry,
    store: ParticipantStateStore,
    next_seq: u64,
}

impl MergeEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    #[must_use]
    pub const fn store(&self) -> &ParticipantStateStore {
        &self.store
    }

    /// Apply a local `op` on `name` for `participant`.
    ///
    /// # Errors
    ///
    /// - [`TallyError::UnregisteredState`] if `name` is unknown.
    /// - [`TallyError::InvalidSetMember`] if `name` is a set and `raw` cannot
    ///   be a member.
    #[instrument(skip(self, raw), fields(participant = %participant))]
    pub fn apply_local(
        &mut self,
        participant: &ParticipantId,
        name: &str,
        raw: StateValue,
        op: OpKind,
        wall_ts_us: i64,
    ) -> Result<AppliedChange, TallyError> {
        let (previous, current) = self.apply_op(participant, name, &raw, op)?;

        // A remove that finds nothing to remove is dropped. Adds are always
        // recorded, even when they repeat the current value.
        if op == OpKind::Remove && previous == current {
            debug!(name, "remove found nothing to remove");
            return Ok(AppliedChange {
                previous,
                current,
                operation: None,
            });
        }

        let operation = PendingOperation {
            seq: self.next_seq,
            participant_id: participant.clone(),
            name: name.to_string(),
            op,
            value: raw,
            wall_ts_us,
        };
        self.next_seq = self.next_seq.saturating_add(1);

        debug!(name, ?op, seq = operation.seq, "applied local mutation");
        Ok(AppliedChange {
            previous,
            current,
            operation: Some(operation),
        })
    }

    /// Set `participant`'s initial value for `name` without recording an
    /// operation.
    ///
    /// Set-typed values are given as a joined member list and normalised to
    /// canonical form.
    ///
    /// # Errors
    ///
    /// [`TallyError::UnregisteredState`] if `name` is unknown.
    pub fn apply_initial(
        &mut self,
        participant: &ParticipantId,
        name: &str,
        value: StateValue,
    ) -> Result<Option<StateValue>, TallyError> {
        let stored = match self.registry.type_of(name)? {
            StateType::Scalar => value,
            StateType::Set if value.is_null() => StateValue::Null,
            StateType::Set => MemberSet::from_value(&value).to_value(),
        };
        Ok(self.store.set(participant, name, stored))
    }

    /// Replace the store with `data`, then re-apply `pending` in order.
    ///
    /// Returns the store contents from before the replacement.
    ///
    /// # Errors
    ///
    /// Only if a pending operation no longer validates, which cannot happen
    /// for operations produced by [`apply_local`](Self::apply_local) on this
    /// engine.
    #[instrument(skip_all, fields(participants = data.len(), pending = pending.len()))]
    pub fn apply_remote_snapshot(
        &mut self,
        data: ParticipantData,
        pending: &[PendingOperation],
    ) -> Result<ParticipantData, TallyError> {
        for (participant, slot) in &data {
            for name in slot.keys().filter(|n| !self.registry.contains(n)) {
                debug!(%participant, name, "snapshot carries unregistered state; kept verbatim");
            }
        }

        let previous = self.store.snapshot();
        self.store.replace_from_snapshot(data);

        for op in pending {
            self.apply_op(&op.participant_id, &op.name, &op.value, op.op)?;
        }

        debug!(replayed = pending.len(), "applied remote snapshot");
        Ok(previous)
    }

    /// Typed read of one participant's state.
    ///
    /// # Errors
    ///
    /// [`TallyError::UnregisteredState`] if `name` is unknown.
    pub fn read(
        &self,
        participant: &ParticipantId,
        name: &str,
    ) -> Result<Option<StateReading>, TallyError> {
        let state_type = self.registry.type_of(name)?;
        Ok(self
            .store
            .get(participant, name)
            .map(|value| reading(state_type, value)))
    }

    /// Discard all store contents. Registrations and the sequence counter
    /// are kept.
    pub fn clear_store(&mut self) {
        self.store.clear();
    }

    /// Apply one operation to the store.
    ///
    /// Returns the value before and after; they are equal when the operation
    /// left the store unchanged. `None` after means the entry is still absent.
    fn apply_op(
        &mut self,
        participant: &ParticipantId,
        name: &str,
        raw: &StateValue,
        op: OpKind,
    ) -> Result<(Option<StateValue>, Option<StateValue>), TallyError> {
        let state_type = self.registry.type_of(name)?;
        let previous = self.store.get(participant, name).cloned();

        let current = match (state_type, op) {
            (StateType::Scalar, OpKind::Add) => Some(raw.clone()),
            (StateType::Scalar, OpKind::Remove) => previous.as_ref().map(|_| StateValue::Null),
            (StateType::Set, OpKind::Add) => {
                let member = set_member(name, raw)?;
                let mut members = previous
                    .as_ref()
                    .map(MemberSet::from_value)
                    .unwrap_or_default();
                members.insert(member);
                Some(members.to_value())
            }
            (StateType::Set, OpKind::Remove) => {
                let member = set_member(name, raw)?;
                match previous.as_ref() {
                    None => None,
                    Some(existing) => {
                        let mut members = MemberSet::from_value(existing);
                        if members.remove(&member) {
                            Some(members.to_value())
                        } else {
                            Some(existing.clone())
                        }
                    }
                }
            }
        };

        if let Some(value) = current.as_ref().filter(|v| previous.as_ref() != Some(*v)) {
            self.store.set(participant, name, value.clone());
        }
        Ok((previous, current))
    }
}

/// Shape a stored value according to its registered type.
///
/// The shape follows the type only: a set entry cleared to `null` reads as
/// `Members([])`, the same as a set emptied by removes. Callers that need to
/// tell the two apart look at the raw value through
/// [`ParticipantStateStore::get`](crate::store::ParticipantStateStore::get).
#[must_use]
pub fn reading(state_type: StateType, value: &StateValue) -> StateReading {
    match state_type {
        StateType::Scalar => StateReading::Scalar(value.clone()),
        StateType::Set => StateReading::Members(MemberSet::from_value(value).to_vec()),
    }
}
