//! The response aggregate attached to one shared message.
//!
//! # Lifecycle
//!
//! ```text
//!   Empty ──register/add/snapshot──▶ Active ──dispose──▶ Disposed
//!     ▲                                 │
//!     └──────────────reset──────────────┘
//! ```
//!
//! `Disposed` is terminal: every later call fails with
//! [`TallyError::Disposed`].
//!
//! # Event Loop Contract
//!
//! Mutations run to completion synchronously. The only deferred work is the
//! coalesced flush: after a mutation the host calls [`ResponseAggregate::poll`]
//! whenever it gets a chance (at the latest at
//! [`ResponseAggregate::next_deadline`]), and the pending batch is sent once
//! the window has elapsed.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::coalesce::OutboundCoalescer;
use crate::config::TallyConfig;
use crate::error::{IdentityResolutionWarning, TallyError};
use crate::identity::{IdentityResolver, ParticipantId, PassthroughResolver};
use crate::merge::{MergeEngine, OpKind, reading};
use crate::notify::{
    ChangeEvent, ChangeSink, ChangeValue, NullSink, PARTICIPANT_DATA_PROPERTY, RESPONSES_PREFIX,
};
use crate::registry::{StateType, TypeRegistry};
use crate::store::ParticipantData;
use crate::transport::Transport;
use crate::value::{StateReading, StateValue};
use crate::wire::{OutboundUpdate, SnapshotPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Empty,
    Active,
    Disposed,
}

/// One participant's value in a [`StatesQuery`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateResult {
    /// Identity reference as resolved.
    pub identity_id: String,
    pub participant_id: ParticipantId,
    pub value: StateReading,
}

/// Result of [`ResponseAggregate::get_states`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatesQuery {
    pub results: Vec<StateResult>,
    /// References that could not be resolved and were skipped.
    pub warnings: Vec<IdentityResolutionWarning>,
}

pub struct ResponseAggregate {
    local: ParticipantId,
    engine: MergeEngine,
    coalescer: OutboundCoalescer,
    lifecycle: Lifecycle,
    transport: Box<dyn Transport>,
    resolver: Box<dyn IdentityResolver>,
    sink: Box<dyn ChangeSink>,
    clock: Box<dyn Clock>,
}

impl std::fmt::Debug for ResponseAggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseAggregate")
            .field("local", &self.local)
            .field("lifecycle", &self.lifecycle)
            .field("engine", &self.engine)
            .field("coalescer", &self.coalescer)
            .finish_non_exhaustive()
    }
}

impl ResponseAggregate {
    /// Create an aggregate for `local`, sending through `transport`.
    ///
    /// Defaults: pass-through identity resolution, no change listener, the
    /// system clock and a 100 ms coalescing window.
    #[must_use]
    pub fn new(local: impl Into<ParticipantId>, transport: Box<dyn Transport>) -> Self {
        Self {
            local: local.into(),
            engine: MergeEngine::new(),
            coalescer: OutboundCoalescer::default(),
            lifecycle: Lifecycle::Empty,
            transport,
            resolver: Box::new(PassthroughResolver),
            sink: Box::new(NullSink),
            clock: Box::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Box<dyn IdentityResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn ChangeSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.coalescer = OutboundCoalescer::new(window);
        self
    }

    /// Apply the coalescing window and state registrations from `config`.
    ///
    /// # Errors
    ///
    /// [`TallyError::ConflictingType`] if a configured state clashes with an
    /// existing registration.
    pub fn with_config(mut self, config: &TallyConfig) -> Result<Self, TallyError> {
        self.coalescer = OutboundCoalescer::new(config.coalesce_window());
        config.register_states(self.engine.registry_mut())?;
        if !config.states.is_empty() {
            self.lifecycle = Lifecycle::Active;
        }
        Ok(self)
    }

    #[must_use]
    pub const fn local(&self) -> &ParticipantId {
        &self.local
    }

    #[must_use]
    pub const fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    #[must_use]
    pub const fn registry(&self) -> &TypeRegistry {
        self.engine.registry()
    }

    /// Number of operations waiting for the next flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.coalescer.pending().len()
    }

    /// When the armed flush becomes due, in clock microseconds.
    #[must_use]
    pub const fn next_deadline(&self) -> Option<i64> {
        self.coalescer.deadline()
    }

    /// Declare the merge type of `name`.
    ///
    /// # Errors
    ///
    /// [`TallyError::ConflictingType`] or [`TallyError::Disposed`].
    pub fn register_state(&mut self, name: &str, state_type: StateType) -> Result<(), TallyError> {
        self.ensure_live()?;
        self.engine.registry_mut().register_state(name, state_type)?;
        self.lifecycle = Lifecycle::Active;
        Ok(())
    }

    /// Add `value` to the local participant's `name` state and schedule it
    /// to be sent.
    ///
    /// Returns the previous value.
    ///
    /// # Errors
    ///
    /// [`TallyError::UnregisteredState`], [`TallyError::InvalidSetMember`]
    /// or [`TallyError::Disposed`].
    pub fn add_state(
        &mut self,
        name: &str,
        value: impl Into<StateValue>,
    ) -> Result<Option<StateValue>, TallyError> {
        self.mutate(name, value.into(), OpKind::Add)
    }

    /// Remove `value` from the local participant's `name` state and
    /// schedule it to be sent. Scalars are cleared to null. Removing a member
    /// or scalar that is not there records and sends nothing.
    ///
    /// Returns the previous value.
    ///
    /// # Errors
    ///
    /// [`TallyError::UnregisteredState`], [`TallyError::InvalidSetMember`]
    /// or [`TallyError::Disposed`].
    pub fn remove_state(
        &mut self,
        name: &str,
        value: impl Into<StateValue>,
    ) -> Result<Option<StateValue>, TallyError> {
        self.mutate(name, value.into(), OpKind::Remove)
    }

    #[instrument(skip(self, value), fields(local = %self.local))]
    fn mutate(
        &mut self,
        name: &str,
        value: StateValue,
        op: OpKind,
    ) -> Result<Option<StateValue>, TallyError> {
        self.ensure_live()?;
        let now = self.clock.now_us();
        let state_type = self.engine.registry().type_of(name)?;
        let change = self
            .engine
            .apply_local(&self.local, name, value.clone(), op, now)?;
        self.lifecycle = Lifecycle::Active;

        let Some(operation) = change.operation else {
            return Ok(change.previous);
        };
        self.coalescer.push(operation);

        self.sink.notify(ChangeEvent {
            property: format!("{RESPONSES_PREFIX}{name}"),
            new_value: change
                .current
                .as_ref()
                .map(|v| ChangeValue::Reading(reading(state_type, v))),
            old_value: change
                .previous
                .as_ref()
                .map(|v| ChangeValue::Reading(reading(state_type, v))),
            added_value: (op == OpKind::Add).then_some(value),
            participant_id: Some(self.local.clone()),
        });

        self.coalescer.schedule(now);
        Ok(change.previous)
    }

    /// Set the initial `name` state of the participant `reference` resolves
    /// to, without sending anything.
    ///
    /// Returns `false` (after logging a warning) when `reference` does not
    /// resolve.
    ///
    /// # Errors
    ///
    /// [`TallyError::UnregisteredState`] or [`TallyError::Disposed`].
    pub fn add_initial_state(
        &mut self,
        name: &str,
        value: impl Into<StateValue>,
        reference: &str,
    ) -> Result<bool, TallyError> {
        self.ensure_live()?;
        let state_type = self.engine.registry().type_of(name)?;
        let Some(identity) = self.resolver.resolve(reference) else {
            warn!(state = name, reference, "identity not found for initial state");
            return Ok(false);
        };

        let previous = self
            .engine
            .apply_initial(&identity.participant_id, name, value.into())?;
        self.lifecycle = Lifecycle::Active;

        let current = self.engine.store().get(&identity.participant_id, name);
        self.sink.notify(ChangeEvent {
            property: format!("{RESPONSES_PREFIX}{name}"),
            new_value: current.map(|v| ChangeValue::Reading(reading(state_type, v))),
            old_value: previous
                .as_ref()
                .map(|v| ChangeValue::Reading(reading(state_type, v))),
            added_value: None,
            participant_id: Some(identity.participant_id),
        });
        Ok(true)
    }

    /// Status text to send with the next outbound update.
    ///
    /// # Errors
    ///
    /// [`TallyError::Disposed`].
    pub fn set_response_text(&mut self, text: impl Into<String>) -> Result<(), TallyError> {
        self.ensure_live()?;
        self.coalescer.set_response_text(text.into());
        Ok(())
    }

    /// Current `name` state of the participant `reference` resolves to.
    ///
    /// `Ok(None)` when the participant never set `name`, or when `reference`
    /// does not resolve (a warning is logged).
    ///
    /// # Errors
    ///
    /// [`TallyError::UnregisteredState`] or [`TallyError::Disposed`].
    pub fn get_state(
        &self,
        name: &str,
        reference: &str,
    ) -> Result<Option<StateReading>, TallyError> {
        self.ensure_live()?;
        self.engine.registry().type_of(name)?;
        let Some(identity) = self.resolver.resolve(reference) else {
            warn!(state = name, reference, "identity not found for get_state");
            return Ok(None);
        };
        self.engine.read(&identity.participant_id, name)
    }

    /// `name` state of each resolvable participant in `references` that has
    /// an entry for it, explicit clears included.
    ///
    /// # Errors
    ///
    /// [`TallyError::UnregisteredState`] or [`TallyError::Disposed`].
    pub fn get_states<I>(&self, name: &str, references: I) -> Result<StatesQuery, TallyError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.ensure_live()?;
        let state_type = self.engine.registry().type_of(name)?;
        let mut query = StatesQuery::default();

        for reference in references {
            let reference = reference.as_ref();
            let Some(identity) = self.resolver.resolve(reference) else {
                let warning = IdentityResolutionWarning {
                    state: name.to_string(),
                    reference: reference.to_string(),
                };
                warn!("{warning}");
                query.warnings.push(warning);
                continue;
            };

            if let Some(value) = self.engine.store().get(&identity.participant_id, name) {
                query.results.push(StateResult {
                    identity_id: identity.id,
                    participant_id: identity.participant_id,
                    value: reading(state_type, value),
                });
            }
        }

        Ok(query)
    }

    /// Parse a snapshot body and merge it in.
    ///
    /// # Errors
    ///
    /// [`TallyError::MalformedPayload`] or [`TallyError::Disposed`].
    pub fn apply_snapshot(&mut self, body: &str) -> Result<(), TallyError> {
        self.ensure_live()?;
        let payload = SnapshotPayload::parse(body)?;
        self.apply_snapshot_payload(payload)
    }

    /// Merge an already-parsed snapshot.
    ///
    /// Unflushed local operations are re-applied on top of the snapshot and
    /// stay queued for the next flush.
    ///
    /// # Errors
    ///
    /// [`TallyError::Disposed`].
    #[instrument(skip_all, fields(local = %self.local))]
    pub fn apply_snapshot_payload(&mut self, payload: SnapshotPayload) -> Result<(), TallyError> {
        self.ensure_live()?;
        let previous = self
            .engine
            .apply_remote_snapshot(payload.participant_data, self.coalescer.pending())?;
        self.lifecycle = Lifecycle::Active;

        let current = self.engine.store().snapshot();
        let first_participant = current.keys().next().cloned();
        self.sink.notify(ChangeEvent {
            property: PARTICIPANT_DATA_PROPERTY.to_string(),
            new_value: Some(ChangeValue::Store(current)),
            old_value: Some(ChangeValue::Store(previous)),
            added_value: None,
            participant_id: first_participant,
        });
        Ok(())
    }

    /// Deep copy of every participant's state.
    ///
    /// # Errors
    ///
    /// [`TallyError::Disposed`].
    pub fn snapshot(&self) -> Result<ParticipantData, TallyError> {
        self.ensure_live()?;
        Ok(self.engine.store().snapshot())
    }

    /// [`snapshot`](Self::snapshot) in wire form.
    ///
    /// # Errors
    ///
    /// [`TallyError::Disposed`].
    pub fn snapshot_payload(&self) -> Result<SnapshotPayload, TallyError> {
        Ok(SnapshotPayload {
            participant_data: self.snapshot()?,
        })
    }

    /// Send everything queued right now.
    ///
    /// Returns the update that was handed to the transport, or `None` when
    /// nothing was queued. A failed send is not retried; its operations are
    /// gone from the queue.
    ///
    /// # Errors
    ///
    /// [`TallyError::Transport`] or [`TallyError::Disposed`].
    pub fn flush(&mut self) -> Result<Option<OutboundUpdate>, TallyError> {
        self.ensure_live()?;
        let batch = self.coalescer.drain();
        if batch.is_empty() {
            if let Some(text) = batch.response_text {
                self.coalescer.set_response_text(text);
            }
            return Ok(None);
        }

        let slot = self
            .engine
            .store()
            .slot(&self.local)
            .cloned()
            .unwrap_or_default();
        let operations = batch.operations.len();
        let update = OutboundUpdate::new(&self.local, slot, batch.operations, batch.response_text);

        if let Err(err) = self.transport.send(&update) {
            warn!(local = %self.local, operations, error = %err, "dropping response update");
            return Err(err.into());
        }

        info!(local = %self.local, operations, "sent response update");
        Ok(Some(update))
    }

    /// Flush if the coalescing window has elapsed.
    ///
    /// # Errors
    ///
    /// As for [`flush`](Self::flush).
    pub fn poll(&mut self) -> Result<Option<OutboundUpdate>, TallyError> {
        self.ensure_live()?;
        if self.coalescer.is_due(self.clock.now_us()) {
            return self.flush();
        }
        Ok(None)
    }

    /// Drop every participant's state and any unsent operations.
    /// Registrations are kept.
    ///
    /// # Errors
    ///
    /// [`TallyError::Disposed`].
    pub fn reset(&mut self) -> Result<(), TallyError> {
        self.ensure_live()?;
        self.engine.clear_store();
        let dropped = self.coalescer.discard();
        self.lifecycle = Lifecycle::Empty;
        debug!(local = %self.local, dropped, "reset response aggregate");
        Ok(())
    }

    /// Tear down for good. Unsent operations are dropped and no flush will
    /// happen afterwards. Calling it again is a no-op.
    pub fn dispose(&mut self) {
        if self.lifecycle == Lifecycle::Disposed {
            return;
        }
        let dropped = self.coalescer.discard();
        self.engine.clear_store();
        self.lifecycle = Lifecycle::Disposed;
        debug!(local = %self.local, dropped, "disposed response aggregate");
    }

    fn ensure_live(&self) -> Result<(), TallyError> {
        match self.lifecycle {
            Lifecycle::Disposed => Err(TallyError::Disposed),
            Lifecycle::Empty | Lifecycle::Active => Ok(()),
        }
    }
}
