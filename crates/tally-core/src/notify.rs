//! Change notifications.
//!
//! The aggregate announces every change to an injected [`ChangeSink`]
//! instead of holding a pointer back to the message it annotates. Delivery
//! is fire-and-forget: a sink that cannot deliver drops the event.

use std::sync::mpsc::Sender;

use serde::Serialize;

use crate::identity::ParticipantId;
use crate::store::ParticipantData;
use crate::value::{StateReading, StateValue};

/// Property prefix for per-state change events.
pub const RESPONSES_PREFIX: &str = "responses.";

/// Property used when a snapshot replaced the whole store.
pub const PARTICIPANT_DATA_PROPERTY: &str = "responses.participantData";

/// Value carried by a change event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChangeValue {
    Reading(StateReading),
    Store(ParticipantData),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    /// `responses.<state>` or [`PARTICIPANT_DATA_PROPERTY`].
    pub property: String,
    pub new_value: Option<ChangeValue>,
    pub old_value: Option<ChangeValue>,
    /// For adds, the operand that was added.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_value: Option<StateValue>,
    pub participant_id: Option<ParticipantId>,
}

impl ChangeEvent {
    /// Name of the state this event is about, if it is a per-state event.
    #[must_use]
    pub fn state_name(&self) -> Option<&str> {
        if self.property == PARTICIPANT_DATA_PROPERTY {
            return None;
        }
        self.property.strip_prefix(RESPONSES_PREFIX)
    }
}

/// Receives change events.
pub trait ChangeSink {
    fn notify(&self, event: ChangeEvent);
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ChangeSink for NullSink {
    fn notify(&self, _event: ChangeEvent) {}
}

impl ChangeSink for Sender<ChangeEvent> {
    fn notify(&self, event: ChangeEvent) {
        // Receiver gone means nobody is listening.
        let _ = self.send(event);
    }
}

impl<S: ChangeSink + ?Sized> ChangeSink for Box<S> {
    fn notify(&self, event: ChangeEvent) {
        (**self).notify(event);
    }
}
