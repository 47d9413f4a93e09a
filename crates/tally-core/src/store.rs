//! Per-participant, per-state value storage.
//!
//! Pure data: the store knows nothing about state types. Each participant
//! owns one slot, so writes from different participants never touch the same
//! key.

use std::collections::BTreeMap;

use crate::identity::ParticipantId;
use crate::value::StateValue;

/// One participant's state: state name to stored value.
pub type Slot = BTreeMap<String, StateValue>;

/// Full store contents keyed by participant.
pub type ParticipantData = BTreeMap<ParticipantId, Slot>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticipantStateStore {
    data: ParticipantData,
}

impl ParticipantStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `name` for `participant`.
    ///
    /// `None` means the participant never set `name`; `Some(StateValue::Null)`
    /// means it was explicitly cleared.
    #[must_use]
    pub fn get(&self, participant: &ParticipantId, name: &str) -> Option<&StateValue> {
        self.data.get(participant).and_then(|slot| slot.get(name))
    }

    /// Overwrite `name` for `participant` unconditionally.
    ///
    /// Returns the previous value.
    pub(crate) fn set(
        &mut self,
        participant: &ParticipantId,
        name: &str,
        value: StateValue,
    ) -> Option<StateValue> {
        self.data
            .entry(participant.clone())
            .or_default()
            .insert(name.to_string(), value)
    }

    /// Independent deep copy of the store contents.
    #[must_use]
    pub fn snapshot(&self) -> ParticipantData {
        self.data.clone()
    }

    /// Replace the whole store with `data`.
    pub fn replace_from_snapshot(&mut self, data: ParticipantData) {
        self.data = data;
    }

    /// One participant's slot, if it has ever written anything.
    #[must_use]
    pub fn slot(&self, participant: &ParticipantId) -> Option<&Slot> {
        self.data.get(participant)
    }

    pub fn participants(&self) -> impl Iterator<Item = &ParticipantId> {
        self.data.keys()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// `true` when no participant holds any value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.values().all(BTreeMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    #[test]
    fn never_set_and_cleared_are_distinguishable() {
        let mut store = ParticipantStateStore::new();
        store.set(&pid("p"), "vote", StateValue::Null);
        assert_eq!(store.get(&pid("p"), "vote"), Some(&StateValue::Null));
        assert_eq!(store.get(&pid("p"), "other"), None);
        assert_eq!(store.get(&pid("q"), "vote"), None);
    }

    #[test]
    fn set_returns_previous_value() {
        let mut store = ParticipantStateStore::new();
        assert_eq!(store.set(&pid("p"), "n", StateValue::from(1)), None);
        assert_eq!(
            store.set(&pid("p"), "n", StateValue::from(2)),
            Some(StateValue::from(1))
        );
    }

    #[test]
    fn snapshot_is_detached_from_store() {
        let mut store = ParticipantStateStore::new();
        store.set(&pid("p"), "n", StateValue::from(1));
        let snap = store.snapshot();
        store.set(&pid("p"), "n", StateValue::from(2));
        assert_eq!(snap[&pid("p")]["n"], StateValue::from(1));
    }

    #[test]
    fn replace_discards_previous_contents() {
        let mut store = ParticipantStateStore::new();
        store.set(&pid("p"), "n", StateValue::from(1));

        let mut data = ParticipantData::new();
        data.entry(pid("q"))
            .or_default()
            .insert("m".into(), StateValue::from("x"));
        store.replace_from_snapshot(data);

        assert_eq!(store.get(&pid("p"), "n"), None);
        assert_eq!(store.get(&pid("q"), "m"), Some(&StateValue::from("x")));
    }

    #[test]
    fn empty_slots_count_as_empty_store() {
        let mut store = ParticipantStateStore::new();
        let mut data = ParticipantData::new();
        data.insert(pid("p"), Slot::new());
        store.replace_from_snapshot(data);
        assert!(store.is_empty());
        assert_eq!(store.participants().count(), 1);
    }
}
