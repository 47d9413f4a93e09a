//! Declared merge semantics per state name.
//!
//! Every state name carries exactly one [`StateType`], fixed at registration.
//! Readers and the merge engine consult the registry instead of guessing the
//! type from a stored value's shape.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TallyError;

/// Merge semantics for a registered state name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    /// Last writer wins; remove clears to null.
    Scalar,
    /// Multi-valued; add unions a member in, remove takes it out.
    Set,
}

impl StateType {
    /// Return the type name as a string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Set => "set",
        }
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scalar" => Ok(Self::Scalar),
            "set" => Ok(Self::Set),
            _ => Err(format!("unknown state type: {s}")),
        }
    }
}

/// Map from state name to its declared [`StateType`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeRegistry {
    states: BTreeMap<String, StateType>,
}

impl TypeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the merge type for `name`.
    ///
    /// Re-registering with the same type is a no-op.
    ///
    /// # Errors
    ///
    /// [`TallyError::ConflictingType`] if `name` is already registered with
    /// a different type.
    pub fn register_state(&mut self, name: &str, state_type: StateType) -> Result<(), TallyError> {
        match self.states.get(name) {
            Some(&registered) if registered != state_type => Err(TallyError::ConflictingType {
                name: name.to_string(),
                registered,
                requested: state_type,
            }),
            Some(_) => Ok(()),
            None => {
                self.states.insert(name.to_string(), state_type);
                Ok(())
            }
        }
    }

    /// Return the registered type of `name`.
    ///
    /// # Errors
    ///
    /// [`TallyError::UnregisteredState`] if `name` was never registered.
    pub fn type_of(&self, name: &str) -> Result<StateType, TallyError> {
        self.states
            .get(name)
            .copied()
            .ok_or_else(|| TallyError::UnregisteredState {
                name: name.to_string(),
            })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Registered states in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, StateType)> {
        self.states.iter().map(|(name, ty)| (name.as_str(), *ty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup() {
        let mut reg = TypeRegistry::new();
        reg.register_state("click-count", StateType::Scalar)
            .expect("register");
        assert_eq!(
            reg.type_of("click-count").expect("registered"),
            StateType::Scalar
        );
    }

    #[test]
    fn same_type_is_idempotent() {
        let mut reg = TypeRegistry::new();
        reg.register_state("selection", StateType::Set)
            .expect("first");
        reg.register_state("selection", StateType::Set)
            .expect("second");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn conflicting_type_is_rejected_and_original_kept() {
        let mut reg = TypeRegistry::new();
        reg.register_state("selection", StateType::Set)
            .expect("first");
        let err = reg
            .register_state("selection", StateType::Scalar)
            .expect_err("conflict");
        assert!(matches!(
            err,
            TallyError::ConflictingType {
                registered: StateType::Set,
                requested: StateType::Scalar,
                ..
            }
        ));
        assert_eq!(reg.type_of("selection").expect("kept"), StateType::Set);
    }

    #[test]
    fn unknown_name_is_an_error() {
        let reg = TypeRegistry::new();
        assert!(matches!(
            reg.type_of("nope"),
            Err(TallyError::UnregisteredState { name }) if name == "nope"
        ));
    }

    #[test]
    fn state_type_parses_and_displays() {
        for ty in [StateType::Scalar, StateType::Set] {
            assert_eq!(ty.as_str().parse::<StateType>(), Ok(ty));
            assert_eq!(ty.to_string(), ty.as_str());
        }
        assert!("counter".parse::<StateType>().is_err());
    }
}
