//! Participant identifiers and the identity resolution seam.
//!
//! Callers refer to participants by whatever reference their application
//! uses (an identity URL, a user handle). An [`IdentityResolver`] turns that
//! reference into the [`ParticipantId`] keying the store. Unresolvable
//! references are skipped with a warning, never treated as fatal.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a message participant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for ParticipantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ParticipantId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A resolved identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Application-level identity reference, e.g. `layer:///identities/frodo`.
    pub id: String,
    /// Key of this identity's slot in the participant store.
    pub participant_id: ParticipantId,
}

impl Identity {
    #[must_use]
    pub fn new(id: impl Into<String>, participant_id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            participant_id: participant_id.into(),
        }
    }
}

/// Translates caller-facing references into participant identities.
pub trait IdentityResolver {
    /// Resolve `reference`, or `None` when it is unknown.
    fn resolve(&self, reference: &str) -> Option<Identity>;
}

/// Treats every non-empty reference as a participant id.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResolver;

impl IdentityResolver for PassthroughResolver {
    fn resolve(&self, reference: &str) -> Option<Identity> {
        if reference.is_empty() {
            return None;
        }
        Some(Identity::new(reference, reference))
    }
}

/// In-memory directory of known identities.
///
/// Both the identity reference and the bare participant id resolve.
#[derive(Debug, Clone, Default)]
pub struct IdentityDirectory {
    by_reference: HashMap<String, Identity>,
}

impl IdentityDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity, replacing any entry with the same reference.
    pub fn insert(&mut self, identity: Identity) {
        self.by_reference
            .insert(identity.participant_id.as_str().to_string(), identity.clone());
        self.by_reference.insert(identity.id.clone(), identity);
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, id: &str, participant_id: &str) -> Self {
        self.insert(Identity::new(id, participant_id));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_reference.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_reference.is_empty()
    }
}

impl IdentityResolver for IdentityDirectory {
    fn resolve(&self, reference: &str) -> Option<Identity> {
        self.by_reference.get(reference).cloned()
    }
}

impl<R: IdentityResolver + ?Sized> IdentityResolver for Box<R> {
    fn resolve(&self, reference: &str) -> Option<Identity> {
        (**self).resolve(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_resolves_non_empty() {
        let r = PassthroughResolver;
        let identity = r.resolve("frodo").expect("resolves");
        assert_eq!(identity.participant_id, ParticipantId::from("frodo"));
        assert!(r.resolve("").is_none());
    }

    #[test]
    fn directory_resolves_reference_and_bare_id() {
        let dir = IdentityDirectory::new().with("layer:///identities/frodo", "frodo");
        let by_ref = dir.resolve("layer:///identities/frodo").expect("by ref");
        let by_id = dir.resolve("frodo").expect("by id");
        assert_eq!(by_ref, by_id);
        assert!(dir.resolve("sam").is_none());
    }

    #[test]
    fn participant_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&ParticipantId::from("p1")).expect("serialize");
        assert_eq!(json, r#""p1""#);
    }
}
