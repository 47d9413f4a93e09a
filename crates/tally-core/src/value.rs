//! Stored values and the canonical set encoding.
//!
//! Values travel on the wire exactly as they are stored: scalars as JSON
//! scalars, sets as one comma-joined string of members. [`MemberSet`] is the
//! codec between that joined form and a deduplicated member collection.
//!
//! # Canonical Set Form
//!
//! Members are trimmed, deduplicated (case-sensitive) and sorted
//! lexicographically before joining with `,`. Two replicas holding the same
//! members therefore serialize byte-identical values regardless of the order
//! the members were added in.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::error::TallyError;

/// Separator used in the joined set form.
pub const SET_SEPARATOR: char = ',';

/// A value held in a participant's slot.
///
/// `Null` means the participant explicitly cleared the state. A state that
/// was never set has no entry at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
}

impl StateValue {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

macro_rules! state_value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for StateValue {
            fn from(value: $t) -> Self {
                Self::Number(Number::from(value))
            }
        })*
    };
}

state_value_from_int!(i32, i64, u32, u64);

/// A typed read of one participant's state.
///
/// The variant is chosen by the registered [`crate::registry::StateType`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StateReading {
    Scalar(StateValue),
    Members(Vec<String>),
}

impl StateReading {
    /// Members of a set reading, `None` for scalars.
    #[must_use]
    pub fn members(&self) -> Option<&[String]> {
        match self {
            Self::Members(m) => Some(m),
            Self::Scalar(_) => None,
        }
    }

    /// The scalar value, `None` for sets.
    #[must_use]
    pub const fn scalar(&self) -> Option<&StateValue> {
        match self {
            Self::Scalar(v) => Some(v),
            Self::Members(_) => None,
        }
    }
}

impl fmt::Display for StateReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => write!(f, "{v}"),
            Self::Members(m) => write!(f, "[{}]", m.join(", ")),
        }
    }
}

/// Deduplicated set members with a canonical joined encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberSet {
    members: BTreeSet<String>,
}

impl MemberSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a joined member list. Whitespace around separators is ignored
    /// and empty members are dropped.
    #[must_use]
    pub fn parse(joined: &str) -> Self {
        let members = joined
            .split(SET_SEPARATOR)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
        Self { members }
    }

    /// Interpret a stored value as a member set.
    ///
    /// `Null` (explicitly cleared) reads as empty. Non-text scalars written by
    /// a peer read as a single member.
    #[must_use]
    pub fn from_value(value: &StateValue) -> Self {
        match value {
            StateValue::Null => Self::new(),
            StateValue::Text(s) => Self::parse(s),
            other => Self::parse(&other.to_string()),
        }
    }

    /// Insert a member. Returns `true` if it was not already present.
    pub fn insert(&mut self, member: String) -> bool {
        self.members.insert(member)
    }

    /// Remove a member. Returns `true` if it was present.
    pub fn remove(&mut self, member: &str) -> bool {
        self.members.remove(member)
    }

    #[must_use]
    pub fn contains(&self, member: &str) -> bool {
        self.members.contains(member)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Canonical joined form.
    #[must_use]
    pub fn join(&self) -> String {
        let mut out = String::new();
        for (i, member) in self.members.iter().enumerate() {
            if i > 0 {
                out.push(SET_SEPARATOR);
            }
            out.push_str(member);
        }
        out
    }

    /// Canonical stored value.
    #[must_use]
    pub fn to_value(&self) -> StateValue {
        StateValue::Text(self.join())
    }

    /// Members in canonical order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.members.iter().cloned().collect()
    }
}

/// Validate and normalise a raw value as a member of set state `name`.
///
/// # Errors
///
/// [`TallyError::InvalidSetMember`] for `Null`, for members that are empty
/// after trimming, and for members containing the separator.
pub fn set_member(name: &str, raw: &StateValue) -> Result<String, TallyError> {
    let invalid = || TallyError::InvalidSetMember {
        name: name.to_string(),
        member: raw.to_string(),
    };

    if raw.is_null() {
        return Err(invalid());
    }

    let rendered = raw.to_string();
    let member = rendered.trim();
    if member.is_empty() || member.contains(SET_SEPARATOR) {
        return Err(invalid());
    }
    Ok(member.to_string())
}
