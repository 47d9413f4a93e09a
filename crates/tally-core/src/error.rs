use std::fmt;

use crate::registry::StateType;

/// Errors raised by the response aggregation engine.
///
/// Every variant is reported synchronously to the caller that attempted the
/// invalid operation. Nothing in this crate retries.
#[derive(Debug, thiserror::Error)]
pub enum TallyError {
    /// The operation referenced a state name that was never registered.
    #[error("state '{name}' is not registered")]
    UnregisteredState { name: String },

    /// A state name was re-registered with a different type.
    #[error("state '{name}' is registered as {registered}, cannot re-register as {requested}")]
    ConflictingType {
        name: String,
        registered: StateType,
        requested: StateType,
    },

    /// The aggregate has been disposed.
    #[error("response aggregate has been disposed")]
    Disposed,

    /// A set member cannot be represented in the comma-joined wire form.
    #[error("invalid member {member:?} for set state '{name}'")]
    InvalidSetMember { name: String, member: String },

    /// An inbound payload could not be parsed.
    #[error("malformed response summary payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// The transport refused an outbound update.
    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),
}

impl TallyError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnregisteredState { .. } => ErrorCode::UnregisteredState,
            Self::ConflictingType { .. } => ErrorCode::ConflictingType,
            Self::Disposed => ErrorCode::Disposed,
            Self::InvalidSetMember { .. } => ErrorCode::InvalidSetMember,
            Self::MalformedPayload(_) => ErrorCode::MalformedPayload,
            Self::Transport(_) => ErrorCode::TransportFailed,
        }
    }
}

/// Warning raised when a participant reference cannot be resolved.
///
/// Never fatal: the request proceeds with the unresolved entry skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityResolutionWarning {
    /// State name that was being read.
    pub state: String,
    /// The reference the resolver did not recognise.
    pub reference: String,
}

impl fmt::Display for IdentityResolutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "identity not found for reference '{}' while reading '{}'",
            self.reference, self.state
        )
    }
}

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UnregisteredState,
    ConflictingType,
    InvalidSetMember,
    Disposed,
    MalformedPayload,
    TransportFailed,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::UnregisteredState => "E1001",
            Self::ConflictingType => "E1002",
            Self::InvalidSetMember => "E1003",
            Self::Disposed => "E2001",
            Self::MalformedPayload => "E3001",
            Self::TransportFailed => "E5001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::UnregisteredState => "State name not registered",
            Self::ConflictingType => "State registered with a different type",
            Self::InvalidSetMember => "Invalid set member",
            Self::Disposed => "Response aggregate disposed",
            Self::MalformedPayload => "Malformed response summary payload",
            Self::TransportFailed => "Transport rejected outbound update",
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::UnregisteredState => {
                Some("Call register_state (or add it to [states] in .tally/config.toml) first.")
            }
            Self::ConflictingType => Some("A state keeps the type it was first registered with."),
            Self::InvalidSetMember => Some("Set members must be non-empty and contain no commas."),
            Self::Disposed => None,
            Self::MalformedPayload => {
                Some("Payload must be a JSON object with a participant_data mapping.")
            }
            Self::TransportFailed => Some("The batch was dropped; issue a new change to resend."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
