//! tally-core: response aggregation for shared messages.
//!
//! Many participants attach typed state (votes, selections, counters, flags)
//! to one message. Each participant writes only its own slot, the declared
//! [`StateType`] decides how values merge, local bursts are coalesced into a
//! single outbound update, and any participant can rebuild the full view from
//! a snapshot.
//!
//! ```
//! use tally_core::{ResponseAggregate, StateReading, StateType, transport::RecordingTransport};
//!
//! let outbox = RecordingTransport::new();
//! let mut responses = ResponseAggregate::new("frodo", Box::new(outbox.clone()));
//! responses.register_state("selection", StateType::Set)?;
//! responses.add_state("selection", "red")?;
//! responses.add_state("selection", "blue")?;
//! responses.remove_state("selection", "red")?;
//!
//! assert_eq!(
//!     responses.get_state("selection", "frodo")?,
//!     Some(StateReading::Members(vec!["blue".into()]))
//! );
//! responses.flush()?;
//! assert_eq!(outbox.len(), 1);
//! # Ok::<(), tally_core::TallyError>(())
//! ```
//!
//! # Conventions
//!
//! - **Errors**: library calls return [`TallyError`]; config loading uses `anyhow`.
//! - **Logging**: `tracing` macros; subscribers are installed by binaries.

pub mod aggregate;
pub mod clock;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod identity;
pub mod merge;
pub mod notify;
pub mod registry;
pub mod store;
pub mod transport;
pub mod value;
pub mod wire;

pub use aggregate::{Lifecycle, ResponseAggregate, StateResult, StatesQuery};
pub use error::{ErrorCode, IdentityResolutionWarning, TallyError};
pub use identity::{Identity, IdentityResolver, ParticipantId};
pub use merge::{OpKind, PendingOperation};
pub use registry::{StateType, TypeRegistry};
pub use store::{ParticipantData, ParticipantStateStore};
pub use value::{StateReading, StateValue};
pub use wire::{OutboundUpdate, SnapshotPayload};
