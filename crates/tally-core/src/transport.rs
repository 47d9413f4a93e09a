//! Outbound transport seam.

use std::cell::RefCell;
use std::rc::Rc;

use crate::wire::OutboundUpdate;

/// Failure reported by a transport. Delivery and retry policy belong to the
/// transport; the aggregate only reports the error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transport failed: {reason}")]
pub struct TransportError {
    pub reason: String,
}

impl TransportError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Sends coalesced updates to the other participants.
pub trait Transport {
    /// Hand `update` over for delivery.
    ///
    /// # Errors
    ///
    /// Any failure to accept the update.
    fn send(&mut self, update: &OutboundUpdate) -> Result<(), TransportError>;
}

/// Transport that keeps every update it is given.
///
/// Clones share the same outbox.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    outbox: Rc<RefCell<Vec<OutboundUpdate>>>,
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundUpdate> {
        self.outbox.borrow().clone()
    }

    /// Take every update sent so far.
    #[must_use]
    pub fn take(&self) -> Vec<OutboundUpdate> {
        std::mem::take(&mut *self.outbox.borrow_mut())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outbox.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outbox.borrow().is_empty()
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, update: &OutboundUpdate) -> Result<(), TransportError> {
        self.outbox.borrow_mut().push(update.clone());
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, update: &OutboundUpdate) -> Result<(), TransportError> {
        (**self).send(update)
    }
}
