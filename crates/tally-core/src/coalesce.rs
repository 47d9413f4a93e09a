//! Fixed-window batching of local operations.
//!
//! The first operation after a flush arms a deadline `window` in the future.
//! Later operations join the same batch without moving the deadline, so a
//! burst of changes produces exactly one outbound update no later than
//! `window` after the burst started.
//!
//! The coalescer never sleeps or spawns anything. The host event loop asks
//! [`OutboundCoalescer::is_due`] (via `ResponseAggregate::poll`) and the
//! aggregate performs the flush. Cancelling clears the deadline, so nothing
//! can fire after a reset or dispose.

use std::time::Duration;

use tracing::trace;

use crate::merge::PendingOperation;

/// Default coalescing window.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(100);

/// A drained batch, ready to be turned into an outbound update.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    pub operations: Vec<PendingOperation>,
    pub response_text: Option<String>,
}

impl Batch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct OutboundCoalescer {
    window_us: i64,
    deadline_us: Option<i64>,
    pending: Vec<PendingOperation>,
    response_text: Option<String>,
}

impl Default for OutboundCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl OutboundCoalescer {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window_us: i64::try_from(window.as_micros()).unwrap_or(i64::MAX),
            deadline_us: None,
            pending: Vec::new(),
            response_text: None,
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_micros(u64::try_from(self.window_us).unwrap_or(0))
    }

    /// Queue an operation for the next flush.
    pub fn push(&mut self, operation: PendingOperation) {
        self.pending.push(operation);
    }

    /// Text to accompany the next outbound update. Replaces earlier text.
    pub fn set_response_text(&mut self, text: String) {
        self.response_text = Some(text);
    }

    /// Arm the deadline unless already armed.
    pub fn schedule(&mut self, now_us: i64) {
        if self.deadline_us.is_some() {
            return;
        }
        let deadline = now_us.saturating_add(self.window_us);
        trace!(deadline_us = deadline, "armed coalescing window");
        self.deadline_us = Some(deadline);
    }

    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.deadline_us.is_some()
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<i64> {
        self.deadline_us
    }

    /// `true` once the armed deadline has been reached.
    #[must_use]
    pub fn is_due(&self, now_us: i64) -> bool {
        self.deadline_us.is_some_and(|deadline| now_us >= deadline)
    }

    /// Disarm the deadline without touching queued work.
    pub fn cancel(&mut self) {
        self.deadline_us = None;
    }

    /// Disarm and take everything queued.
    pub fn drain(&mut self) -> Batch {
        self.cancel();
        Batch {
            operations: std::mem::take(&mut self.pending),
            response_text: self.response_text.take(),
        }
    }

    /// Disarm and drop everything queued.
    ///
    /// Returns how many operations were discarded.
    pub fn discard(&mut self) -> usize {
        self.cancel();
        self.response_text = None;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Operations waiting for the next flush, in call order.
    #[must_use]
    pub fn pending(&self) -> &[PendingOperation] {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ParticipantId;
    use crate::merge::OpKind;
    use crate::value::StateValue;

    fn op(seq: u64) -> PendingOperation {
        PendingOperation {
            seq,
            participant_id: ParticipantId::from("p"),
            name: "n".into(),
            op: OpKind::Add,
            value: StateValue::from(1),
            wall_ts_us: 0,
        }
    }

    #[test]
    fn schedule_arms_once_from_first_call() {
        let mut c = OutboundCoalescer::new(Duration::from_millis(100));
        c.schedule(1_000);
        c.schedule(50_000);
        assert_eq!(c.deadline(), Some(101_000));
        assert!(!c.is_due(100_999));
        assert!(c.is_due(101_000));
    }

    #[test]
    fn drain_takes_batch_and_disarms() {
        let mut c = OutboundCoalescer::default();
        c.push(op(0));
        c.push(op(1));
        c.set_response_text("voted".into());
        c.schedule(0);

        let batch = c.drain();
        assert_eq!(batch.operations.len(), 2);
        assert_eq!(batch.response_text.as_deref(), Some("voted"));
        assert!(!c.is_armed());
        assert!(c.pending().is_empty());
        assert!(c.drain().is_empty());
    }

    #[test]
    fn discard_drops_everything() {
        let mut c = OutboundCoalescer::default();
        c.push(op(0));
        c.schedule(0);
        assert_eq!(c.discard(), 1);
        assert!(!c.is_armed());
        assert!(!c.is_due(i64::MAX));
    }

    #[test]
    fn unarmed_coalescer_is_never_due() {
        let c = OutboundCoalescer::default();
        assert!(!c.is_due(i64::MAX));
        assert_eq!(c.window(), DEFAULT_WINDOW);
    }
}
