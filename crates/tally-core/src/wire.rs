//! JSON payloads exchanged with the transport.
//!
//! Inbound snapshots and outbound updates share the `participant_data`
//! field:
//!
//! ```json
//! {"participant_data": {"frodo": {"click-count": 5, "selection": "blue,red"}}}
//! ```
//!
//! Maps are `BTreeMap`s, so serialization is deterministic: the same store
//! always produces the same bytes.

use serde::{Deserialize, Serialize};

use crate::error::TallyError;
use crate::identity::ParticipantId;
use crate::merge::PendingOperation;
use crate::store::{ParticipantData, Slot};

/// MIME type of a response summary message part.
pub const RESPONSE_SUMMARY_MIME: &str = "application/vnd.layer.responsesummary+json";

/// Full snapshot of every participant's state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub participant_data: ParticipantData,
}

impl SnapshotPayload {
    /// Parse a snapshot body.
    ///
    /// # Errors
    ///
    /// [`TallyError::MalformedPayload`] if `body` is not a JSON object with a
    /// `participant_data` mapping of scalar values.
    pub fn parse(body: &str) -> Result<Self, TallyError> {
        Ok(serde_json::from_str(body)?)
    }

    /// Serialize to the wire form.
    ///
    /// # Errors
    ///
    /// Propagates `serde_json` failures, which cannot occur for this type.
    pub fn to_json(&self) -> Result<String, TallyError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One coalesced batch of local changes, as handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundUpdate {
    /// The sender's full slot at flush time.
    pub participant_data: ParticipantData,
    /// Operations in the order they were applied.
    pub operations: Vec<PendingOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
}

impl OutboundUpdate {
    #[must_use]
    pub fn new(
        sender: &ParticipantId,
        slot: Slot,
        operations: Vec<PendingOperation>,
        response_text: Option<String>,
    ) -> Self {
        let mut participant_data = ParticipantData::new();
        participant_data.insert(sender.clone(), slot);
        Self {
            participant_data,
            operations,
            response_text,
        }
    }

    /// The participant this update came from.
    #[must_use]
    pub fn sender(&self) -> Option<&ParticipantId> {
        self.participant_data.keys().next()
    }

    /// Serialize to the wire form.
    ///
    /// # Errors
    ///
    /// Propagates `serde_json` failures, which cannot occur for this type.
    pub fn to_json(&self) -> Result<String, TallyError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::OpKind;
    use crate::value::StateValue;

    #[test]
    fn parses_participant_data() {
        let payload = SnapshotPayload::parse(
            r#"{"participant_data":{"frodo":{"click-count":5,"selection":"blue,red","vote":null}}}"#,
        )
        .expect("parse");
        let slot = &payload.participant_data[&ParticipantId::from("frodo")];
        assert_eq!(slot["click-count"], StateValue::from(5));
        assert_eq!(slot["selection"], StateValue::from("blue,red"));
        assert_eq!(slot["vote"], StateValue::Null);
    }

    #[test]
    fn missing_participant_data_is_malformed() {
        let err = SnapshotPayload::parse(r#"{"other":{}}"#).expect_err("malformed");
        assert!(matches!(err, TallyError::MalformedPayload(_)));
        assert!(SnapshotPayload::parse("not json").is_err());
    }

    #[test]
    fn serialization_is_key_ordered() {
        let payload = SnapshotPayload::parse(
            r#"{"participant_data":{"sam":{"b":1,"a":2},"frodo":{"z":true}}}"#,
        )
        .expect("parse");
        assert_eq!(
            payload.to_json().expect("json"),
            r#"{"participant_data":{"frodo":{"z":true},"sam":{"a":2,"b":1}}}"#
        );
    }

    #[test]
    fn outbound_update_omits_absent_text() {
        let sender = ParticipantId::from("frodo");
        let mut slot = Slot::new();
        slot.insert("click-count".into(), StateValue::from(5));
        let op = PendingOperation {
            seq: 0,
            participant_id: sender.clone(),
            name: "click-count".into(),
            op: OpKind::Add,
            value: StateValue::from(5),
            wall_ts_us: 10,
        };
        let update = OutboundUpdate::new(&sender, slot, vec![op], None);
        let json = update.to_json().expect("json");
        assert!(json.starts_with(r#"{"participant_data":{"frodo":{"click-count":5}}"#));
        assert!(json.contains(r#""op":"add""#));
        assert!(!json.contains("response_text"));
        assert_eq!(update.sender(), Some(&sender));
    }
}
