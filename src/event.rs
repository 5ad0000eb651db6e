//! Event records: the immutable unit of fact.

use serde_json::Value;
use uuid::Uuid;

use crate::metadata::Metadata;

/// Metadata key stamped with the event's global sequence number at save time.
pub const GLOBAL_SEQUENCE_NUMBER_KEY: &str = "global_sequence_number";
/// Metadata key stamped with the id of the batch the event was saved in.
pub const BATCH_ID_KEY: &str = "batch_id";

/// Event body.
///
/// Structured payloads are JSON and go through the payload codec; raw
/// payloads are stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Structured(Vec<u8>),
    Raw(Vec<u8>),
}

impl Payload {
    /// Structured payload from a JSON value.
    pub fn json(value: &Value) -> Self {
        Payload::Structured(value.to_string().into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Structured(bytes) | Payload::Raw(bytes) => bytes,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Payload::Structured(_))
    }

    /// Parse a structured payload back into a JSON value.
    ///
    /// Returns `None` for raw payloads or unparsable bytes.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Payload::Structured(bytes) => serde_json::from_slice(bytes).ok(),
            Payload::Raw(_) => None,
        }
    }
}

/// A single domain event as persisted in the log.
///
/// `global_sequence_number` is assigned by the store; the value supplied
/// by callers is ignored on save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub aggregate_id: String,
    pub sequence_number: u64,
    pub global_sequence_number: u64,
    pub metadata: Metadata,
    pub payload: Payload,
}

impl EventRecord {
    /// New unsaved event for `aggregate_id` at `sequence_number`.
    pub fn new(aggregate_id: impl Into<String>, sequence_number: u64, payload: Payload) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            sequence_number,
            global_sequence_number: 0,
            metadata: Metadata::new(),
            payload,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Batch id stamped at save time, if any.
    pub fn batch_id(&self) -> Option<Uuid> {
        self.metadata
            .get(BATCH_ID_KEY)
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_payload_round_trips() {
        let value = json!({"name": "widget", "qty": 3});
        let payload = Payload::json(&value);
        assert!(payload.is_structured());
        assert_eq!(payload.to_json(), Some(value));
    }

    #[test]
    fn test_raw_payload_has_no_json() {
        let payload = Payload::Raw(vec![0xff, 0x00]);
        assert!(!payload.is_structured());
        assert_eq!(payload.to_json(), None);
        assert_eq!(payload.as_bytes(), &[0xff, 0x00]);
    }

    #[test]
    fn test_batch_id_from_metadata() {
        let id = Uuid::new_v4();
        let mut event = EventRecord::new("A", 0, Payload::Raw(vec![]));
        assert_eq!(event.batch_id(), None);
        event.metadata.insert(BATCH_ID_KEY, id);
        assert_eq!(event.batch_id(), Some(id));
    }
}
