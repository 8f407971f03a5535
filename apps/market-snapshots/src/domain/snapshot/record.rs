//! Snapshot document.

use serde::{Serialize, Serializer};

use crate::domain::codec::CodecError;
use crate::domain::shared::Timestamp;
use crate::domain::value::{Value, ValueMap};

/// Document field holding the entity key.
pub const ENTITY_KEY_FIELD: &str = "entityKey";
/// Document field holding the source tag.
pub const SOURCE_TAG_FIELD: &str = "sourceTag";
/// Document field holding the capture time.
pub const CAPTURED_AT_FIELD: &str = "capturedAt";

const METADATA_FIELDS: [&str; 3] = [ENTITY_KEY_FIELD, SOURCE_TAG_FIELD, CAPTURED_AT_FIELD];

/// One captured state of an entity from one source.
///
/// The stored document is the payload with `entityKey`, `sourceTag` and
/// `capturedAt` merged in. Metadata always wins over same-named payload fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    entity_key: String,
    source_tag: String,
    captured_at: Timestamp,
    payload: ValueMap,
}

impl Snapshot {
    /// Create a snapshot. Metadata keys are removed from `payload`.
    pub fn new(
        entity_key: impl Into<String>,
        source_tag: impl Into<String>,
        captured_at: Timestamp,
        mut payload: ValueMap,
    ) -> Self {
        for field in METADATA_FIELDS {
            payload.remove(field);
        }
        Self {
            entity_key: entity_key.into(),
            source_tag: source_tag.into(),
            captured_at,
            payload,
        }
    }

    /// Shape a fetched payload into snapshots.
    ///
    /// An object yields one snapshot, an array of objects yields one per
    /// element. A shared node at either level is read through.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidShape`] for any other payload, and
    /// [`CodecError::SharedNodeLocked`] if a shared node is being written.
    pub fn from_payload(
        entity_key: &str,
        source_tag: &str,
        captured_at: Timestamp,
        payload: Value,
    ) -> Result<Vec<Self>, CodecError> {
        match resolve_shared(payload)? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| {
                    into_object(item, "array of objects")
                        .map(|map| Self::new(entity_key, source_tag, captured_at, map))
                })
                .collect(),
            other => {
                let map = into_object(other, "object or array of objects")?;
                Ok(vec![Self::new(entity_key, source_tag, captured_at, map)])
            }
        }
    }

    /// Rebuild a snapshot from a decoded stored body.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidShape`] if the body is not an object.
    pub fn from_document(
        entity_key: &str,
        source_tag: &str,
        captured_at: Timestamp,
        body: Value,
    ) -> Result<Self, CodecError> {
        let map = into_object(body, "object")?;
        Ok(Self::new(entity_key, source_tag, captured_at, map))
    }

    /// Entity key (ticker, market id, ...).
    #[must_use]
    pub fn entity_key(&self) -> &str {
        &self.entity_key
    }

    /// Source tag (venue, chain, ...).
    #[must_use]
    pub fn source_tag(&self) -> &str {
        &self.source_tag
    }

    /// Capture time.
    #[must_use]
    pub const fn captured_at(&self) -> Timestamp {
        self.captured_at
    }

    /// Payload fields without metadata.
    #[must_use]
    pub const fn payload(&self) -> &ValueMap {
        &self.payload
    }

    /// Look up a document field, metadata included.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            ENTITY_KEY_FIELD => Some(Value::from(self.entity_key.as_str())),
            SOURCE_TAG_FIELD => Some(Value::from(self.source_tag.as_str())),
            CAPTURED_AT_FIELD => Some(Value::String(self.captured_at.to_rfc3339())),
            _ => self.payload.get(name).cloned(),
        }
    }

    /// Full document: payload plus metadata.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let mut map = self.payload.clone();
        for field in METADATA_FIELDS {
            if let Some(value) = self.field(field) {
                map.insert(field.to_string(), value);
            }
        }
        Value::Object(map)
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_document().serialize(serializer)
    }
}

fn resolve_shared(value: Value) -> Result<Value, CodecError> {
    match value {
        Value::Shared(node) => node
            .try_read()
            .map(|inner| inner.clone())
            .ok_or(CodecError::SharedNodeLocked),
        other => Ok(other),
    }
}

fn into_object(value: Value, expected: &'static str) -> Result<ValueMap, CodecError> {
    match resolve_shared(value)? {
        Value::Object(map) => Ok(map),
        other => Err(CodecError::InvalidShape {
            expected,
            found: other.kind_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::SharedNode;
    use serde_json::json;

    fn t(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    #[test]
    fn metadata_overrides_payload_fields() {
        let payload = Value::from(json!({"entityKey": "spoofed", "fundingRate": 5}));
        let snapshots =
            Snapshot::from_payload("SOL-PERP", "drift", t("2026-03-01T00:00:00Z"), payload).unwrap();

        assert_eq!(snapshots.len(), 1);
        let doc = snapshots[0].to_document().to_plain_json();
        assert_eq!(
            doc,
            json!({
                "entityKey": "SOL-PERP",
                "sourceTag": "drift",
                "capturedAt": "2026-03-01T00:00:00.000Z",
                "fundingRate": 5
            })
        );
    }

    #[test]
    fn array_payload_yields_one_snapshot_per_record() {
        let payload = Value::from(json!([
            {"recordId": 1, "market": "SOL-PERP"},
            {"recordId": 2, "market": "SOL-PERP"}
        ]));
        let snapshots =
            Snapshot::from_payload("SOL-PERP", "drift", t("2026-03-01T00:00:00Z"), payload).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].field("recordId"), Some(Value::Int(2)));
    }

    #[test]
    fn scalar_payload_is_rejected() {
        let err = Snapshot::from_payload("X", "y", Timestamp::now(), Value::Int(3)).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidShape {
                expected: "object or array of objects",
                found: "int"
            }
        );
    }

    #[test]
    fn shared_payload_is_read_through() {
        let node = SharedNode::new(Value::from(json!({"fundingRate": 5})));
        let snapshots =
            Snapshot::from_payload("SOL-PERP", "drift", Timestamp::now(), Value::Shared(node)).unwrap();
        assert_eq!(snapshots[0].field("fundingRate"), Some(Value::Int(5)));
    }

    #[test]
    fn locked_shared_payload_is_reported() {
        let node = SharedNode::new(Value::from(json!({"fundingRate": 5})));
        let _writer = node.lock_exclusive();

        let err = Snapshot::from_payload("SOL-PERP", "drift", Timestamp::now(), Value::Shared(node.clone()))
            .unwrap_err();
        assert_eq!(err, CodecError::SharedNodeLocked);
    }

    #[test]
    fn array_with_scalar_element_is_rejected() {
        let payload = Value::from(json!([{"a": 1}, "oops"]));
        assert!(Snapshot::from_payload("X", "y", Timestamp::now(), payload).is_err());
    }
}
