//! Field projection views over snapshots.

use super::record::{CAPTURED_AT_FIELD, ENTITY_KEY_FIELD, SOURCE_TAG_FIELD, Snapshot};
use crate::domain::value::{Value, ValueMap};

/// A named subset of document fields.
///
/// `entityKey`, `sourceTag` and `capturedAt` are always kept so projected
/// rows stay identifiable. Fields absent from a document are omitted from its row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    fields: Vec<String>,
}

impl Projection {
    /// Project onto the given fields.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = [ENTITY_KEY_FIELD, SOURCE_TAG_FIELD, CAPTURED_AT_FIELD]
            .into_iter()
            .map(str::to_string)
            .collect();
        for field in fields {
            let field = field.into();
            if !field.is_empty() && !out.contains(&field) {
                out.push(field);
            }
        }
        Self { fields: out }
    }

    /// Parse a comma separated list. Returns `None` when no field is named.
    #[must_use]
    pub fn parse_list(list: &str) -> Option<Self> {
        let names: Vec<&str> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if names.is_empty() {
            None
        } else {
            Some(Self::new(names))
        }
    }

    /// Funding-rate view.
    #[must_use]
    pub fn funding_rates() -> Self {
        Self::new(["fundingRate"])
    }

    /// Projected field names, identity fields first.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Project one snapshot.
    #[must_use]
    pub fn apply(&self, snapshot: &Snapshot) -> Value {
        let map: ValueMap = self
            .fields
            .iter()
            .filter_map(|name| snapshot.field(name).map(|v| (name.clone(), v)))
            .collect();
        Value::Object(map)
    }

    /// Project many snapshots, preserving order.
    #[must_use]
    pub fn apply_all(&self, snapshots: &[Snapshot]) -> Vec<Value> {
        snapshots.iter().map(|s| self.apply(s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::Timestamp;
    use serde_json::json;

    fn snapshot() -> Snapshot {
        let payload = Value::from(json!({"fundingRate": 7, "markPrice": 101, "oracle": 100}));
        Snapshot::from_payload(
            "SOL-PERP",
            "drift",
            Timestamp::parse("2026-03-01T00:00:00Z").unwrap(),
            payload,
        )
        .unwrap()
        .remove(0)
    }

    #[test]
    fn funding_rate_view() {
        let row = Projection::funding_rates().apply(&snapshot());
        assert_eq!(
            row.to_plain_json(),
            json!({
                "entityKey": "SOL-PERP",
                "sourceTag": "drift",
                "fundingRate": 7,
                "capturedAt": "2026-03-01T00:00:00.000Z"
            })
        );
    }

    #[test]
    fn missing_fields_are_omitted() {
        let row = Projection::new(["nope"]).apply(&snapshot());
        assert_eq!(
            row.to_plain_json(),
            json!({
                "entityKey": "SOL-PERP",
                "sourceTag": "drift",
                "capturedAt": "2026-03-01T00:00:00.000Z"
            })
        );
    }

    #[test]
    fn parse_list() {
        assert!(Projection::parse_list(" , ").is_none());
        let p = Projection::parse_list("markPrice, oracle,markPrice").unwrap();
        assert_eq!(
            p.fields(),
            ["entityKey", "sourceTag", "capturedAt", "markPrice", "oracle"]
        );
    }
}
