//! Dedup keys for upsert targeting.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;

use super::record::{ENTITY_KEY_FIELD, SOURCE_TAG_FIELD};

/// Dedup key errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DedupError {
    /// A strategy needs at least one field.
    #[error("dedup strategy has no fields")]
    NoFields,

    /// The document is missing a key field, or the field is null.
    #[error("document is missing dedup field '{field}'")]
    MissingField {
        /// Name of the missing field.
        field: String,
    },

    /// The document is not an object.
    #[error("document is not an object")]
    NotAnObject,
}

/// Identity of "the same logical record" within one collection.
///
/// Rendered as the JSON array of the encoded key field values, so distinct
/// tuples never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    /// Wrap an already rendered key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Rendered key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names the document fields that make up a [`DedupKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupStrategy {
    fields: Vec<String>,
}

impl DedupStrategy {
    /// Build a strategy over the given fields, in order.
    ///
    /// # Errors
    ///
    /// Returns [`DedupError::NoFields`] for an empty field list.
    pub fn new<I, S>(fields: I) -> Result<Self, DedupError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() {
            return Err(DedupError::NoFields);
        }
        Ok(Self { fields })
    }

    /// Price snapshots: one current document per ticker and venue.
    #[must_use]
    pub fn price_snapshot() -> Self {
        Self {
            fields: vec![ENTITY_KEY_FIELD.to_string(), SOURCE_TAG_FIELD.to_string()],
        }
    }

    /// Funding-rate entries: one document per record id and market.
    #[must_use]
    pub fn funding_rate() -> Self {
        Self {
            fields: vec!["recordId".to_string(), "market".to_string()],
        }
    }

    /// Key fields.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Compute the key of an encoded document.
    ///
    /// # Errors
    ///
    /// Returns [`DedupError`] if the document is not an object or lacks a key field.
    pub fn key_for(&self, document: &Json) -> Result<DedupKey, DedupError> {
        let map = document.as_object().ok_or(DedupError::NotAnObject)?;
        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match map.get(field) {
                Some(value) if !value.is_null() => parts.push(value.clone()),
                _ => {
                    return Err(DedupError::MissingField {
                        field: field.clone(),
                    });
                }
            }
        }
        Ok(DedupKey(Json::Array(parts).to_string()))
    }
}

impl Default for DedupStrategy {
    fn default() -> Self {
        Self::price_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn price_snapshot_key() {
        let doc = json!({"entityKey": "SOL-PERP", "sourceTag": "drift", "px": 1});
        let key = DedupStrategy::price_snapshot().key_for(&doc).unwrap();
        assert_eq!(key.as_str(), r#"["SOL-PERP","drift"]"#);
    }

    #[test]
    fn keys_do_not_collide_on_separator_characters() {
        let strategy = DedupStrategy::new(["a", "b"]).unwrap();
        let k1 = strategy.key_for(&json!({"a": "x,y", "b": "z"})).unwrap();
        let k2 = strategy.key_for(&json!({"a": "x", "b": "y,z"})).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn bigint_components_use_encoded_form() {
        let doc = json!({"recordId": {"kind": "bigint", "digits": "18446744073709551616"}, "market": "BTC"});
        let key = DedupStrategy::funding_rate().key_for(&doc).unwrap();
        assert!(key.as_str().contains("18446744073709551616"));
    }

    #[test]
    fn missing_or_null_field_is_rejected() {
        let strategy = DedupStrategy::funding_rate();
        assert_eq!(
            strategy.key_for(&json!({"recordId": 1})),
            Err(DedupError::MissingField {
                field: "market".to_string()
            })
        );
        assert!(strategy.key_for(&json!({"recordId": null, "market": "m"})).is_err());
        assert_eq!(strategy.key_for(&json!([1])), Err(DedupError::NotAnObject));
    }

    #[test]
    fn empty_strategy_is_rejected() {
        assert_eq!(
            DedupStrategy::new(Vec::<String>::new()),
            Err(DedupError::NoFields)
        );
    }
}
