//! Payload Value Tree
//!
//! In-memory representation of a fetched payload. Every node carries an
//! explicit kind so consumers match on variants instead of sniffing shapes.
//!
//! Arbitrary-precision integers live in [`Value::BigInt`]. Shared references
//! (and cycles) are expressed with [`SharedNode`], a reference-counted,
//! lock-guarded node whose identity is the address of its allocation.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use num_bigint::BigInt;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Serialize, Serializer};

/// Object representation: keys are kept sorted.
pub type ValueMap = BTreeMap<String, Value>;

/// A payload node.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// JSON null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer that fits in 64 bits.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Arbitrary-precision integer.
    BigInt(BigInt),
    /// UTF-8 string.
    String(String),
    /// Ordered sequence.
    Array(Vec<Self>),
    /// Keyed map.
    Object(ValueMap),
    /// Node that may be referenced from several places in the tree.
    Shared(SharedNode),
}

impl Value {
    /// Build an object from key/value pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Self)>,
    {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build an array.
    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        Self::Array(items.into_iter().collect())
    }

    /// Wrap a value in a new shared node.
    #[must_use]
    pub fn shared(inner: Self) -> Self {
        Self::Shared(SharedNode::new(inner))
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// String contents, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Object entries, if this is an object.
    #[must_use]
    pub const fn as_object(&self) -> Option<&ValueMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key on an object.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Short name of the variant, used in diagnostics.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::BigInt(_) => "bigint",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Shared(_) => "shared",
        }
    }

    /// Convert to plain JSON for API responses.
    ///
    /// Big integers become decimal strings, non-finite floats become `null`
    /// and a shared node reached again through its own subtree becomes `null`.
    /// This is a presentation format; storage goes through the codec.
    #[must_use]
    pub fn to_plain_json(&self) -> serde_json::Value {
        let mut ancestors = HashSet::new();
        plain_json(self, &mut ancestors)
    }
}

fn plain_json(value: &Value, ancestors: &mut HashSet<usize>) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::BigInt(n) => Json::String(n.to_string()),
        Value::String(s) => Json::String(s.clone()),
        Value::Array(items) => Json::Array(items.iter().map(|v| plain_json(v, ancestors)).collect()),
        Value::Object(map) => Json::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), plain_json(v, ancestors)))
                .collect(),
        ),
        Value::Shared(node) => {
            let id = node.identity();
            if !ancestors.insert(id) {
                return Json::Null;
            }
            let out = node
                .try_read()
                .map_or(Json::Null, |inner| plain_json(&inner, ancestors));
            ancestors.remove(&id);
            out
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_plain_json().serialize(serializer)
    }
}

impl From<serde_json::Value> for Value {
    /// Plain JSON import. Integers outside `i64` become [`Value::BigInt`];
    /// no tag recognition happens here.
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => number_to_value(&n),
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Json::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

/// Map a JSON number onto the narrowest payload variant.
///
/// Numbers keep their source literal, so integer literals of any width
/// land in [`Value::BigInt`] without passing through `f64`.
pub(crate) fn number_to_value(n: &serde_json::Number) -> Value {
    if let Some(i) = n.as_i64() {
        return Value::Int(i);
    }
    let literal = n.as_str();
    if !literal.contains(['.', 'e', 'E'])
        && let Ok(big) = BigInt::from_str(literal)
    {
        return Value::BigInt(big);
    }
    Value::Float(n.as_f64().unwrap_or(f64::NAN))
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<BigInt> for Value {
    fn from(n: BigInt) -> Self {
        Self::BigInt(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Self>> for Value {
    fn from(items: Vec<Self>) -> Self {
        Self::Array(items)
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Self::Object(map)
    }
}

// =============================================================================
// Shared Nodes
// =============================================================================

/// A node that can be referenced from several parents.
///
/// Cloning a `SharedNode` clones the handle, not the contents. Equality is
/// identity: two handles are equal when they point at the same allocation.
#[derive(Clone)]
pub struct SharedNode(Arc<RwLock<Value>>);

impl SharedNode {
    /// Create a node holding `inner`.
    #[must_use]
    pub fn new(inner: Value) -> Self {
        Self(Arc::new(RwLock::new(inner)))
    }

    /// Replace the node contents. Used to close cycles after construction.
    pub fn set(&self, inner: Value) {
        *self.0.write() = inner;
    }

    /// Read the node contents, blocking while a writer holds the lock.
    #[must_use]
    pub fn read(&self) -> RwLockReadGuard<'_, Value> {
        self.0.read()
    }

    /// Read the node contents without blocking.
    #[must_use]
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, Value>> {
        self.0.try_read()
    }

    /// Take a write lock and hold it for the lifetime of the guard.
    #[must_use]
    pub fn lock_exclusive(&self) -> parking_lot::RwLockWriteGuard<'_, Value> {
        self.0.write()
    }

    /// Address of the shared allocation.
    #[must_use]
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl PartialEq for SharedNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SharedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedNode({:#x})", self.identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_import_picks_narrowest_number() {
        let value = Value::from(json!({
            "small": 42,
            "big": u64::MAX,
            "ratio": 0.5,
        }));

        assert_eq!(value.get("small"), Some(&Value::Int(42)));
        assert_eq!(value.get("big"), Some(&Value::BigInt(BigInt::from(u64::MAX))));
        assert_eq!(value.get("ratio"), Some(&Value::Float(0.5)));
    }

    #[test]
    fn json_import_keeps_integers_wider_than_64_bits() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{"openInterest": 123456789012345678901234567890, "debt": -99999999999999999999, "scaled": 1e30}"#,
        )
        .unwrap();
        let value = Value::from(json);

        assert_eq!(
            value.get("openInterest"),
            Some(&Value::BigInt(BigInt::from_str("123456789012345678901234567890").unwrap()))
        );
        assert_eq!(
            value.get("debt"),
            Some(&Value::BigInt(BigInt::from_str("-99999999999999999999").unwrap()))
        );
        assert_eq!(value.get("scaled"), Some(&Value::Float(1e30)));
    }

    #[test]
    fn plain_json_renders_bigint_as_string() {
        let n: BigInt = "-123456789012345678901234567890".parse().unwrap();
        let value = Value::object([("oi", Value::BigInt(n))]);

        assert_eq!(
            value.to_plain_json(),
            json!({"oi": "-123456789012345678901234567890"})
        );
    }

    #[test]
    fn plain_json_terminates_on_cycles() {
        let node = SharedNode::new(Value::Null);
        node.set(Value::object([
            ("name", Value::from("loop")),
            ("self", Value::Shared(node.clone())),
        ]));

        let rendered = Value::Shared(node).to_plain_json();
        assert_eq!(rendered, json!({"name": "loop", "self": null}));
    }

    #[test]
    fn shared_node_equality_is_identity() {
        let a = SharedNode::new(Value::Int(1));
        let b = SharedNode::new(Value::Int(1));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn debug_does_not_follow_shared_contents() {
        let node = SharedNode::new(Value::Null);
        node.set(Value::array([Value::Shared(node.clone())]));
        let printed = format!("{:?}", Value::Shared(node));
        assert!(printed.starts_with("Shared(SharedNode(0x"));
    }
}
