//! Storage Codec
//!
//! Bidirectional transform between the in-memory [`Value`] tree and the
//! storage-safe JSON form.
//!
//! # Wire Form
//!
//! | In memory | Stored |
//! |-----------|--------|
//! | `BigInt(n)` | `{"kind": "bigint", "digits": "<sign-prefixed base 10>"}` |
//! | `Shared` revisited while being encoded | `{"kind": "ref", "target": "<path>"}` |
//! | field that cannot be encoded | `"[unencodable <path>: <reason>]"` |
//!
//! Every other variant maps to its natural JSON counterpart.

mod error;

use std::collections::HashMap;
use std::str::FromStr;

use num_bigint::BigInt;
use serde_json::{Map, Number, Value as Json};

pub use error::{CodecError, FieldDiagnostic};

use super::value::{Value, number_to_value};

/// Tag value marking an encoded big integer.
pub const BIGINT_KIND: &str = "bigint";

/// Tag value marking a back-reference to a node still being encoded.
pub const REF_KIND: &str = "ref";

const KIND_FIELD: &str = "kind";
const DIGITS_FIELD: &str = "digits";
const TARGET_FIELD: &str = "target";
const ROOT_PATH: &str = "$";

/// How malformed big-integer tags are handled on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Substitute zero and log a warning.
    #[default]
    Lenient,
    /// Fail the decode with [`CodecError::MalformedBigInt`].
    Strict,
}

/// Result of one encode call.
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Storage form.
    pub value: Json,
    /// Fields that were replaced with diagnostic strings.
    pub diagnostics: Vec<FieldDiagnostic>,
}

/// Storage codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    mode: DecodeMode,
}

impl Codec {
    /// Codec with lenient decoding.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mode: DecodeMode::Lenient,
        }
    }

    /// Codec with the given decode mode.
    #[must_use]
    pub const fn with_mode(mode: DecodeMode) -> Self {
        Self { mode }
    }

    /// Codec that rejects malformed big-integer tags.
    #[must_use]
    pub const fn strict() -> Self {
        Self::with_mode(DecodeMode::Strict)
    }

    /// Configured decode mode.
    #[must_use]
    pub const fn mode(&self) -> DecodeMode {
        self.mode
    }

    /// Encode a value into its storage form.
    ///
    /// Never fails as a whole: a field that cannot be encoded is replaced with
    /// a diagnostic string and reported in [`Encoded::diagnostics`].
    #[must_use]
    pub fn encode(&self, value: &Value) -> Encoded {
        let mut encoder = Encoder::default();
        let value = encoder.encode_field(value);
        Encoded {
            value,
            diagnostics: encoder.diagnostics,
        }
    }

    /// Decode a storage form back into a value, honouring the decode mode.
    ///
    /// In lenient mode this never returns an error.
    pub fn decode(&self, form: &Json) -> Result<Value, CodecError> {
        let mut path = vec![];
        decode_node(form, &mut path, self.mode)
    }

    /// Decode with strict big-integer handling regardless of the configured mode.
    pub fn decode_strict(&self, form: &Json) -> Result<Value, CodecError> {
        let mut path = vec![];
        decode_node(form, &mut path, DecodeMode::Strict)
    }
}

// =============================================================================
// Paths
// =============================================================================

#[derive(Debug, Clone)]
enum Segment {
    Key(String),
    Index(usize),
}

fn render_path(path: &[Segment]) -> String {
    let mut out = String::from(ROOT_PATH);
    for segment in path {
        match segment {
            Segment::Key(key) => {
                out.push('.');
                out.push_str(key);
            }
            Segment::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }
    out
}

// =============================================================================
// Encoding
// =============================================================================

enum Slot {
    InProgress { path: String },
    Done(Json),
}

/// Per-call encoder state. The visited map is keyed by shared-node identity.
#[derive(Default)]
struct Encoder {
    visited: HashMap<usize, Slot>,
    path: Vec<Segment>,
    diagnostics: Vec<FieldDiagnostic>,
}

impl Encoder {
    fn encode_field(&mut self, value: &Value) -> Json {
        match self.encode_node(value) {
            Ok(json) => json,
            Err(err) => {
                let path = render_path(&self.path);
                tracing::warn!(path = %path, error = %err, "Replacing unencodable field");
                let placeholder = format!("[unencodable {path}: {err}]");
                self.diagnostics.push(FieldDiagnostic {
                    path,
                    message: err.to_string(),
                });
                Json::String(placeholder)
            }
        }
    }

    fn encode_node(&mut self, value: &Value) -> Result<Json, CodecError> {
        match value {
            Value::Null => Ok(Json::Null),
            Value::Bool(b) => Ok(Json::Bool(*b)),
            Value::Int(i) => Ok(Json::from(*i)),
            Value::Float(f) => Number::from_f64(*f)
                .map(Json::Number)
                .ok_or(CodecError::NonFiniteFloat { value: *f }),
            Value::BigInt(n) => Ok(encode_bigint(n)),
            Value::String(s) => Ok(Json::String(s.clone())),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    self.path.push(Segment::Index(i));
                    out.push(self.encode_field(item));
                    self.path.pop();
                }
                Ok(Json::Array(out))
            }
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, item) in map {
                    self.path.push(Segment::Key(key.clone()));
                    let encoded = self.encode_field(item);
                    self.path.pop();
                    out.insert(key.clone(), encoded);
                }
                Ok(Json::Object(out))
            }
            Value::Shared(node) => {
                let id = node.identity();
                match self.visited.get(&id) {
                    Some(Slot::Done(json)) => return Ok(json.clone()),
                    Some(Slot::InProgress { path }) => return Ok(ref_placeholder(path)),
                    None => {}
                }

                let Some(inner) = node.try_read() else {
                    return Err(CodecError::SharedNodeLocked);
                };
                self.visited.insert(
                    id,
                    Slot::InProgress {
                        path: render_path(&self.path),
                    },
                );
                let result = self.encode_node(&inner);
                drop(inner);

                match &result {
                    Ok(json) => {
                        self.visited.insert(id, Slot::Done(json.clone()));
                    }
                    Err(_) => {
                        self.visited.remove(&id);
                    }
                }
                result
            }
        }
    }
}

fn encode_bigint(n: &BigInt) -> Json {
    let mut map = Map::new();
    map.insert(KIND_FIELD.to_string(), Json::String(BIGINT_KIND.to_string()));
    map.insert(DIGITS_FIELD.to_string(), Json::String(n.to_string()));
    Json::Object(map)
}

fn ref_placeholder(target: &str) -> Json {
    let mut map = Map::new();
    map.insert(KIND_FIELD.to_string(), Json::String(REF_KIND.to_string()));
    map.insert(TARGET_FIELD.to_string(), Json::String(target.to_string()));
    Json::Object(map)
}

// =============================================================================
// Decoding
// =============================================================================

fn decode_node(form: &Json, path: &mut Vec<Segment>, mode: DecodeMode) -> Result<Value, CodecError> {
    match form {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => Ok(number_to_value(n)),
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                path.push(Segment::Index(i));
                out.push(decode_node(item, path, mode)?);
                path.pop();
            }
            Ok(Value::Array(out))
        }
        Json::Object(map) if is_bigint_tag(map) => decode_bigint(map, path, mode),
        Json::Object(map) => {
            let mut out = std::collections::BTreeMap::new();
            for (key, item) in map {
                path.push(Segment::Key(key.clone()));
                let decoded = decode_node(item, path, mode)?;
                path.pop();
                out.insert(key.clone(), decoded);
            }
            Ok(Value::Object(out))
        }
    }
}

/// An object is a big-integer tag when it has exactly `kind` and `digits`
/// and `kind` is `"bigint"`. Anything else passes through as an object.
fn is_bigint_tag(map: &Map<String, Json>) -> bool {
    map.len() == 2
        && map.contains_key(DIGITS_FIELD)
        && map.get(KIND_FIELD).and_then(Json::as_str) == Some(BIGINT_KIND)
}

fn decode_bigint(
    map: &Map<String, Json>,
    path: &[Segment],
    mode: DecodeMode,
) -> Result<Value, CodecError> {
    let digits = map.get(DIGITS_FIELD);
    if let Some(n) = digits.and_then(Json::as_str).and_then(parse_digits) {
        return Ok(Value::BigInt(n));
    }

    let path = render_path(path);
    let digits = digits.map_or_else(String::new, ToString::to_string);
    match mode {
        DecodeMode::Strict => Err(CodecError::MalformedBigInt { path, digits }),
        DecodeMode::Lenient => {
            tracing::warn!(path = %path, digits = %digits, "Malformed bigint, substituting zero");
            Ok(Value::BigInt(BigInt::ZERO))
        }
    }
}

/// Parse `-?[0-9]+` only.
fn parse_digits(s: &str) -> Option<BigInt> {
    let unsigned = s.strip_prefix('-').unwrap_or(s);
    if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    BigInt::from_str(s).ok()
}
