//! Codec error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// Float is NaN or infinite and has no JSON representation.
    #[error("non-finite float {value}")]
    NonFiniteFloat {
        /// The rejected value.
        value: f64,
    },

    /// A shared node was exclusively locked during encoding.
    #[error("shared node is locked")]
    SharedNodeLocked,

    /// A big-integer tag carried digits that do not parse.
    #[error("malformed bigint at {path}: {digits}")]
    MalformedBigInt {
        /// Location of the tag inside the document.
        path: String,
        /// Raw JSON of the `digits` field.
        digits: String,
    },

    /// A payload did not have the shape required to build documents.
    #[error("invalid payload shape: expected {expected}, found {found}")]
    InvalidShape {
        /// Expected shape.
        expected: &'static str,
        /// Observed variant.
        found: &'static str,
    },
}

/// A field replaced during encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiagnostic {
    /// Path of the replaced field (`$.a.b[0]`).
    pub path: String,
    /// Why the field could not be encoded.
    pub message: String,
}
