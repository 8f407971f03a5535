//! Write discipline selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which write contract a collection run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Replace-or-insert by dedup key into the current collection.
    #[default]
    #[serde(alias = "current")]
    Upsert,
    /// Append every entry to the history collection.
    #[serde(alias = "history")]
    Historical,
}

impl WriteMode {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Historical => "historical",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown write mode name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown write mode '{0}', expected 'upsert' or 'historical'")]
pub struct ParseWriteModeError(pub String);

impl FromStr for WriteMode {
    type Err = ParseWriteModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "upsert" | "current" => Ok(Self::Upsert),
            "historical" | "history" => Ok(Self::Historical),
            _ => Err(ParseWriteModeError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("upsert", WriteMode::Upsert)]
    #[test_case("CURRENT", WriteMode::Upsert)]
    #[test_case("historical", WriteMode::Historical)]
    #[test_case(" history ", WriteMode::Historical)]
    fn parses(input: &str, expected: WriteMode) {
        assert_eq!(input.parse::<WriteMode>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown() {
        assert!("append".parse::<WriteMode>().is_err());
    }

    #[test]
    fn default_is_upsert() {
        assert_eq!(WriteMode::default(), WriteMode::Upsert);
    }
}
