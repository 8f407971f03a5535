//! HTTP query parameters.
//!
//! Parameters arrive as raw strings and are parsed here, so a bad value
//! produces the JSON error envelope rather than a plain-text rejection.

use std::str::FromStr;

use serde::Deserialize;

use super::response::ApiError;
use crate::application::services::View;
use crate::domain::snapshot::{Projection, WriteMode};

/// `GET /snapshots/latest`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LatestParams {
    /// Restrict to one source.
    pub source: Option<String>,
    /// `current` (default) or `history`.
    pub view: Option<String>,
    /// Comma separated field projection.
    pub fields: Option<String>,
}

/// `GET /snapshots/{key}/history`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryParams {
    /// Maximum number of snapshots.
    pub limit: Option<String>,
    /// Restrict to one source.
    pub source: Option<String>,
    /// `history` (default) or `current`.
    pub view: Option<String>,
    /// Comma separated field projection.
    pub fields: Option<String>,
}

/// `GET /snapshots/keys`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysParams {
    /// Restrict to one source.
    pub source: Option<String>,
    /// `current` (default) or `history`.
    pub view: Option<String>,
}

/// `GET /funding-rates/latest`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceParams {
    /// Restrict to one source.
    pub source: Option<String>,
}

/// `POST /collect`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectParams {
    /// `upsert` (default) or `historical`.
    pub mode: Option<String>,
}

/// Parse an optional view, falling back to `default`.
pub fn parse_view(raw: Option<&str>, default: View) -> Result<View, ApiError> {
    non_empty(raw).map_or(Ok(default), |v| {
        View::from_str(v).map_err(|e| ApiError::bad_request(e.to_string()))
    })
}

/// Parse an optional write mode, falling back to `default`.
pub fn parse_mode(raw: Option<&str>, default: WriteMode) -> Result<WriteMode, ApiError> {
    non_empty(raw).map_or(Ok(default), |v| {
        WriteMode::from_str(v).map_err(|e| ApiError::bad_request(e.to_string()))
    })
}

/// Parse an optional history limit.
pub fn parse_limit(raw: Option<&str>, default: usize) -> Result<usize, ApiError> {
    non_empty(raw).map_or(Ok(default), |v| {
        v.parse::<usize>().map_err(|_| {
            ApiError::bad_request(format!("invalid limit '{v}', expected a non-negative integer"))
        })
    })
}

/// Parse an optional field list. Blank lists mean no projection.
pub fn parse_fields(raw: Option<&str>) -> Option<Projection> {
    raw.and_then(Projection::parse_list)
}

/// Empty source filter means no filter.
pub fn source_filter(raw: Option<&String>) -> Option<String> {
    non_empty(raw.map(String::as_str)).map(str::to_string)
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use test_case::test_case;

    #[test_case(None, View::Current ; "absent uses default")]
    #[test_case(Some(""), View::Current ; "blank uses default")]
    #[test_case(Some("history"), View::History ; "history")]
    #[test_case(Some("Historical"), View::History ; "alias")]
    fn view_parsing(raw: Option<&str>, expected: View) {
        assert_eq!(parse_view(raw, View::Current).unwrap(), expected);
    }

    #[test_case(Some("current"), WriteMode::Upsert ; "current alias")]
    #[test_case(Some("historical"), WriteMode::Historical ; "historical")]
    #[test_case(None, WriteMode::Upsert ; "default")]
    fn mode_parsing(raw: Option<&str>, expected: WriteMode) {
        assert_eq!(parse_mode(raw, WriteMode::Upsert).unwrap(), expected);
    }

    #[test]
    fn bad_values_are_bad_requests() {
        assert_eq!(
            parse_mode(Some("sideways"), WriteMode::Upsert).unwrap_err().status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            parse_limit(Some("-1"), 50).unwrap_err().status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(parse_limit(Some(" 7 "), 50).unwrap(), 7);
    }

    #[test]
    fn blank_source_is_no_filter() {
        assert_eq!(source_filter(Some(&"  ".to_string())), None);
        assert_eq!(source_filter(Some(&"drift".to_string())), Some("drift".to_string()));
    }
}
