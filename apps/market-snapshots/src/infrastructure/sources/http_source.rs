//! Generic JSON-over-HTTP market data source.
//!
//! Works with any venue exposing a listing endpoint and a per-entity detail
//! endpoint that both answer JSON:
//!
//! - `GET {base_url}{list_path}` yields an array (optionally found at
//!   `list_pointer`) of key strings or of objects carrying `key_field`
//! - `GET {base_url}{detail_path}` with `{key}` substituted yields the payload
//!   (optionally found at `detail_pointer`)
//!
//! Failures are not retried here; the next scheduled cycle is the retry.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::Value as Json;

use crate::application::ports::{EntityDescriptor, MarketDataSource, RawPayload, SourceError};
use crate::domain::value::Value;

/// Placeholder substituted with the entity key in `detail_path`.
pub const KEY_PLACEHOLDER: &str = "{key}";

/// HTTP source settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSourceConfig {
    /// Source tag.
    pub tag: String,
    /// Base URL without trailing slash.
    pub base_url: String,
    /// Listing path.
    pub list_path: String,
    /// JSON pointer to the listing array inside the response.
    pub list_pointer: Option<String>,
    /// Field holding the key when listing elements are objects.
    pub key_field: String,
    /// Field holding a display label when listing elements are objects.
    pub label_field: Option<String>,
    /// Detail path containing `{key}`.
    pub detail_path: String,
    /// JSON pointer to the payload inside the detail response.
    pub detail_pointer: Option<String>,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Client-side request timeout.
    pub timeout: Duration,
}

/// `MarketDataSource` backed by two JSON endpoints.
#[derive(Debug, Clone)]
pub struct HttpJsonSource {
    client: Client,
    config: HttpSourceConfig,
}

impl HttpJsonSource {
    /// Build the source and its HTTP client.
    pub fn new(config: HttpSourceConfig) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                SourceError::InvalidConfig {
                    message: format!("invalid header name '{name}': {e}"),
                }
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| SourceError::InvalidConfig {
                message: format!("invalid value for header '{name}': {e}"),
            })?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| SourceError::InvalidConfig {
                message: e.to_string(),
            })?;

        Ok(Self { client, config })
    }

    /// Source settings.
    #[must_use]
    pub const fn config(&self) -> &HttpSourceConfig {
        &self.config
    }

    fn detail_url(&self, key: &str) -> String {
        let path = self
            .config
            .detail_path
            .replace(KEY_PLACEHOLDER, &encode_path_segment(key));
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn list_url(&self) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.list_path
        )
    }

    async fn get_json(&self, url: &str, key: Option<&str>) -> Result<Json, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND
            && let Some(key) = key
        {
            return Err(SourceError::NotFound {
                key: key.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Unavailable {
                message: format!("GET {url} returned {status}: {}", truncate(&body, 200)),
            });
        }

        response
            .json::<Json>()
            .await
            .map_err(|e| SourceError::InvalidResponse {
                message: format!("GET {url}: {e}"),
            })
    }
}

#[async_trait]
impl MarketDataSource for HttpJsonSource {
    fn tag(&self) -> &str {
        &self.config.tag
    }

    async fn list_entities(&self) -> Result<Vec<EntityDescriptor>, SourceError> {
        let body = self.get_json(&self.list_url(), None).await?;
        let listing = select(&body, self.config.list_pointer.as_deref())?;
        let items = listing.as_array().ok_or_else(|| SourceError::InvalidResponse {
            message: "listing is not an array".to_string(),
        })?;

        let mut entities = Vec::with_capacity(items.len());
        for item in items {
            match self.descriptor(item) {
                Some(descriptor) => entities.push(descriptor),
                None => tracing::warn!(
                    source = %self.config.tag,
                    field = %self.config.key_field,
                    "Listing element without a key skipped"
                ),
            }
        }
        Ok(entities)
    }

    async fn fetch_detail(&self, key: &str) -> Result<RawPayload, SourceError> {
        let body = self.get_json(&self.detail_url(key), Some(key)).await?;
        let payload = select(&body, self.config.detail_pointer.as_deref())?;
        Ok(Value::from(payload.clone()))
    }
}

impl HttpJsonSource {
    fn descriptor(&self, item: &Json) -> Option<EntityDescriptor> {
        match item {
            Json::String(key) => Some(EntityDescriptor::new(key.as_str())),
            Json::Object(map) => {
                let key = scalar_text(map.get(&self.config.key_field)?)?;
                let label = self
                    .config
                    .label_field
                    .as_ref()
                    .and_then(|field| map.get(field))
                    .and_then(scalar_text);
                Some(EntityDescriptor { key, label })
            }
            _ => None,
        }
    }
}

fn select<'a>(body: &'a Json, pointer: Option<&str>) -> Result<&'a Json, SourceError> {
    match pointer {
        None | Some("") => Ok(body),
        Some(pointer) => body
            .pointer(pointer)
            .ok_or_else(|| SourceError::InvalidResponse {
                message: format!("response has nothing at '{pointer}'"),
            }),
    }
}

fn scalar_text(value: &Json) -> Option<String> {
    match value {
        Json::String(s) if !s.is_empty() => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
