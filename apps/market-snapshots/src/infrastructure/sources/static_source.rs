//! Static market data source.
//!
//! Serves fixed payloads from memory. Backs the `static` source kind and the
//! test suites, which script failures and delays per entity.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{EntityDescriptor, MarketDataSource, RawPayload, SourceError};
use crate::domain::value::Value;

/// In-memory `MarketDataSource`.
#[derive(Debug)]
pub struct StaticMarketDataSource {
    tag: String,
    entities: RwLock<Vec<(String, RawPayload)>>,
    failing: HashSet<String>,
    slow: HashMap<String, Duration>,
    list_error: Option<String>,
    delay: Duration,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl StaticMarketDataSource {
    /// Create a source with no entities.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            entities: RwLock::new(vec![]),
            failing: HashSet::new(),
            slow: HashMap::new(),
            list_error: None,
            delay: Duration::ZERO,
            list_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Add an entity with its payload. Listing preserves insertion order.
    #[must_use]
    pub fn with_entity(self, key: impl Into<String>, payload: impl Into<Value>) -> Self {
        self.set_payload(key, payload);
        self
    }

    /// List the entity but fail every fetch for it.
    #[must_use]
    pub fn with_failing_entity(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.entities.read().iter().any(|(k, _)| *k == key) {
            self.entities.write().push((key.clone(), Value::Null));
        }
        self.failing.insert(key);
        self
    }

    /// Delay fetches for one entity.
    #[must_use]
    pub fn with_slow_entity(mut self, key: impl Into<String>, delay: Duration) -> Self {
        self.slow.insert(key.into(), delay);
        self
    }

    /// Delay every fetch.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the listing call.
    #[must_use]
    pub fn with_list_error(mut self, message: impl Into<String>) -> Self {
        self.list_error = Some(message.into());
        self
    }

    /// Replace an entity's payload, adding the entity if it is new.
    pub fn set_payload(&self, key: impl Into<String>, payload: impl Into<Value>) {
        let key = key.into();
        let payload = payload.into();
        let mut entities = self.entities.write();
        match entities.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = payload,
            None => entities.push((key, payload)),
        }
    }

    /// Number of listing calls served.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of detail fetches served, failed ones included.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataSource for StaticMarketDataSource {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn list_entities(&self) -> Result<Vec<EntityDescriptor>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.list_error {
            return Err(SourceError::Unavailable {
                message: message.clone(),
            });
        }
        Ok(self
            .entities
            .read()
            .iter()
            .map(|(key, _)| EntityDescriptor::new(key.as_str()))
            .collect())
    }

    async fn fetch_detail(&self, key: &str) -> Result<RawPayload, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.slow.get(key).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing.contains(key) {
            return Err(SourceError::Unavailable {
                message: format!("scripted failure for {key}"),
            });
        }

        self.entities
            .read()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, payload)| payload.clone())
            .ok_or_else(|| SourceError::NotFound {
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn lists_in_insertion_order() {
        let source = StaticMarketDataSource::new("fixture")
            .with_entity("B", json!({"v": 1}))
            .with_entity("A", json!({"v": 2}));

        let keys: Vec<String> = source
            .list_entities()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, ["B", "A"]);
        assert_eq!(source.list_calls(), 1);
    }

    #[tokio::test]
    async fn scripted_failures() {
        let source = StaticMarketDataSource::new("fixture")
            .with_entity("A", json!({"v": 1}))
            .with_failing_entity("B");

        assert!(source.fetch_detail("A").await.is_ok());
        assert!(matches!(
            source.fetch_detail("B").await,
            Err(SourceError::Unavailable { .. })
        ));
        assert!(matches!(
            source.fetch_detail("Z").await,
            Err(SourceError::NotFound { .. })
        ));
        assert_eq!(source.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn set_payload_replaces_in_place() {
        let source = StaticMarketDataSource::new("fixture").with_entity("A", json!({"v": 1}));
        source.set_payload("A", json!({"v": 2}));

        assert_eq!(source.list_entities().await.unwrap().len(), 1);
        assert_eq!(
            source.fetch_detail("A").await.unwrap().get("v"),
            Some(&Value::Int(2))
        );
    }
}
