//! Market Data Source Adapters
//!
//! - [`StaticMarketDataSource`]: fixed payloads held in memory
//! - [`HttpJsonSource`]: listing and detail endpoints answering JSON

mod http_source;
mod static_source;

pub use http_source::{HttpJsonSource, HttpSourceConfig, KEY_PLACEHOLDER};
pub use static_source::StaticMarketDataSource;
