//! HTTP/REST API adapter.
//!
//! Query surface, collection trigger, health and metrics endpoints.

mod controller;
mod request;
mod response;

pub use controller::{AppState, DEFAULT_HISTORY_LIMIT, create_router};
pub use request::*;
pub use response::*;
