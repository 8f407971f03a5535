//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the process-level
//! concerns: configuration, HTTP, logging and metrics.

/// Configuration loading and validation.
pub mod config;

/// HTTP query surface, collection trigger and health endpoints.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Document store adapters.
pub mod persistence;

/// Market data source adapters.
pub mod sources;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
