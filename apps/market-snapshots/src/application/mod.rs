//! Application layer: ports to external systems and the services that
//! orchestrate collection, storage and queries.

pub mod ports;
pub mod services;
