//! Observability
//!
//! Tracing setup and the structured events emitted by host and device.

pub mod telemetry;
