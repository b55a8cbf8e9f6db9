//! loopcheck - hardware-in-the-loop peripheral verification
//!
//! A host driver sends randomized payloads over UDP to a device under test,
//! which loops each payload through a named pair of peripherals and sends it
//! back. The host classifies every echo, measures its latency and writes a
//! per-test report.
//!
//! - **Protocol**: fixed-layout identity, catalog and test datagrams
//! - **Device**: per-group dispatcher with one request in flight per group
//! - **Host**: catalog partitioning and sequential/concurrent group scheduling
//! - **Report**: per-entry outcome counts and mean success latency
//!
//! # Quick Start
//!
//! ```ignore
//! use loopcheck::{config::Config, host::HostDriver, report::Report};
//!
//! let config = Config::load(None)?;
//! let driver = HostDriver::new(config.host.clone(), config.ports);
//! let session = driver.connect().await?;
//! let runs = driver.run_all(&session).await?;
//! Report::new(&session, &runs).write(&config.report.dir, config.report.format)?;
//! ```

pub mod cli;
pub mod config;
pub mod device;
pub mod errors;
pub mod host;
pub mod observability;
pub mod protocol;
pub mod report;
pub mod transport;
