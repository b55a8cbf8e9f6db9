//! Host Driver
//!
//! Discovers the device, partitions its catalog into groups and drives one
//! worker per group with fresh random payloads.

pub mod catalog;
pub mod classify;
pub mod driver;
pub mod worker;

pub use catalog::{partition_groups, GroupPlan};
pub use classify::{classify, Outcome, TestResult};
pub use driver::{HostDriver, Session};
pub use worker::{ExecutionWindow, GroupRun, WorkerSettings};
