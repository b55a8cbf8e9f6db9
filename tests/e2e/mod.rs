//! End-to-end tests
//!
//! A device server and a host driver talk over UDP on the loopback
//! interface. Each test picks its own random port range.

mod helpers;
mod test_cli;
mod test_device;
