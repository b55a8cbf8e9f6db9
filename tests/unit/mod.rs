//! Unit tests for loopcheck modules
//!
//! These tests cover individual components without network I/O.

mod test_board;
mod test_partition;
mod test_protocol;
