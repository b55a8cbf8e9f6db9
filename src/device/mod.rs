//! Device Under Test
//!
//! The embedded half of a run: an identity/catalog service on the init port
//! and a dispatcher that serializes test requests per peripheral group.
//!
//! Bound routines are reached only through [`TestRoutine`]; the emulated
//! reference board in [`sim`] stands in for real peripherals.

pub mod board;
pub mod dispatcher;
pub mod identity;
pub mod routine;
pub mod server;
pub mod signal;
pub mod sim;

pub use board::{Board, BoardBuilder};
pub use dispatcher::{Admission, Dispatcher, DropReason};
pub use identity::IdentityService;
pub use routine::{PeripheralPair, RoutineTiming, TestRoutine, TransferRoutine};
pub use server::DeviceServer;
pub use signal::CompletionSignal;
