//! Bound test routines
//!
//! The dispatcher only knows [`TestRoutine`]: run sub-test K on a buffer and
//! return a definite [`Status`]. Interrupt-style peripheral pairs plug in
//! through [`PeripheralPair`] and [`TransferRoutine`], which owns the signal
//! the peripheral callbacks release and the abort-and-drain cleanup.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::signal::CompletionSignal;
use crate::config::DeviceConfig;
use crate::protocol::{Status, DATA_LEN};

#[async_trait]
pub trait TestRoutine: Send + Sync {
    fn name(&self) -> &str;

    /// Run `sub_test` over `data` in place. The routine bounds its own waits;
    /// it must always return.
    async fn run(&self, sub_test: u8, data: &mut [u8; DATA_LEN]) -> Status;
}

/// A peripheral call that was refused before any transfer started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PeripheralError {
    #[error("peripheral is busy")]
    Busy,
    #[error("peripheral rejected the request")]
    Rejected,
}

/// Callback side of a transfer. Peripherals call these from their own
/// completion context; none of them block.
#[derive(Debug, Default)]
pub struct PeripheralEvents {
    signal: CompletionSignal,
    fault: AtomicBool,
}

impl PeripheralEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive side finished.
    pub fn complete(&self) {
        self.signal.release();
    }

    /// Asynchronous error raised after the transfer was started.
    pub fn fault(&self) {
        self.fault.store(true, Ordering::SeqCst);
        self.signal.release();
    }

    /// An abort request settled.
    pub fn abort_complete(&self) {
        self.signal.release();
    }

    fn reset(&self) {
        self.fault.store(false, Ordering::SeqCst);
        self.signal.clear();
    }

    fn take_fault(&self) -> bool {
        self.fault.swap(false, Ordering::SeqCst)
    }
}

/// Two peripherals wired back to back: one transmits, the other receives.
pub trait PeripheralPair: Send + Sync {
    fn name(&self) -> &str;

    /// Number of sub-test selectors this pair understands.
    fn sub_tests(&self) -> u8;

    fn arm_receiver(
        &self,
        sub_test: u8,
        len: usize,
        events: &Arc<PeripheralEvents>,
    ) -> Result<(), PeripheralError>;

    fn start_transmitter(
        &self,
        sub_test: u8,
        data: &[u8],
        events: &Arc<PeripheralEvents>,
    ) -> Result<(), PeripheralError>;

    /// Cancel the armed receive. Settles through `abort_complete`.
    fn abort_receiver(&self, sub_test: u8, events: &Arc<PeripheralEvents>);

    /// Cancel the transmit. Settles through `abort_complete`.
    fn abort_transmitter(&self, sub_test: u8, events: &Arc<PeripheralEvents>);

    /// Copy what the receiver captured into `data`.
    fn collect(&self, sub_test: u8, data: &mut [u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutineTiming {
    /// Wait for the transfer to complete
    pub completion: Duration,
    /// Wait for each abort to settle
    pub abort: Duration,
}

impl RoutineTiming {
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            completion: config.routine_timeout(),
            abort: config.abort_timeout(),
        }
    }
}

impl Default for RoutineTiming {
    fn default() -> Self {
        Self::from_config(&DeviceConfig::default())
    }
}

/// Interrupt-mode transfer over a [`PeripheralPair`].
pub struct TransferRoutine<P> {
    pair: P,
    events: Arc<PeripheralEvents>,
    timing: RoutineTiming,
}

impl<P: PeripheralPair> TransferRoutine<P> {
    pub fn new(pair: P, timing: RoutineTiming) -> Self {
        Self {
            pair,
            events: Arc::new(PeripheralEvents::new()),
            timing,
        }
    }

    pub fn pair(&self) -> &P {
        &self.pair
    }

    async fn abort_receiver(&self, sub_test: u8) {
        self.pair.abort_receiver(sub_test, &self.events);
        if !self.events.signal.wait_timeout(self.timing.abort).await {
            debug!(routine = self.pair.name(), sub_test, "Receiver abort did not settle");
        }
    }

    async fn abort_transmitter(&self, sub_test: u8) {
        self.pair.abort_transmitter(sub_test, &self.events);
        if !self.events.signal.wait_timeout(self.timing.abort).await {
            debug!(routine = self.pair.name(), sub_test, "Transmitter abort did not settle");
        }
    }
}

#[async_trait]
impl<P: PeripheralPair> TestRoutine for TransferRoutine<P> {
    fn name(&self) -> &str {
        self.pair.name()
    }

    async fn run(&self, sub_test: u8, data: &mut [u8; DATA_LEN]) -> Status {
        if sub_test >= self.pair.sub_tests() {
            return Status::Ok;
        }
        self.events.reset();

        if let Err(e) = self.pair.arm_receiver(sub_test, DATA_LEN, &self.events) {
            debug!(routine = self.pair.name(), sub_test, error = %e, "Receiver refused");
            return Status::RoutineError;
        }
        if let Err(e) = self.pair.start_transmitter(sub_test, &data[..], &self.events) {
            debug!(routine = self.pair.name(), sub_test, error = %e, "Transmitter refused");
            self.abort_receiver(sub_test).await;
            return Status::RoutineError;
        }

        if !self.events.signal.wait_timeout(self.timing.completion).await {
            self.abort_receiver(sub_test).await;
            self.abort_transmitter(sub_test).await;
            return Status::OverTime;
        }
        if self.events.take_fault() {
            self.abort_receiver(sub_test).await;
            self.abort_transmitter(sub_test).await;
            return Status::InterruptError;
        }

        self.pair.collect(sub_test, data);
        Status::Ok
    }
}
