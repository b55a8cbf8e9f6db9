//! Software peripherals and the emulated reference board
//!
//! Every peripheral counts its transfers and consults the [`FaultPlan`] so
//! failures are deterministic: the n-th transfer stalls, faults, corrupts or
//! refuses to start.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::board::Board;
use super::routine::{
    PeripheralError, PeripheralEvents, PeripheralPair, RoutineTiming, TestRoutine, TransferRoutine,
};
use crate::config::{DeviceConfig, FaultPlan};
use crate::errors::LoopcheckError;
use crate::protocol::{BoardId, Criterion, Schedule, Status, DATA_LEN};

/// Id reported by the emulated board.
pub const REFERENCE_BOARD_ID: BoardId = BoardId([0x0034_0027, 0x3436_5119, 0x3438_3730]);

/// What the n-th transfer should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Injected {
    None,
    StartError,
    Stall,
    IrqFault,
    Corrupt,
}

fn injected(plan: &FaultPlan, count: u32) -> Injected {
    if FaultPlan::hits(plan.start_error_every, count) {
        Injected::StartError
    } else if FaultPlan::hits(plan.stall_every, count) {
        Injected::Stall
    } else if FaultPlan::hits(plan.irq_fault_every, count) {
        Injected::IrqFault
    } else if FaultPlan::hits(plan.corrupt_every, count) {
        Injected::Corrupt
    } else {
        Injected::None
    }
}

// ============================================================================
// Serial-style loop (UART / SPI / I2C)
// ============================================================================

#[derive(Default)]
struct SerialState {
    armed: Option<usize>,
    in_flight: Option<JoinHandle<()>>,
}

/// Two serial peripherals wired back to back, interrupt mode.
pub struct SimSerialPair {
    name: String,
    sub_tests: u8,
    latency: Duration,
    faults: FaultPlan,
    transfers: AtomicU32,
    state: Mutex<SerialState>,
    received: Arc<Mutex<Vec<u8>>>,
}

impl SimSerialPair {
    pub fn new(name: impl Into<String>, sub_tests: u8, latency: Duration, faults: FaultPlan) -> Self {
        Self {
            name: name.into(),
            sub_tests,
            latency,
            faults,
            transfers: AtomicU32::new(0),
            state: Mutex::new(SerialState::default()),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn transfers(&self) -> u32 {
        self.transfers.load(Ordering::Relaxed)
    }

    fn cancel_in_flight(&self) {
        if let Some(handle) = self.state.lock().in_flight.take() {
            handle.abort();
        }
    }
}

impl PeripheralPair for SimSerialPair {
    fn name(&self) -> &str {
        &self.name
    }

    fn sub_tests(&self) -> u8 {
        self.sub_tests
    }

    fn arm_receiver(
        &self,
        _sub_test: u8,
        len: usize,
        _events: &Arc<PeripheralEvents>,
    ) -> Result<(), PeripheralError> {
        let mut state = self.state.lock();
        if state.armed.is_some() {
            return Err(PeripheralError::Busy);
        }
        state.armed = Some(len);
        self.received.lock().clear();
        Ok(())
    }

    fn start_transmitter(
        &self,
        _sub_test: u8,
        data: &[u8],
        events: &Arc<PeripheralEvents>,
    ) -> Result<(), PeripheralError> {
        let count = self.transfers.fetch_add(1, Ordering::Relaxed) + 1;
        let fault = injected(&self.faults, count);
        if fault == Injected::StartError {
            return Err(PeripheralError::Rejected);
        }

        let mut state = self.state.lock();
        let Some(len) = state.armed else {
            return Err(PeripheralError::Rejected);
        };
        let mut wire = data[..len.min(data.len())].to_vec();
        if fault == Injected::Corrupt && !wire.is_empty() {
            let at = count as usize % wire.len();
            wire[at] ^= 0x5A;
        }

        let events = events.clone();
        let received = self.received.clone();
        let latency = self.latency;
        state.in_flight = Some(tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            match fault {
                Injected::Stall => {}
                Injected::IrqFault => events.fault(),
                _ => {
                    *received.lock() = wire;
                    events.complete();
                }
            }
        }));
        Ok(())
    }

    fn abort_receiver(&self, _sub_test: u8, events: &Arc<PeripheralEvents>) {
        self.cancel_in_flight();
        self.state.lock().armed = None;
        events.abort_complete();
    }

    fn abort_transmitter(&self, _sub_test: u8, events: &Arc<PeripheralEvents>) {
        self.cancel_in_flight();
        events.abort_complete();
    }

    fn collect(&self, _sub_test: u8, data: &mut [u8]) {
        let mut state = self.state.lock();
        state.armed = None;
        state.in_flight = None;
        let received = self.received.lock();
        let n = received.len().min(data.len());
        data[..n].copy_from_slice(&received[..n]);
    }
}

// ============================================================================
// DAC -> ADC loop
// ============================================================================

/// DAC output sampled back by one of several ADCs, polling mode. Only the
/// first payload byte is converted; the sample carries bounded noise.
pub struct SimAnalogLoop {
    name: String,
    channels: u8,
    noise: u8,
    latency: Duration,
    timing: RoutineTiming,
    faults: FaultPlan,
    conversions: AtomicU32,
}

impl SimAnalogLoop {
    pub fn new(
        name: impl Into<String>,
        channels: u8,
        noise: u8,
        latency: Duration,
        timing: RoutineTiming,
        faults: FaultPlan,
    ) -> Self {
        Self {
            name: name.into(),
            channels,
            noise,
            latency,
            timing,
            faults,
            conversions: AtomicU32::new(0),
        }
    }

    fn sample(&self, level: u8) -> u8 {
        let noise = i16::from(self.noise);
        let offset = rand::rng().random_range(-noise..=noise);
        (i16::from(level) + offset).clamp(0, i16::from(u8::MAX)) as u8
    }
}

#[async_trait]
impl TestRoutine for SimAnalogLoop {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, sub_test: u8, data: &mut [u8; DATA_LEN]) -> Status {
        if sub_test >= self.channels {
            return Status::Ok;
        }
        let count = self.conversions.fetch_add(1, Ordering::Relaxed) + 1;
        match injected(&self.faults, count) {
            Injected::StartError => return Status::RoutineError,
            Injected::Stall => {
                tokio::time::sleep(self.timing.completion).await;
                return Status::OverTime;
            }
            Injected::IrqFault => return Status::InterruptError,
            Injected::Corrupt => data[0] = data[0].wrapping_add(128),
            Injected::None => {}
        }
        let sampled = self.sample(data[0]);
        tokio::time::sleep(self.latency).await;
        data[0] = sampled;
        Status::Ok
    }
}

// ============================================================================
// Flash
// ============================================================================

const FLASH_WORD: usize = 4;
const ERASED: u8 = 0xFF;

/// One flash sector: erase, program the payload word by word, read back.
pub struct SimFlash {
    name: String,
    latency: Duration,
    timing: RoutineTiming,
    faults: FaultPlan,
    cycles: AtomicU32,
    sector: Mutex<Vec<u8>>,
}

impl SimFlash {
    pub fn new(name: impl Into<String>, latency: Duration, timing: RoutineTiming, faults: FaultPlan) -> Self {
        Self {
            name: name.into(),
            latency,
            timing,
            faults,
            cycles: AtomicU32::new(0),
            sector: Mutex::new(vec![ERASED; DATA_LEN]),
        }
    }

    fn erase(&self) {
        self.sector.lock().fill(ERASED);
    }

    /// NOR semantics: programming can only clear bits.
    fn program_word(&self, offset: usize, word: u32) {
        let mut sector = self.sector.lock();
        for (cell, byte) in sector[offset..offset + FLASH_WORD]
            .iter_mut()
            .zip(word.to_le_bytes())
        {
            *cell &= byte;
        }
    }
}

#[async_trait]
impl TestRoutine for SimFlash {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, sub_test: u8, data: &mut [u8; DATA_LEN]) -> Status {
        if sub_test != 0 {
            return Status::Ok;
        }
        let count = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let fault = injected(&self.faults, count);
        match fault {
            Injected::StartError => return Status::RoutineError,
            Injected::Stall => {
                tokio::time::sleep(self.timing.completion).await;
                return Status::OverTime;
            }
            Injected::IrqFault => return Status::InterruptError,
            _ => {}
        }

        // Skipping the erase leaves the previous contents ANDed in.
        if fault != Injected::Corrupt {
            self.erase();
        }
        tokio::time::sleep(self.latency).await;
        for (i, chunk) in data.chunks_exact(FLASH_WORD).enumerate() {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.program_word(i * FLASH_WORD, word);
        }
        data.copy_from_slice(&self.sector.lock());
        Status::Ok
    }
}

// ============================================================================
// Reference board
// ============================================================================

/// The nucleo-f746zg test bench: 18 sub-tests in 6 groups.
pub fn reference_board(config: &DeviceConfig) -> Result<Board, LoopcheckError> {
    let timing = RoutineTiming::from_config(config);
    let latency = config.link_latency();
    let faults = config.faults;
    let serial = |name: &str, sub_tests: u8| -> Arc<dyn TestRoutine> {
        Arc::new(TransferRoutine::new(
            SimSerialPair::new(name, sub_tests, latency, faults),
            timing,
        ))
    };
    let exact = |name| (name, Criterion::ExactMatch);

    Board::builder(REFERENCE_BOARD_ID, config.board_name.clone())
        .group(
            serial("uart1/2", 2),
            Schedule::Concurrent,
            [exact("uart1 IT rx uart2 IT tx"), exact("uart2 IT rx uart1 IT tx")],
        )
        .group(
            serial("uart4/5", 4),
            Schedule::Concurrent,
            [
                exact("uart4 IT rx uart5 IT tx"),
                exact("uart5 IT rx uart4 IT tx"),
                exact("uart4 DMA rx uart5 DMA tx"),
                exact("uart5 DMA rx uart4 DMA tx"),
            ],
        )
        .group(
            serial("i2c1/2", 3),
            Schedule::Concurrent,
            [
                exact("i2c1 IT rx i2c2 IT tx"),
                exact("i2c2 IT rx i2c1 IT tx"),
                exact("i2c1 DMA rx i2c2 IT tx"),
            ],
        )
        .group(
            serial("spi1/2", 5),
            Schedule::Concurrent,
            [
                exact("spi1 IT rx spi2 IT tx"),
                exact("spi2 IT rx spi1 IT tx"),
                exact("spi1 DMA rx spi2 IT tx"),
                exact("spi2 DMA rx spi1 DMA tx"),
                exact("spi2 IT rx/tx spi1 IT rx/tx"),
            ],
        )
        .group(
            Arc::new(SimAnalogLoop::new("dac/adc", 3, 3, latency, timing, faults)),
            Schedule::Sequential,
            [
                ("dac1 to adc1", Criterion::Tolerance),
                ("dac1 to adc2", Criterion::Tolerance),
                ("dac1 to adc3", Criterion::Tolerance),
            ],
        )
        .group(
            Arc::new(SimFlash::new("flash", latency, timing, faults)),
            Schedule::Sequential,
            [exact("flash")],
        )
        .build()
}
