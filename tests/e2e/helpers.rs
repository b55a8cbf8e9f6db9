//! Shared fixtures: loopback device servers and scripted routines.

use async_trait::async_trait;
use loopcheck::config::{DeviceConfig, FaultPlan, HostConfig, PortConfig};
use loopcheck::device::{Board, DeviceServer, TestRoutine};
use loopcheck::host::HostDriver;
use loopcheck::protocol::{BoardId, Status, DATA_LEN};
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const TEST_BOARD_ID: BoardId = BoardId([0xA1, 0xB2, 0xC3]);

pub struct RunningDevice {
    pub ports: PortConfig,
    pub handle: JoinHandle<()>,
}

impl Drop for RunningDevice {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn device_config(faults: FaultPlan) -> DeviceConfig {
    DeviceConfig {
        bind_addr: LOOPBACK,
        routine_timeout_ms: 50,
        abort_timeout_ms: 50,
        link_latency_us: 100,
        faults,
        ..Default::default()
    }
}

/// Bind `make_board()` on a free random port range and serve it.
pub async fn start_device(
    make_board: impl Fn() -> Board,
    config: &DeviceConfig,
) -> RunningDevice {
    for _ in 0..20 {
        let base = rand::rng().random_range(20000u16..60000);
        let ports = PortConfig {
            init_port: base,
            group_port_base: base + 1,
        };
        match DeviceServer::bind(make_board(), ports, config).await {
            Ok(server) => {
                let handle = tokio::spawn(async move {
                    let _ = server.run().await;
                });
                return RunningDevice { ports, handle };
            }
            Err(_) => continue,
        }
    }
    panic!("no free loopback port range");
}

pub fn host_config(iterations: u32, recv_timeout_ms: u64) -> HostConfig {
    HostConfig {
        device_addr: LOOPBACK,
        iterations,
        recv_timeout_ms,
        discovery_timeout_ms: Some(2000),
        seed: Some(7),
        ..Default::default()
    }
}

pub fn driver(device: &RunningDevice, iterations: u32, recv_timeout_ms: u64) -> HostDriver {
    HostDriver::new(host_config(iterations, recv_timeout_ms), device.ports)
}

/// Echoes the payload, corrupting the first byte on the listed calls
/// (1-based, counted across every sub-test).
pub struct ScriptedEcho {
    name: String,
    sub_tests: u8,
    delay: Duration,
    corrupt_calls: Vec<u32>,
    calls: AtomicU32,
}

impl ScriptedEcho {
    pub fn new(name: &str, sub_tests: u8, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            sub_tests,
            delay,
            corrupt_calls: Vec::new(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn corrupting(mut self, calls: &[u32]) -> Self {
        self.corrupt_calls = calls.to_vec();
        self
    }
}

#[async_trait]
impl TestRoutine for ScriptedEcho {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, sub_test: u8, data: &mut [u8; DATA_LEN]) -> Status {
        if sub_test >= self.sub_tests {
            return Status::Ok;
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.corrupt_calls.contains(&call) {
            data[0] ^= 0xFF;
        }
        Status::Ok
    }
}

/// Always reports the given status and leaves the payload alone.
pub struct FixedStatus(pub Status);

#[async_trait]
impl TestRoutine for FixedStatus {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn run(&self, _sub_test: u8, _data: &mut [u8; DATA_LEN]) -> Status {
        self.0
    }
}
