//! Configuration Management
//!
//! Loads loopcheck configuration from TOML files.
//! Configuration includes:
//! - Port layout shared by host and device (init port, group port base)
//! - Host driver settings (device address, iterations, timeouts, tolerance)
//! - Emulated device settings (board name, routine timeouts, fault plan)
//! - Report output (directory, format)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::LoopcheckError;
use crate::protocol::{DEFAULT_GROUP_PORT_BASE, DEFAULT_INIT_PORT};

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// One human-readable line per catalog entry (default)
    #[default]
    Text,
    /// Machine-readable JSON document
    Json,
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportFormat::Text => write!(f, "text"),
            ReportFormat::Json => write!(f, "json"),
        }
    }
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ports: PortConfig,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

/// Port layout. Group `n` is served on `group_port_base + n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    #[serde(default = "default_init_port")]
    pub init_port: u16,
    #[serde(default = "default_group_port_base")]
    pub group_port_base: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            init_port: default_init_port(),
            group_port_base: default_group_port_base(),
        }
    }
}

impl PortConfig {
    /// Port assigned to a group, `None` when it would overflow.
    pub fn group_port(&self, group: usize) -> Option<u16> {
        u16::try_from(group)
            .ok()
            .and_then(|g| self.group_port_base.checked_add(g))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_device_addr")]
    pub device_addr: IpAddr,
    /// Repetitions of every sub-test, each with a fresh random payload
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Per-iteration reply deadline
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,
    /// Deadline for every discovery/catalog answer; absent means block
    #[serde(default)]
    pub discovery_timeout_ms: Option<u64>,
    /// Accepted deviation of the first payload byte for tolerance entries
    #[serde(default = "default_tolerance")]
    pub tolerance: u8,
    /// Seed for reproducible payloads; absent means OS entropy
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            device_addr: default_device_addr(),
            iterations: default_iterations(),
            recv_timeout_ms: default_recv_timeout_ms(),
            discovery_timeout_ms: None,
            tolerance: default_tolerance(),
            seed: None,
        }
    }
}

impl HostConfig {
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Option<Duration> {
        self.discovery_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    #[serde(default = "default_board_name")]
    pub board_name: String,
    /// Bounded wait for a peripheral completion signal
    #[serde(default = "default_routine_timeout_ms")]
    pub routine_timeout_ms: u64,
    /// Bounded wait for each abort to settle after a failed transfer
    #[serde(default = "default_abort_timeout_ms")]
    pub abort_timeout_ms: u64,
    /// Simulated transfer latency of the emulated peripherals
    #[serde(default = "default_link_latency_us")]
    pub link_latency_us: u64,
    #[serde(default)]
    pub faults: FaultPlan,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            board_name: default_board_name(),
            routine_timeout_ms: default_routine_timeout_ms(),
            abort_timeout_ms: default_abort_timeout_ms(),
            link_latency_us: default_link_latency_us(),
            faults: FaultPlan::default(),
        }
    }
}

impl DeviceConfig {
    pub fn routine_timeout(&self) -> Duration {
        Duration::from_millis(self.routine_timeout_ms)
    }

    pub fn abort_timeout(&self) -> Duration {
        Duration::from_millis(self.abort_timeout_ms)
    }

    pub fn link_latency(&self) -> Duration {
        Duration::from_micros(self.link_latency_us)
    }
}

/// Deterministic fault injection for the emulated board.
///
/// Each field, when set to `n`, triggers its fault on every `n`-th transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaultPlan {
    /// Flip one received byte
    #[serde(default)]
    pub corrupt_every: Option<u32>,
    /// Never signal completion
    #[serde(default)]
    pub stall_every: Option<u32>,
    /// Raise the error callback instead of completing
    #[serde(default)]
    pub irq_fault_every: Option<u32>,
    /// Fail to start the transfer
    #[serde(default)]
    pub start_error_every: Option<u32>,
    /// Drop every n-th reply datagram on the way back to the host
    #[serde(default)]
    pub drop_reply_every: Option<u32>,
}

impl FaultPlan {
    pub fn hits(every: Option<u32>, count: u32) -> bool {
        matches!(every, Some(n) if n > 0 && count % n == 0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_report_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub format: ReportFormat,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: default_report_dir(),
            format: ReportFormat::default(),
        }
    }
}

fn default_init_port() -> u16 {
    DEFAULT_INIT_PORT
}
fn default_group_port_base() -> u16 {
    DEFAULT_GROUP_PORT_BASE
}
fn default_device_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 168, 8, 2))
}
fn default_iterations() -> u32 {
    60
}
fn default_recv_timeout_ms() -> u64 {
    1000
}
fn default_tolerance() -> u8 {
    200
}
fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_board_name() -> String {
    "nucleo-f746zg".to_string()
}
fn default_routine_timeout_ms() -> u64 {
    100
}
fn default_abort_timeout_ms() -> u64 {
    100
}
fn default_link_latency_us() -> u64 {
    200
}
fn default_report_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config from {}", p))?;
                toml::from_str(&content).context("Failed to parse config")?
            }
            None => {
                let mut default_paths = vec![PathBuf::from("loopcheck.toml")];
                if let Some(home) = dirs::home_dir() {
                    default_paths.push(home.join(".config/loopcheck/config.toml"));
                }

                let mut loaded = None;
                for p in &default_paths {
                    if let Ok(content) = std::fs::read_to_string(p) {
                        loaded = Some(toml::from_str(&content).with_context(|| {
                            format!("Failed to parse config {}", p.display())
                        })?);
                        break;
                    }
                }
                loaded.unwrap_or_else(|| {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                })
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override file values from `LOOPCHECK_*` variables. Values that do not
    /// parse are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("LOOPCHECK_DEVICE_ADDR").and_then(|v| v.parse().ok()) {
            self.host.device_addr = addr;
        }
        if let Some(n) = lookup("LOOPCHECK_ITERATIONS").and_then(|v| v.parse().ok()) {
            self.host.iterations = n;
        }
        if let Some(ms) = lookup("LOOPCHECK_RECV_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.host.recv_timeout_ms = ms;
        }
        if let Some(dir) = lookup("LOOPCHECK_REPORT_DIR") {
            self.report.dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> std::result::Result<(), LoopcheckError> {
        if self.host.iterations == 0 {
            return Err(LoopcheckError::Config(
                "host.iterations must be at least 1".to_string(),
            ));
        }
        if self.host.recv_timeout_ms == 0 {
            return Err(LoopcheckError::Config(
                "host.recv_timeout_ms must be positive".to_string(),
            ));
        }
        if self.device.routine_timeout_ms == 0 || self.device.abort_timeout_ms == 0 {
            return Err(LoopcheckError::Config(
                "device timeouts must be positive".to_string(),
            ));
        }
        if self.ports.group_port_base <= self.ports.init_port
            && self.ports.init_port - self.ports.group_port_base < 256
        {
            return Err(LoopcheckError::Config(format!(
                "init port {} falls inside the group port range starting at {}",
                self.ports.init_port, self.ports.group_port_base
            )));
        }
        Ok(())
    }
}
