use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

pub use crate::protocol::ProtocolError;

/// The central error type for loopcheck.
///
/// Transport failures are fatal to a run; classification failures (wrong
/// data, wrong value) are recorded as results and never surface here.
#[derive(Error, Debug)]
pub enum LoopcheckError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open socket on {addr}: {source}")]
    Socket {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to send datagram to {peer}: {source}")]
    Send {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to receive datagram on {local}: {source}")]
    Receive {
        local: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("No answer from {peer} within {millis} ms")]
    NoAnswer { peer: SocketAddr, millis: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Catalog is empty")]
    Empty,

    #[error("{trailing} catalog entries follow the last group boundary")]
    UnterminatedGroup { trailing: usize },

    #[error("Catalog has {groups} groups, more than the port range allows")]
    TooManyGroups { groups: usize },

    #[error("Group of {len} entries exceeds the {max} sub-test selectors")]
    GroupTooLarge { len: usize, max: usize },

    #[error("Catalog has {entries} entries, more than the size field can count")]
    TooManyEntries { entries: usize },

    #[error("Board routine count {routines} does not match group count {groups}")]
    RoutineCountMismatch { routines: usize, groups: usize },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Group {group} worker panicked: {message}")]
    Panicked { group: usize, message: String },

    #[error("Group {group} worker was cancelled")]
    Cancelled { group: usize },

    #[error("Identity service task failed: {message}")]
    IdentityTask { message: String },
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LoopcheckError>;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_SOCKET: u8 = 2;
pub const EXIT_SEND: u8 = 3;
pub const EXIT_RECEIVE: u8 = 4;
pub const EXIT_CATALOG: u8 = 5;
pub const EXIT_WORKER: u8 = 6;
pub const EXIT_REPORT: u8 = 7;
pub const EXIT_CONFIG: u8 = 8;

fn transport_exit_code(e: &TransportError) -> u8 {
    match e {
        TransportError::Socket { .. } => EXIT_SOCKET,
        TransportError::Send { .. } => EXIT_SEND,
        TransportError::Receive { .. } | TransportError::NoAnswer { .. } => EXIT_RECEIVE,
    }
}

/// Determine the process exit code for an error, one code per failure class.
pub fn get_exit_code(e: &anyhow::Error) -> u8 {
    if let Some(err) = e.downcast_ref::<LoopcheckError>() {
        return match err {
            LoopcheckError::Transport(t) => transport_exit_code(t),
            LoopcheckError::Protocol(_) | LoopcheckError::Catalog(_) => EXIT_CATALOG,
            LoopcheckError::Worker(_) => EXIT_WORKER,
            LoopcheckError::Report(_) => EXIT_REPORT,
            LoopcheckError::Config(_) => EXIT_CONFIG,
            LoopcheckError::Other(inner) => get_exit_code(inner),
        };
    }

    // Direct enum fallbacks
    if let Some(t) = e.downcast_ref::<TransportError>() {
        return transport_exit_code(t);
    }
    if e.downcast_ref::<ProtocolError>().is_some() || e.downcast_ref::<CatalogError>().is_some() {
        return EXIT_CATALOG;
    }
    if e.downcast_ref::<WorkerError>().is_some() {
        return EXIT_WORKER;
    }
    if e.downcast_ref::<ReportError>().is_some() {
        return EXIT_REPORT;
    }
    if e.chain().any(|cause| cause.to_string().contains("config")) {
        return EXIT_CONFIG;
    }

    EXIT_ERROR
}
