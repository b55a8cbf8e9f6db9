//! Wire Protocol
//!
//! Fixed-layout datagrams exchanged between the host driver and the device
//! under test. Every message is packed (no padding) and little-endian.
//!
//! ```text
//! InitCommand     [board id: 3 x u32][kind: u8][index: u16]            15 bytes
//! IdentityRecord  [board id: 3 x u32][board name: 100 bytes, NUL pad]  112 bytes
//! catalog size    [count: u16]                                         2 bytes
//! CatalogEntry    [name: 100 bytes][criterion: u8][schedule: u8]       102 bytes
//! Test packet     [board id: 3 x u32][sub-test: u8][data: 100][status] 114 bytes
//! ```
//!
//! Requests and replies on the test path share one layout but are modelled as
//! distinct types ([`TestRequest`], [`TestReply`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of 32-bit words in a board's unique id.
pub const ID_WORDS: usize = 3;
/// Fixed size of board and catalog entry names on the wire.
pub const NAME_LEN: usize = 100;
/// Fixed size of the test payload.
pub const DATA_LEN: usize = 100;
/// Leading name byte marking the last entry of a group.
pub const BOUNDARY_MARKER: char = '#';
/// Port serving identity and catalog commands.
pub const DEFAULT_INIT_PORT: u16 = 50006;
/// Port of group 0; group `n` listens on `DEFAULT_GROUP_PORT_BASE + n`.
pub const DEFAULT_GROUP_PORT_BASE: u16 = 50007;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{message} is {actual} bytes, expected {expected}")]
    Length {
        message: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown command kind {0}")]
    UnknownCommand(u8),

    #[error("Unknown status byte {0}")]
    UnknownStatus(u8),

    #[error("Unknown evaluation criterion {0}")]
    UnknownCriterion(u8),

    #[error("Unknown scheduling mode {0}")]
    UnknownSchedule(u8),

    #[error("Name is {len} bytes, at most {max} fit on the wire")]
    NameTooLong { len: usize, max: usize },
}

fn check_len(message: &'static str, bytes: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if bytes.len() != expected {
        return Err(ProtocolError::Length {
            message,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ProtocolError> {
    if name.len() > NAME_LEN {
        return Err(ProtocolError::NameTooLong {
            len: name.len(),
            max: NAME_LEN,
        });
    }
    Ok(())
}

fn write_name(buf: &mut Vec<u8>, name: &str) {
    let bytes = name.as_bytes();
    let used = bytes.len().min(NAME_LEN);
    buf.extend_from_slice(&bytes[..used]);
    buf.resize(buf.len() + NAME_LEN - used, 0);
}

fn read_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

// ============================================================================
// Board identity
// ============================================================================

/// Three-word unique id burned into the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BoardId(pub [u32; ID_WORDS]);

impl BoardId {
    pub const ENCODED_LEN: usize = ID_WORDS * 4;

    /// Placeholder carried by identity requests before the id is known.
    pub const UNKNOWN: BoardId = BoardId([0; ID_WORDS]);

    fn write(&self, buf: &mut Vec<u8>) {
        for word in self.0 {
            buf.extend_from_slice(&word.to_le_bytes());
        }
    }

    fn read(bytes: &[u8]) -> Self {
        let mut words = [0u32; ID_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        BoardId(words)
    }

    /// Reads the id prefix of an id-carrying message without decoding the rest.
    pub fn peek(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return None;
        }
        Some(Self::read(&bytes[..Self::ENCODED_LEN]))
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} :: {} :: {}", self.0[0], self.0[1], self.0[2])
    }
}

/// Board id plus human-readable board name, answered on discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub board_id: BoardId,
    board_name: String,
}

impl IdentityRecord {
    pub const ENCODED_LEN: usize = BoardId::ENCODED_LEN + NAME_LEN;

    pub fn new(board_id: BoardId, board_name: impl Into<String>) -> Result<Self, ProtocolError> {
        let board_name = board_name.into();
        validate_name(&board_name)?;
        Ok(Self {
            board_id,
            board_name,
        })
    }

    pub fn board_name(&self) -> &str {
        &self.board_name
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        self.board_id.write(&mut buf);
        write_name(&mut buf, &self.board_name);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        check_len("identity record", bytes, Self::ENCODED_LEN)?;
        Ok(Self {
            board_id: BoardId::read(&bytes[..BoardId::ENCODED_LEN]),
            board_name: read_name(&bytes[BoardId::ENCODED_LEN..]),
        })
    }
}

// ============================================================================
// Init / catalog commands
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandKind {
    Identity = 0,
    CatalogSize = 1,
    CatalogEntry = 2,
}

impl TryFrom<u8> for CommandKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Identity),
            1 => Ok(Self::CatalogSize),
            2 => Ok(Self::CatalogEntry),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

/// Command sent to the init port. Every kind except `Identity` must carry
/// the board's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitCommand {
    pub board_id: BoardId,
    pub kind: CommandKind,
    pub index: u16,
}

impl InitCommand {
    pub const ENCODED_LEN: usize = BoardId::ENCODED_LEN + 1 + 2;

    pub fn identity() -> Self {
        Self {
            board_id: BoardId::UNKNOWN,
            kind: CommandKind::Identity,
            index: 0,
        }
    }

    pub fn catalog_size(board_id: BoardId) -> Self {
        Self {
            board_id,
            kind: CommandKind::CatalogSize,
            index: 0,
        }
    }

    pub fn catalog_entry(board_id: BoardId, index: u16) -> Self {
        Self {
            board_id,
            kind: CommandKind::CatalogEntry,
            index,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        self.board_id.write(&mut buf);
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.index.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        check_len("init command", bytes, Self::ENCODED_LEN)?;
        let id_end = BoardId::ENCODED_LEN;
        Ok(Self {
            board_id: BoardId::read(&bytes[..id_end]),
            kind: CommandKind::try_from(bytes[id_end])?,
            index: u16::from_le_bytes([bytes[id_end + 1], bytes[id_end + 2]]),
        })
    }
}

pub const CATALOG_SIZE_LEN: usize = 2;

pub fn encode_catalog_size(count: u16) -> Vec<u8> {
    count.to_le_bytes().to_vec()
}

pub fn decode_catalog_size(bytes: &[u8]) -> Result<u16, ProtocolError> {
    check_len("catalog size", bytes, CATALOG_SIZE_LEN)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

// ============================================================================
// Catalog entries
// ============================================================================

/// How the host judges an echoed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum Criterion {
    /// Every payload byte must come back unchanged.
    ExactMatch = 0,
    /// The first payload byte must come back within the tolerance band.
    Tolerance = 1,
}

impl TryFrom<u8> for Criterion {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::ExactMatch),
            1 => Ok(Self::Tolerance),
            other => Err(ProtocolError::UnknownCriterion(other)),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::ExactMatch => write!(f, "exact-match"),
            Criterion::Tolerance => write!(f, "tolerance"),
        }
    }
}

/// Whether a group may share the device with other groups while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum Schedule {
    /// Runs alone; the next group starts only after it finished.
    Sequential = 0,
    /// Runs together with every other concurrent group.
    Concurrent = 1,
}

impl TryFrom<u8> for Schedule {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Sequential),
            1 => Ok(Self::Concurrent),
            other => Err(ProtocolError::UnknownSchedule(other)),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Sequential => write!(f, "sequential"),
            Schedule::Concurrent => write!(f, "concurrent"),
        }
    }
}

/// One sub-test of the board catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    name: String,
    pub criterion: Criterion,
    pub schedule: Schedule,
}

impl CatalogEntry {
    pub const ENCODED_LEN: usize = NAME_LEN + 2;

    pub fn new(
        name: impl Into<String>,
        criterion: Criterion,
        schedule: Schedule,
    ) -> Result<Self, ProtocolError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            criterion,
            schedule,
        })
    }

    /// Raw name as carried on the wire, boundary marker included.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when this entry closes its group.
    pub fn is_group_end(&self) -> bool {
        self.name.starts_with(BOUNDARY_MARKER)
    }

    /// Name with the boundary marker and surrounding blanks removed.
    pub fn display_name(&self) -> &str {
        self.name
            .strip_prefix(BOUNDARY_MARKER)
            .unwrap_or(&self.name)
            .trim()
    }

    /// Returns a copy of this entry that closes its group.
    pub fn marked_as_group_end(&self) -> Result<Self, ProtocolError> {
        if self.is_group_end() {
            return Ok(self.clone());
        }
        let bare = self.name.trim_start();
        Self::new(
            format!("{BOUNDARY_MARKER}{bare}"),
            self.criterion,
            self.schedule,
        )
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        write_name(&mut buf, &self.name);
        buf.push(self.criterion as u8);
        buf.push(self.schedule as u8);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        check_len("catalog entry", bytes, Self::ENCODED_LEN)?;
        Ok(Self {
            name: read_name(&bytes[..NAME_LEN]),
            criterion: Criterion::try_from(bytes[NAME_LEN])?,
            schedule: Schedule::try_from(bytes[NAME_LEN + 1])?,
        })
    }
}

// ============================================================================
// Test packets
// ============================================================================

/// Status byte of a test packet. The host seeds requests with `Mismatch`
/// so an untouched echo is never mistaken for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    RoutineError = 1,
    InterruptError = 2,
    OverTime = 3,
    Mismatch = 4,
}

impl TryFrom<u8> for Status {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ok),
            1 => Ok(Self::RoutineError),
            2 => Ok(Self::InterruptError),
            3 => Ok(Self::OverTime),
            4 => Ok(Self::Mismatch),
            other => Err(ProtocolError::UnknownStatus(other)),
        }
    }
}

pub const TEST_PACKET_LEN: usize = BoardId::ENCODED_LEN + 1 + DATA_LEN + 1;

fn encode_packet(board_id: &BoardId, sub_test: u8, data: &[u8; DATA_LEN], status: Status) -> Vec<u8> {
    let mut buf = Vec::with_capacity(TEST_PACKET_LEN);
    board_id.write(&mut buf);
    buf.push(sub_test);
    buf.extend_from_slice(data);
    buf.push(status as u8);
    buf
}

fn decode_packet(
    message: &'static str,
    bytes: &[u8],
) -> Result<(BoardId, u8, [u8; DATA_LEN], Status), ProtocolError> {
    check_len(message, bytes, TEST_PACKET_LEN)?;
    let id_end = BoardId::ENCODED_LEN;
    let mut data = [0u8; DATA_LEN];
    data.copy_from_slice(&bytes[id_end + 1..id_end + 1 + DATA_LEN]);
    Ok((
        BoardId::read(&bytes[..id_end]),
        bytes[id_end],
        data,
        Status::try_from(bytes[TEST_PACKET_LEN - 1])?,
    ))
}

/// Host → device: run `sub_test` on `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRequest {
    pub board_id: BoardId,
    pub sub_test: u8,
    pub data: [u8; DATA_LEN],
    pub status: Status,
}

impl TestRequest {
    pub fn new(board_id: BoardId, sub_test: u8, data: [u8; DATA_LEN]) -> Self {
        Self {
            board_id,
            sub_test,
            data,
            status: Status::Mismatch,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_packet(&self.board_id, self.sub_test, &self.data, self.status)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (board_id, sub_test, data, status) = decode_packet("test request", bytes)?;
        Ok(Self {
            board_id,
            sub_test,
            data,
            status,
        })
    }
}

/// Device → host: the payload after it went through the peripherals, plus
/// the outcome the device observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReply {
    pub board_id: BoardId,
    pub sub_test: u8,
    pub data: [u8; DATA_LEN],
    pub status: Status,
}

impl TestReply {
    pub fn encode(&self) -> Vec<u8> {
        encode_packet(&self.board_id, self.sub_test, &self.data, self.status)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (board_id, sub_test, data, status) = decode_packet("test reply", bytes)?;
        Ok(Self {
            board_id,
            sub_test,
            data,
            status,
        })
    }
}
