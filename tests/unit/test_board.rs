//! Unit tests for the emulated board, identity service and dispatcher
//!
//! Everything here is driven in-process; no sockets are opened.

use loopcheck::config::DeviceConfig;
use loopcheck::device::sim::{reference_board, REFERENCE_BOARD_ID};
use loopcheck::device::{Admission, Dispatcher, DropReason, IdentityService};
use loopcheck::host::partition_groups;
use loopcheck::protocol::{
    decode_catalog_size, BoardId, CatalogEntry, IdentityRecord, InitCommand, Schedule, Status,
    TestRequest, DATA_LEN,
};
use std::net::SocketAddr;

const GROUP_BASE: u16 = 50007;

fn sender() -> SocketAddr {
    "192.168.8.1:40000".parse().unwrap()
}

fn dispatcher() -> Dispatcher {
    let board = reference_board(&DeviceConfig::default()).unwrap();
    Dispatcher::new(board.identity().board_id, GROUP_BASE, board.routines().to_vec())
}

// ============================================================================
// Identity service over the reference catalog
// ============================================================================

#[test]
fn test_catalog_walk_matches_board() {
    let board = reference_board(&DeviceConfig::default()).unwrap();
    let service = IdentityService::new(board.identity().clone(), board.catalog().to_vec());

    let identity = service.on_inbound(&InitCommand::identity().encode()).unwrap();
    let identity = IdentityRecord::decode(&identity).unwrap();
    assert_eq!(identity.board_id, REFERENCE_BOARD_ID);

    let size = service
        .on_inbound(&InitCommand::catalog_size(identity.board_id).encode())
        .unwrap();
    let size = decode_catalog_size(&size).unwrap();
    assert_eq!(size, 18);

    let catalog: Vec<CatalogEntry> = (0..size)
        .map(|i| {
            let bytes = service
                .on_inbound(&InitCommand::catalog_entry(identity.board_id, i).encode())
                .unwrap();
            CatalogEntry::decode(&bytes).unwrap()
        })
        .collect();
    assert_eq!(catalog, board.catalog());

    let groups = partition_groups(&catalog).unwrap();
    assert_eq!(groups.len(), board.group_count());
    assert_eq!(groups[4].schedule, Schedule::Sequential);
    assert_eq!(groups[4].entries(&catalog)[2].display_name(), "dac1 to adc3");
}

// ============================================================================
// Admission
// ============================================================================

#[test]
fn test_admission_by_port() {
    let d = dispatcher();
    let packet = TestRequest::new(REFERENCE_BOARD_ID, 0, [7; DATA_LEN]).encode();

    assert_eq!(d.on_inbound(GROUP_BASE + 2, &packet, sender()), Admission::Accepted);
    assert!(d.slot(2).unwrap().is_busy());
    assert!(!d.slot(1).unwrap().is_busy());

    // Nothing serves the slot, so a second request finds it busy.
    assert_eq!(
        d.on_inbound(GROUP_BASE + 2, &packet, sender()),
        Admission::Dropped(DropReason::Busy)
    );
    assert_eq!(d.on_inbound(GROUP_BASE + 3, &packet, sender()), Admission::Accepted);
}

#[test]
fn test_foreign_board_dropped_before_size_check() {
    let d = dispatcher();
    let mut packet = TestRequest::new(BoardId([9, 9, 9]), 0, [0; DATA_LEN]).encode();
    packet.truncate(40);
    assert_eq!(
        d.on_inbound(GROUP_BASE, &packet, sender()),
        Admission::Dropped(DropReason::BoardIdMismatch)
    );
}

#[test]
fn test_out_of_range_port_dropped() {
    let d = dispatcher();
    let packet = TestRequest::new(REFERENCE_BOARD_ID, 0, [0; DATA_LEN]).encode();
    assert_eq!(
        d.on_inbound(GROUP_BASE + 6, &packet, sender()),
        Admission::Dropped(DropReason::UnknownGroup)
    );
    assert_eq!(
        d.on_inbound(GROUP_BASE - 1, &packet, sender()),
        Admission::Dropped(DropReason::UnknownGroup)
    );
}

#[test]
fn test_wrong_size_and_bad_status_dropped() {
    let d = dispatcher();
    let mut long = TestRequest::new(REFERENCE_BOARD_ID, 0, [0; DATA_LEN]).encode();
    long.push(0);
    assert_eq!(
        d.on_inbound(GROUP_BASE, &long, sender()),
        Admission::Dropped(DropReason::BadSize)
    );

    let mut bad_status = TestRequest::new(REFERENCE_BOARD_ID, 0, [0; DATA_LEN]).encode();
    bad_status[113] = 0xEE;
    assert_eq!(
        d.on_inbound(GROUP_BASE, &bad_status, sender()),
        Admission::Dropped(DropReason::Malformed)
    );
    assert!(!d.slot(0).unwrap().is_busy());
}

// ============================================================================
// Routines through the trait object
// ============================================================================

#[tokio::test]
async fn test_reference_routines_echo() {
    let board = reference_board(&DeviceConfig::default()).unwrap();
    let mut payload = [0u8; DATA_LEN];
    for (i, b) in payload.iter_mut().enumerate() {
        *b = (i * 7) as u8;
    }

    for (group, routine) in board.routines().iter().enumerate() {
        let mut data = payload;
        let status = routine.run(0, &mut data).await;
        assert_eq!(status, Status::Ok, "group {group} ({})", routine.name());
        if group == 4 {
            assert!((i16::from(data[0]) - i16::from(payload[0])).abs() <= 3);
        } else {
            assert_eq!(data, payload, "group {group}");
        }
    }
}

#[tokio::test]
async fn test_unknown_selector_leaves_buffer() {
    let board = reference_board(&DeviceConfig::default()).unwrap();
    let routine = &board.routines()[0];
    let mut data = [0x33u8; DATA_LEN];
    assert_eq!(routine.run(200, &mut data).await, Status::Ok);
    assert_eq!(data, [0x33u8; DATA_LEN]);
}
