//! Unit tests for the wire protocol
//!
//! Tests cover:
//! - Message sizes and field offsets
//! - Decoding of foreign bytes
//! - Boundary marker handling

use loopcheck::protocol::{
    decode_catalog_size, BoardId, CatalogEntry, CommandKind, Criterion, IdentityRecord,
    InitCommand, ProtocolError, Schedule, Status, TestReply, TestRequest, DATA_LEN,
    TEST_PACKET_LEN,
};

const ID: BoardId = BoardId([0xDEAD_BEEF, 1, 0x0102_0304]);

// ============================================================================
// Layout Tests
// ============================================================================

mod layout_tests {
    use super::*;

    #[test]
    fn test_packet_length_constant() {
        assert_eq!(TEST_PACKET_LEN, 114);
        assert_eq!(InitCommand::ENCODED_LEN, 15);
        assert_eq!(IdentityRecord::ENCODED_LEN, 112);
        assert_eq!(CatalogEntry::ENCODED_LEN, 102);
    }

    #[test]
    fn test_request_field_offsets() {
        let mut data = [0u8; DATA_LEN];
        data[0] = 0xAA;
        data[DATA_LEN - 1] = 0xBB;
        let bytes = TestRequest::new(ID, 5, data).encode();
        assert_eq!(&bytes[..4], &0xDEAD_BEEFu32.to_le_bytes());
        assert_eq!(&bytes[8..12], &0x0102_0304u32.to_le_bytes());
        assert_eq!(bytes[12], 5);
        assert_eq!(bytes[13], 0xAA);
        assert_eq!(bytes[112], 0xBB);
        assert_eq!(bytes[113], Status::Mismatch as u8);
    }

    #[test]
    fn test_catalog_entry_trailing_bytes() {
        let entry = CatalogEntry::new("#flash", Criterion::ExactMatch, Schedule::Sequential).unwrap();
        let bytes = entry.encode();
        assert_eq!(bytes[0], b'#');
        assert_eq!(bytes[100], 0);
        assert_eq!(bytes[101], 0);

        let adc = CatalogEntry::new(" adc", Criterion::Tolerance, Schedule::Concurrent).unwrap();
        let bytes = adc.encode();
        assert_eq!(bytes[100], 1);
        assert_eq!(bytes[101], 1);
    }
}

// ============================================================================
// Decoding Tests
// ============================================================================

mod decoding_tests {
    use super::*;

    #[test]
    fn test_identity_from_foreign_bytes() {
        let mut bytes = Vec::new();
        for word in [7u32, 8, 9] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes.extend_from_slice(b"nucleo-f746zg");
        bytes.resize(112, 0);
        let record = IdentityRecord::decode(&bytes).unwrap();
        assert_eq!(record.board_id, BoardId([7, 8, 9]));
        assert_eq!(record.board_name(), "nucleo-f746zg");
    }

    #[test]
    fn test_unknown_bytes_rejected() {
        let mut entry = CatalogEntry::new("#x", Criterion::ExactMatch, Schedule::Concurrent)
            .unwrap()
            .encode();
        entry[100] = 2;
        assert_eq!(
            CatalogEntry::decode(&entry),
            Err(ProtocolError::UnknownCriterion(2))
        );
        entry[100] = 0;
        entry[101] = 7;
        assert_eq!(
            CatalogEntry::decode(&entry),
            Err(ProtocolError::UnknownSchedule(7))
        );

        let mut reply = TestRequest::new(ID, 0, [0; DATA_LEN]).encode();
        reply[113] = 5;
        assert_eq!(TestReply::decode(&reply), Err(ProtocolError::UnknownStatus(5)));
    }

    #[test]
    fn test_init_command_kinds() {
        assert_eq!(CommandKind::try_from(0), Ok(CommandKind::Identity));
        assert_eq!(CommandKind::try_from(1), Ok(CommandKind::CatalogSize));
        assert_eq!(CommandKind::try_from(2), Ok(CommandKind::CatalogEntry));
        assert!(CommandKind::try_from(3).is_err());
    }

    #[test]
    fn test_identity_command_carries_no_id() {
        let bytes = InitCommand::identity().encode();
        assert!(bytes[..12].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_catalog_size_little_endian() {
        assert_eq!(decode_catalog_size(&[18, 0]), Ok(18));
        assert_eq!(decode_catalog_size(&[0, 1]), Ok(256));
    }
}

// ============================================================================
// Boundary Marker Tests
// ============================================================================

mod marker_tests {
    use super::*;

    #[test]
    fn test_display_name_strips_marker_and_blanks() {
        let entry = CatalogEntry::new("#dac1 to adc3 ", Criterion::Tolerance, Schedule::Sequential).unwrap();
        assert!(entry.is_group_end());
        assert_eq!(entry.display_name(), "dac1 to adc3");
    }

    #[test]
    fn test_marker_only_counts_in_first_byte() {
        let entry = CatalogEntry::new(" a#b", Criterion::ExactMatch, Schedule::Concurrent).unwrap();
        assert!(!entry.is_group_end());
    }

    #[test]
    fn test_marking_a_full_length_name_fails() {
        let entry = CatalogEntry::new("n".repeat(100), Criterion::ExactMatch, Schedule::Concurrent).unwrap();
        assert!(matches!(
            entry.marked_as_group_end(),
            Err(ProtocolError::NameTooLong { len: 101, .. })
        ));
    }
}
