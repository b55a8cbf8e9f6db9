//! Identity and catalog service on the init port.

use tracing::debug;

use crate::protocol::{encode_catalog_size, CatalogEntry, CommandKind, IdentityRecord, InitCommand};

pub struct IdentityService {
    identity: IdentityRecord,
    catalog: Vec<CatalogEntry>,
}

impl IdentityService {
    pub fn new(identity: IdentityRecord, catalog: Vec<CatalogEntry>) -> Self {
        Self { identity, catalog }
    }

    /// Answer a raw datagram from the init port. `None` means stay silent.
    pub fn on_inbound(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        match InitCommand::decode(bytes) {
            Ok(command) => self.answer(&command),
            Err(e) => {
                debug!(error = %e, "Ignoring init datagram");
                None
            }
        }
    }

    pub fn answer(&self, command: &InitCommand) -> Option<Vec<u8>> {
        // Discovery is answered to anyone.
        if command.kind == CommandKind::Identity {
            return Some(self.identity.encode());
        }
        if command.board_id != self.identity.board_id {
            debug!(kind = ?command.kind, "Ignoring command for another board");
            return None;
        }
        match command.kind {
            CommandKind::CatalogSize => match u16::try_from(self.catalog.len()) {
                Ok(count) => Some(encode_catalog_size(count)),
                Err(_) => {
                    debug!(entries = self.catalog.len(), "Catalog too large to report");
                    None
                }
            },
            CommandKind::CatalogEntry => match self.catalog.get(command.index as usize) {
                Some(entry) => Some(entry.encode()),
                None => {
                    debug!(index = command.index, "Catalog index out of range");
                    None
                }
            },
            CommandKind::Identity => Some(self.identity.encode()),
        }
    }
}
