//! Board registry: identity, catalog and one bound routine per group.

use std::sync::Arc;

use super::routine::TestRoutine;
use crate::errors::{CatalogError, LoopcheckError};
use crate::host::catalog::partition_groups;
use crate::protocol::{BoardId, CatalogEntry, Criterion, IdentityRecord, ProtocolError, Schedule};

pub struct Board {
    identity: IdentityRecord,
    catalog: Vec<CatalogEntry>,
    routines: Vec<Arc<dyn TestRoutine>>,
}

impl Board {
    pub fn builder(board_id: BoardId, name: impl Into<String>) -> BoardBuilder {
        BoardBuilder::new(board_id, name)
    }

    pub fn identity(&self) -> &IdentityRecord {
        &self.identity
    }

    pub fn catalog(&self) -> &[CatalogEntry] {
        &self.catalog
    }

    pub fn routines(&self) -> &[Arc<dyn TestRoutine>] {
        &self.routines
    }

    pub fn group_count(&self) -> usize {
        self.routines.len()
    }

    pub(crate) fn into_parts(self) -> (IdentityRecord, Vec<CatalogEntry>, Vec<Arc<dyn TestRoutine>>) {
        (self.identity, self.catalog, self.routines)
    }
}

/// Builds a [`Board`] group by group. Each group's entries inherit its
/// schedule and its last entry is marked as the group end.
pub struct BoardBuilder {
    board_id: BoardId,
    name: String,
    catalog: Vec<CatalogEntry>,
    routines: Vec<Arc<dyn TestRoutine>>,
    error: Option<LoopcheckError>,
}

impl BoardBuilder {
    pub fn new(board_id: BoardId, name: impl Into<String>) -> Self {
        Self {
            board_id,
            name: name.into(),
            catalog: Vec::new(),
            routines: Vec::new(),
            error: None,
        }
    }

    pub fn group<'a>(
        mut self,
        routine: Arc<dyn TestRoutine>,
        schedule: Schedule,
        entries: impl IntoIterator<Item = (&'a str, Criterion)>,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        match Self::group_entries(schedule, entries) {
            Ok(mut group) if !group.is_empty() => {
                self.catalog.append(&mut group);
                self.routines.push(routine);
            }
            Ok(_) => self.error = Some(CatalogError::Empty.into()),
            Err(e) => self.error = Some(e.into()),
        }
        self
    }

    fn group_entries<'a>(
        schedule: Schedule,
        entries: impl IntoIterator<Item = (&'a str, Criterion)>,
    ) -> Result<Vec<CatalogEntry>, ProtocolError> {
        let mut group = entries
            .into_iter()
            .map(|(name, criterion)| {
                // Only the group's last entry may carry the marker.
                let name = name.trim_start_matches(crate::protocol::BOUNDARY_MARKER);
                CatalogEntry::new(format!(" {}", name.trim_start()), criterion, schedule)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(last) = group.last_mut() {
            *last = last.marked_as_group_end()?;
        }
        Ok(group)
    }

    pub fn build(self) -> Result<Board, LoopcheckError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let identity = IdentityRecord::new(self.board_id, self.name)?;
        if self.catalog.len() > usize::from(u16::MAX) {
            return Err(CatalogError::TooManyEntries {
                entries: self.catalog.len(),
            }
            .into());
        }
        let groups = partition_groups(&self.catalog)?;
        if groups.len() != self.routines.len() {
            return Err(CatalogError::RoutineCountMismatch {
                routines: self.routines.len(),
                groups: groups.len(),
            }
            .into());
        }
        Ok(Board {
            identity,
            catalog: self.catalog,
            routines: self.routines,
        })
    }
}
