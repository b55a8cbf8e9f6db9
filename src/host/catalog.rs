//! Catalog partitioning
//!
//! A group is a run of entries up to and including the next entry whose name
//! carries the boundary marker. The group's schedule is its first entry's.

use serde::Serialize;
use std::ops::Range;

use crate::errors::CatalogError;
use crate::protocol::{CatalogEntry, Schedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupPlan {
    pub index: usize,
    /// Catalog index of the group's first entry
    pub first: usize,
    pub len: usize,
    pub schedule: Schedule,
}

impl GroupPlan {
    pub fn range(&self) -> Range<usize> {
        self.first..self.first + self.len
    }

    pub fn entries<'a>(&self, catalog: &'a [CatalogEntry]) -> &'a [CatalogEntry] {
        &catalog[self.range()]
    }
}

/// Sub-tests in a group are addressed by a one-byte selector.
pub const MAX_GROUP_LEN: usize = u8::MAX as usize + 1;

/// Number of boundary-marked entries, i.e. the number of groups.
pub fn count_groups(catalog: &[CatalogEntry]) -> usize {
    catalog.iter().filter(|e| e.is_group_end()).count()
}

pub fn partition_groups(catalog: &[CatalogEntry]) -> Result<Vec<GroupPlan>, CatalogError> {
    if catalog.is_empty() {
        return Err(CatalogError::Empty);
    }

    let mut groups = Vec::with_capacity(count_groups(catalog));
    let mut first = 0;
    for (i, entry) in catalog.iter().enumerate() {
        if entry.is_group_end() {
            let len = i + 1 - first;
            if len > MAX_GROUP_LEN {
                return Err(CatalogError::GroupTooLarge {
                    len,
                    max: MAX_GROUP_LEN,
                });
            }
            groups.push(GroupPlan {
                index: groups.len(),
                first,
                len,
                schedule: catalog[first].schedule,
            });
            first = i + 1;
        }
    }

    if first < catalog.len() {
        return Err(CatalogError::UnterminatedGroup {
            trailing: catalog.len() - first,
        });
    }
    Ok(groups)
}
