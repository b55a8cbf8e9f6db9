//! Unit tests for catalog partitioning

use loopcheck::errors::CatalogError;
use loopcheck::host::catalog::count_groups;
use loopcheck::host::{partition_groups, GroupPlan};
use loopcheck::protocol::{CatalogEntry, Criterion, Schedule};

fn entry(name: &str, schedule: Schedule) -> CatalogEntry {
    CatalogEntry::new(name, Criterion::ExactMatch, schedule).unwrap()
}

#[test]
fn test_reference_layout() {
    let names = [
        "#a", " b", "c", "d", "#e", " f", "g", "#h", " i", "j", "k", "l", "#m", " n", "o", "#p",
        "#q", "#r",
    ];
    let catalog: Vec<_> = names
        .iter()
        .enumerate()
        .map(|(i, n)| {
            let schedule = if i >= 14 {
                Schedule::Sequential
            } else {
                Schedule::Concurrent
            };
            entry(n, schedule)
        })
        .collect();

    // Markers at 0, 4, 7, 12, 15, 16, 17
    assert_eq!(count_groups(&catalog), 7);
    let groups = partition_groups(&catalog).unwrap();
    let lens: Vec<usize> = groups.iter().map(|g| g.len).collect();
    assert_eq!(lens, vec![1, 4, 3, 5, 3, 1, 1]);
    assert_eq!(groups.iter().map(|g| g.len).sum::<usize>(), catalog.len());
}

#[test]
fn test_groups_are_contiguous() {
    let catalog = vec![
        entry(" a", Schedule::Concurrent),
        entry("#b", Schedule::Concurrent),
        entry(" c", Schedule::Sequential),
        entry("#d", Schedule::Sequential),
    ];
    let groups = partition_groups(&catalog).unwrap();
    assert_eq!(
        groups,
        vec![
            GroupPlan {
                index: 0,
                first: 0,
                len: 2,
                schedule: Schedule::Concurrent,
            },
            GroupPlan {
                index: 1,
                first: 2,
                len: 2,
                schedule: Schedule::Sequential,
            },
        ]
    );
    assert_eq!(groups[1].entries(&catalog)[0].display_name(), "c");
}

#[test]
fn test_group_schedule_follows_first_entry() {
    let catalog = vec![
        entry(" a", Schedule::Sequential),
        entry("#b", Schedule::Concurrent),
    ];
    let groups = partition_groups(&catalog).unwrap();
    assert_eq!(groups[0].schedule, Schedule::Sequential);
}

#[test]
fn test_trailing_entries_rejected() {
    let catalog = vec![
        entry("#a", Schedule::Concurrent),
        entry(" b", Schedule::Concurrent),
        entry(" c", Schedule::Concurrent),
    ];
    assert_eq!(
        partition_groups(&catalog),
        Err(CatalogError::UnterminatedGroup { trailing: 2 })
    );
}

#[test]
fn test_empty_catalog_rejected() {
    assert_eq!(partition_groups(&[]), Err(CatalogError::Empty));
}

#[test]
fn test_group_wider_than_selector_rejected() {
    let mut catalog = vec![entry("#head", Schedule::Sequential)];
    catalog.extend((0..257).map(|i| entry(&format!(" s{i}"), Schedule::Concurrent)));
    catalog.push(entry("#tail", Schedule::Concurrent));
    assert_eq!(
        partition_groups(&catalog),
        Err(CatalogError::GroupTooLarge {
            len: 258,
            max: loopcheck::host::catalog::MAX_GROUP_LEN,
        })
    );
}
