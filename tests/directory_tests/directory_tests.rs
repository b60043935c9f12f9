//! Tests for Directory
//!
//! These tests verify:
//! - Capacity grows in blocks and is persisted in the header
//! - Insert/remove shift records and repoint chain back-references
//! - Swap is self-inverse
//! - Back-reference mismatches are reported
//! - Tip migrations are folded back into the records

use std::io::Cursor;

use chainstream::cluster_map::{ClusterMap, ClusterMove};
use chainstream::directory::Directory;
use chainstream::format::{Link, Owner, StreamDescriptor};
use chainstream::ChainError;

// =============================================================================
// Helper Functions
// =============================================================================

type MemMap = ClusterMap<Cursor<Vec<u8>>>;

fn setup(growth: u64) -> (MemMap, Directory) {
    let map = ClusterMap::create(Cursor::new(Vec::new()), 32, true).unwrap();
    (map, Directory::new(growth, true))
}

/// Create a chain of `clusters` clusters for `index` and describe it
fn chain_for(map: &mut MemMap, index: u64, clusters: u64) -> StreamDescriptor {
    let (start, end) = map.new_cluster_chain(clusters, Owner::Stream(index)).unwrap();
    StreamDescriptor {
        size: clusters * 32,
        start_cluster: Some(start),
        end_cluster: Some(end),
    }
}

fn owner_of(map: &mut MemMap, descriptor: &StreamDescriptor) -> (Link, Link) {
    (
        map.read_prev(descriptor.start_cluster.unwrap()).unwrap(),
        map.read_next(descriptor.end_cluster.unwrap()).unwrap(),
    )
}

// =============================================================================
// Growth Tests
// =============================================================================

#[test]
fn test_new_directory_is_empty() {
    let (_map, directory) = setup(4);
    assert_eq!(directory.count(), 0);
    assert_eq!(directory.capacity(), 0);
    assert!(directory.chain().is_empty());
}

#[test]
fn test_add_reserves_growth_block() {
    let (mut map, mut directory) = setup(4);

    assert_eq!(directory.add(&mut map, StreamDescriptor::EMPTY).unwrap(), 0);
    assert_eq!(directory.count(), 1);
    assert_eq!(directory.capacity(), 4);

    // 4 records * 24 bytes over 32-byte clusters
    assert_eq!(map.total_clusters(), 3);
    let header = *map.header();
    assert_eq!(header.stream_count, 1);
    assert_eq!(header.directory_capacity, 4);
    assert_eq!(header.directory_start, Some(0));
    assert_eq!(header.directory_end, Some(2));
    assert_eq!(map.read_prev(0).unwrap(), Link::Owner(Owner::Directory));
}

#[test]
fn test_capacity_grows_only_when_full() {
    let (mut map, mut directory) = setup(2);
    for _ in 0..5 {
        directory.add(&mut map, StreamDescriptor::EMPTY).unwrap();
    }
    assert_eq!(directory.count(), 5);
    assert_eq!(directory.capacity(), 6);
    assert_eq!(map.header().directory_capacity, 6);
}

#[test]
fn test_load_restores_state() {
    let (mut map, mut directory) = setup(4);
    let d = chain_for(&mut map, 0, 2);
    directory.add(&mut map, d).unwrap();
    directory.add(&mut map, StreamDescriptor::EMPTY).unwrap();

    let mut loaded = Directory::load(&map, 4, true).unwrap();
    assert_eq!(loaded.count(), 2);
    assert_eq!(loaded.capacity(), 4);
    assert_eq!(loaded.chain(), directory.chain());
    assert_eq!(loaded.get(&mut map, 0).unwrap(), d);
    assert_eq!(loaded.get(&mut map, 1).unwrap(), StreamDescriptor::EMPTY);
}

// =============================================================================
// Structural Operation Tests
// =============================================================================

#[test]
fn test_insert_shifts_and_repoints() {
    let (mut map, mut directory) = setup(4);
    let first = chain_for(&mut map, 0, 1);
    directory.add(&mut map, first).unwrap();
    let second = chain_for(&mut map, 1, 2);
    directory.add(&mut map, second).unwrap();

    directory.insert(&mut map, 0, StreamDescriptor::EMPTY).unwrap();
    assert_eq!(directory.count(), 3);

    assert_eq!(directory.get(&mut map, 0).unwrap(), StreamDescriptor::EMPTY);
    assert_eq!(directory.get(&mut map, 1).unwrap(), first);
    assert_eq!(directory.get(&mut map, 2).unwrap(), second);

    let owner = Link::Owner(Owner::Stream(2));
    assert_eq!(owner_of(&mut map, &second), (owner, owner));
}

#[test]
fn test_insert_at_count_appends() {
    let (mut map, mut directory) = setup(4);
    directory.add(&mut map, StreamDescriptor::EMPTY).unwrap();
    directory.insert(&mut map, 1, StreamDescriptor::EMPTY).unwrap();
    assert_eq!(directory.count(), 2);
}

#[test]
fn test_insert_past_count_rejected() {
    let (mut map, mut directory) = setup(4);
    directory.add(&mut map, StreamDescriptor::EMPTY).unwrap();
    assert!(matches!(
        directory.insert(&mut map, 2, StreamDescriptor::EMPTY),
        Err(ChainError::InvalidOperation(_))
    ));
    assert_eq!(directory.count(), 1);
}

#[test]
fn test_remove_shifts_down_and_repoints() {
    let (mut map, mut directory) = setup(4);
    directory.add(&mut map, StreamDescriptor::EMPTY).unwrap();
    let kept = chain_for(&mut map, 1, 3);
    directory.add(&mut map, kept).unwrap();

    directory.remove(&mut map, 0).unwrap();
    assert_eq!(directory.count(), 1);
    assert_eq!(map.header().stream_count, 1);
    assert_eq!(directory.get(&mut map, 0).unwrap(), kept);

    let owner = Link::Owner(Owner::Stream(0));
    assert_eq!(owner_of(&mut map, &kept), (owner, owner));

    // The vacated slot is zeroed, so the record past count reads as empty
    directory.add(&mut map, StreamDescriptor::EMPTY).unwrap();
    assert_eq!(directory.get(&mut map, 1).unwrap(), StreamDescriptor::EMPTY);
}

#[test]
fn test_swap_is_self_inverse() {
    let (mut map, mut directory) = setup(4);
    let a = chain_for(&mut map, 0, 1);
    directory.add(&mut map, a).unwrap();
    let b = chain_for(&mut map, 1, 2);
    directory.add(&mut map, b).unwrap();

    directory.swap(&mut map, 0, 1).unwrap();
    assert_eq!(directory.get(&mut map, 0).unwrap(), b);
    assert_eq!(directory.get(&mut map, 1).unwrap(), a);
    let zero = Link::Owner(Owner::Stream(0));
    assert_eq!(owner_of(&mut map, &b), (zero, zero));

    directory.swap(&mut map, 1, 0).unwrap();
    assert_eq!(directory.get(&mut map, 0).unwrap(), a);
    assert_eq!(directory.get(&mut map, 1).unwrap(), b);

    directory.swap(&mut map, 1, 1).unwrap();
    assert_eq!(directory.get(&mut map, 1).unwrap(), b);
}

#[test]
fn test_out_of_range_access() {
    let (mut map, mut directory) = setup(4);
    directory.add(&mut map, StreamDescriptor::EMPTY).unwrap();

    assert!(matches!(
        directory.get(&mut map, 1),
        Err(ChainError::IndexOutOfRange { index: 1, len: 1 })
    ));
    assert!(directory.remove(&mut map, 3).is_err());
    assert!(directory.swap(&mut map, 0, 1).is_err());
}

// =============================================================================
// Back-Reference Tests
// =============================================================================

#[test]
fn test_back_reference_mismatch_detected() {
    let (mut map, mut directory) = setup(4);
    let d = chain_for(&mut map, 0, 2);
    directory.add(&mut map, d).unwrap();

    map.write_prev_raw(d.start_cluster.unwrap(), 7).unwrap();

    let err = directory.get(&mut map, 0).unwrap_err();
    assert!(matches!(
        err,
        ChainError::BackReference {
            stream: 0,
            expected: 0,
            actual: 7,
            ..
        }
    ));

    // Raw reads skip the check
    assert_eq!(directory.read_record(&mut map, 0).unwrap(), d);
}

#[test]
fn test_back_reference_check_can_be_disabled() {
    let mut map = ClusterMap::create(Cursor::new(Vec::new()), 32, false).unwrap();
    let mut directory = Directory::new(4, false);
    let d = chain_for(&mut map, 0, 1);
    directory.add(&mut map, d).unwrap();
    map.write_next_raw(d.end_cluster.unwrap(), 3).unwrap();

    assert_eq!(directory.get(&mut map, 0).unwrap(), d);
}

// =============================================================================
// Move Application Tests
// =============================================================================

#[test]
fn test_apply_moves_updates_migrated_stream() {
    let (mut map, mut directory) = setup(4);
    directory.add(&mut map, StreamDescriptor::EMPTY).unwrap(); // directory: 0..2
    let doomed = chain_for(&mut map, 0, 2); // 3, 4
    directory.update(&mut map, 0, doomed).unwrap();
    let moved = chain_for(&mut map, 1, 2); // 5, 6
    directory.add(&mut map, moved).unwrap();

    // Record 1 still names clusters 5 and 6 once only 5 clusters remain
    let trim = map.remove_next_clusters(3, 2).unwrap();
    directory
        .apply_moves(&mut map, &trim.moves, Some(Owner::Stream(0)))
        .unwrap();
    let patched = directory.get(&mut map, 1).unwrap();
    assert_eq!(patched.start_cluster, Some(4));
    assert_eq!(patched.end_cluster, Some(3));
    directory.remove(&mut map, 0).unwrap();

    let after = directory.get(&mut map, 0).unwrap();
    assert_eq!(after.size, 64);
    assert_eq!(map.total_clusters(), 5);
    assert_eq!(map.walk_chain(after.start_cluster.unwrap(), 2).unwrap().len(), 2);
}

#[test]
fn test_apply_moves_updates_directory_chain() {
    let (mut map, mut directory) = setup(4);
    let doomed = chain_for(&mut map, 0, 1); // 0
    directory.add(&mut map, doomed).unwrap(); // directory: 1..3

    let trim = map.remove_next_clusters(0, 1).unwrap();
    directory
        .apply_moves(&mut map, &trim.moves, Some(Owner::Stream(0)))
        .unwrap();
    directory.update(&mut map, 0, StreamDescriptor::EMPTY).unwrap();

    let chain = directory.chain();
    assert_eq!(chain.end_cluster, Some(0));
    assert_eq!(map.header().directory_end, Some(0));
    assert_eq!(map.walk_chain(chain.start_cluster.unwrap(), 3).unwrap().len(), 3);
    assert_eq!(directory.get(&mut map, 0).unwrap(), StreamDescriptor::EMPTY);
}

#[test]
fn test_apply_moves_rejects_unknown_stream() {
    let (mut map, mut directory) = setup(4);
    let only = chain_for(&mut map, 0, 1);
    directory.add(&mut map, only).unwrap();

    let stray = ClusterMove {
        from: 3,
        to: 0,
        start_of: Some(Owner::Stream(5)),
        end_of: None,
    };
    let err = directory.apply_moves(&mut map, &[stray], None).unwrap_err();
    assert!(matches!(err, ChainError::CorruptData(_)));
}
