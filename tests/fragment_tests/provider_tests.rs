//! Tests for FragmentProvider
//!
//! These tests verify:
//! - Byte offsets map to fragments and back
//! - Reads and writes spanning cluster boundaries
//! - Growth, shrink, and zeroing of released space
//! - Cache policies and cursor reuse
//! - Traversal rejects malformed chains

use std::io::Cursor;

use chainstream::cluster_map::ClusterMap;
use chainstream::config::CachePolicy;
use chainstream::format::{ClusterTraits, Link, Owner, StreamDescriptor};
use chainstream::fragment::{ChainCursor, FragmentProvider};
use chainstream::ChainError;

// =============================================================================
// Helper Functions
// =============================================================================

type MemMap = ClusterMap<Cursor<Vec<u8>>>;

struct Chain {
    owner: Owner,
    descriptor: StreamDescriptor,
    cursor: ChainCursor,
}

impl Chain {
    fn new(index: u64, policy: CachePolicy) -> Self {
        Self {
            owner: Owner::Stream(index),
            descriptor: StreamDescriptor::EMPTY,
            cursor: ChainCursor::new(policy),
        }
    }

    fn provider<'a>(&'a mut self, map: &'a mut MemMap) -> FragmentProvider<'a, Cursor<Vec<u8>>> {
        FragmentProvider::new(map, self.owner, &mut self.descriptor, &mut self.cursor)
    }
}

fn new_map(cluster_size: u32) -> MemMap {
    ClusterMap::create(Cursor::new(Vec::new()), cluster_size, true).unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 + 1).collect()
}

fn read_all(chain: &mut Chain, map: &mut MemMap) -> Vec<u8> {
    let mut buf = vec![0u8; chain.descriptor.size as usize];
    let read = chain.provider(map).read_at(0, &mut buf).unwrap();
    assert_eq!(read, buf.len());
    buf
}

// =============================================================================
// Position Mapping Tests
// =============================================================================

#[test]
fn test_map_position() {
    let mut map = new_map(8);
    let mut chain = Chain::new(0, CachePolicy::Remember);
    chain.provider(&mut map).set_total_bytes(20).unwrap();

    let provider = chain.provider(&mut map);
    assert_eq!(provider.fragment_count(), 3);
    assert_eq!(provider.total_bytes(), 20);
    assert_eq!(provider.map_position(0), Some((0, 0)));
    assert_eq!(provider.map_position(8), Some((1, 0)));
    assert_eq!(provider.map_position(19), Some((2, 3)));
    assert_eq!(provider.map_position(20), None);
    assert_eq!(provider.fragment_len(2).unwrap(), 4);
}

// =============================================================================
// Read/Write Tests
// =============================================================================

#[test]
fn test_write_and_read_across_clusters() {
    let mut map = new_map(8);
    let mut chain = Chain::new(0, CachePolicy::Remember);
    let data = pattern(29);

    chain.provider(&mut map).write_at(0, &data).unwrap();
    assert_eq!(chain.descriptor.size, 29);
    assert_eq!(map.total_clusters(), 4);
    assert_eq!(read_all(&mut chain, &mut map), data);

    let mut middle = [0u8; 10];
    assert_eq!(chain.provider(&mut map).read_at(5, &mut middle).unwrap(), 10);
    assert_eq!(&middle[..], &data[5..15]);
}

#[test]
fn test_read_past_end_is_short() {
    let mut map = new_map(8);
    let mut chain = Chain::new(0, CachePolicy::Remember);
    chain.provider(&mut map).write_at(0, b"hello").unwrap();

    let mut buf = [0u8; 10];
    assert_eq!(chain.provider(&mut map).read_at(3, &mut buf).unwrap(), 2);
    assert_eq!(&buf[..2], b"lo");
    assert_eq!(chain.provider(&mut map).read_at(5, &mut buf).unwrap(), 0);
}

#[test]
fn test_write_past_end_leaves_zero_gap() {
    let mut map = new_map(4);
    let mut chain = Chain::new(0, CachePolicy::Remember);
    chain.provider(&mut map).write_at(0, b"ab").unwrap();
    chain.provider(&mut map).write_at(10, b"xy").unwrap();

    assert_eq!(read_all(&mut chain, &mut map), b"ab\0\0\0\0\0\0\0\0xy".to_vec());
}

#[test]
fn test_fragment_access() {
    let mut map = new_map(4);
    let mut chain = Chain::new(0, CachePolicy::Remember);
    chain.provider(&mut map).write_at(0, b"abcdefghij").unwrap();

    let mut provider = chain.provider(&mut map);
    assert_eq!(provider.get_fragment(1).unwrap(), b"efgh".to_vec());
    assert_eq!(provider.get_fragment(2).unwrap(), b"ij".to_vec());

    provider.update_fragment(1, 1, b"XY").unwrap();
    let mut buf = [0u8; 4];
    provider.read_fragment(1, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"eXYh");

    // Only the valid bytes of the last fragment can be updated
    assert!(matches!(
        provider.update_fragment(2, 1, b"zz"),
        Err(ChainError::InvalidArgument(_))
    ));
    assert!(matches!(
        provider.get_fragment(3),
        Err(ChainError::IndexOutOfRange { index: 3, len: 3 })
    ));
}

// =============================================================================
// Resize Tests
// =============================================================================

#[test]
fn test_shrink_then_regrow_reads_zeros() {
    let mut map = new_map(8);
    let mut chain = Chain::new(0, CachePolicy::Remember);
    chain.provider(&mut map).write_at(0, &[0xFF; 30]).unwrap();

    chain.provider(&mut map).set_total_bytes(3).unwrap();
    assert_eq!(map.total_clusters(), 1);
    chain.provider(&mut map).set_total_bytes(30).unwrap();

    let mut expected = vec![0u8; 30];
    expected[..3].copy_from_slice(&[0xFF; 3]);
    assert_eq!(read_all(&mut chain, &mut map), expected);
}

#[test]
fn test_shrink_to_zero_releases_chain() {
    let mut map = new_map(8);
    let mut chain = Chain::new(0, CachePolicy::Remember);
    chain.provider(&mut map).write_at(0, &pattern(40)).unwrap();

    chain.provider(&mut map).set_total_bytes(0).unwrap();
    assert_eq!(chain.descriptor, StreamDescriptor::EMPTY);
    assert_eq!(map.total_clusters(), 0);
    assert_eq!(chain.cursor.cached(), 0);
}

#[test]
fn test_shrink_reports_foreign_moves() {
    let mut map = new_map(4);
    let mut first = Chain::new(0, CachePolicy::Remember);
    let mut second = Chain::new(1, CachePolicy::Remember);
    first.provider(&mut map).write_at(0, &pattern(12)).unwrap(); // 0..2
    second.provider(&mut map).write_at(0, b"12345678").unwrap(); // 3, 4

    let moves = first.provider(&mut map).set_total_bytes(4).unwrap();
    assert_eq!(map.total_clusters(), 3);
    assert_eq!(read_all(&mut first, &mut map), pattern(4));

    // Fold the foreign moves back into the second descriptor
    for mv in &moves {
        if mv.start_of == Some(Owner::Stream(1)) {
            second.descriptor.start_cluster = Some(mv.to);
        }
        if mv.end_of == Some(Owner::Stream(1)) {
            second.descriptor.end_cluster = Some(mv.to);
        }
        second.cursor.invalidate_cluster(mv.from);
        second.cursor.invalidate_cluster(mv.to);
    }
    assert_eq!(read_all(&mut second, &mut map), b"12345678".to_vec());
}

#[test]
fn test_grow_appends_to_existing_chain() {
    let mut map = new_map(4);
    let mut first = Chain::new(0, CachePolicy::Remember);
    let mut second = Chain::new(1, CachePolicy::Remember);
    first.provider(&mut map).write_at(0, b"aaaa").unwrap();
    second.provider(&mut map).write_at(0, b"bbbb").unwrap();
    first.provider(&mut map).write_at(4, b"cccc").unwrap();

    assert_eq!(first.descriptor.start_cluster, Some(0));
    assert_eq!(first.descriptor.end_cluster, Some(2));
    assert_eq!(map.read_prev(2).unwrap(), Link::Cluster(0));
    assert_eq!(map.read_next(2).unwrap(), Link::Owner(Owner::Stream(0)));
    assert_eq!(read_all(&mut first, &mut map), b"aaaacccc".to_vec());
}

// =============================================================================
// Cache Policy Tests
// =============================================================================

#[test]
fn test_remember_policy_caches_walked_positions() {
    let mut map = new_map(4);
    let mut chain = Chain::new(0, CachePolicy::Remember);
    chain.provider(&mut map).set_total_bytes(40).unwrap();
    chain.cursor.reset();

    assert_eq!(chain.provider(&mut map).cluster_of(3).unwrap(), 3);
    assert!(chain.cursor.cached() >= 4);
    assert_eq!(chain.cursor.current().unwrap().fragment, 3);
}

#[test]
fn test_none_policy_keeps_only_cursor() {
    let mut map = new_map(4);
    let mut chain = Chain::new(0, CachePolicy::None);
    chain.provider(&mut map).write_at(0, &pattern(40)).unwrap();

    assert_eq!(chain.cursor.cached(), 0);
    assert_eq!(chain.provider(&mut map).cluster_of(6).unwrap(), 6);
    assert_eq!(chain.cursor.cached(), 0);
    assert_eq!(chain.cursor.current().unwrap().cluster, 6);
    assert_eq!(read_all(&mut chain, &mut map), pattern(40));
}

#[test]
fn test_scan_fills_cache() {
    let mut map = new_map(4);
    let mut chain = Chain::new(0, CachePolicy::Scan);
    chain.provider(&mut map).set_total_bytes(40).unwrap();
    chain.cursor.reset();

    chain.provider(&mut map).scan().unwrap();
    assert_eq!(chain.cursor.cached(), 10);
}

#[test]
fn test_cursor_truncated_on_shrink() {
    let mut map = new_map(4);
    let mut chain = Chain::new(0, CachePolicy::Remember);
    chain.provider(&mut map).write_at(0, &pattern(40)).unwrap();
    chain.provider(&mut map).scan().unwrap();

    chain.provider(&mut map).set_total_bytes(9).unwrap();
    assert_eq!(chain.cursor.cached(), 3);
    assert_eq!(read_all(&mut chain, &mut map), pattern(9));
}

// =============================================================================
// Malformed Chain Tests
// =============================================================================

#[test]
fn test_traversal_rejects_early_end() {
    let mut map = new_map(4);
    let mut chain = Chain::new(0, CachePolicy::None);
    chain.provider(&mut map).set_total_bytes(12).unwrap();
    map.write_traits(1, ClusterTraits::END).unwrap();
    chain.cursor.reset();

    let err = chain.provider(&mut map).cluster_of(1).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn test_scan_rejects_overlong_chain() {
    let mut map = new_map(4);
    let mut chain = Chain::new(0, CachePolicy::Scan);
    chain.provider(&mut map).set_total_bytes(12).unwrap();

    // Descriptor claims two clusters while the chain holds three
    chain.descriptor.size = 8;
    chain.cursor.reset();

    let err = chain.provider(&mut map).scan().unwrap_err();
    assert!(err.is_corruption());
}
