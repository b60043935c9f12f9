//! Directory Module
//!
//! The listing of stream descriptors, stored as a chain of its own owned by
//! the directory sentinel.
//!
//! ## Layout
//! ```text
//!   header.directory_start ─► [ rec 0 | rec 1 | ... ] ─► ... ─► header.directory_end
//!                              24 bytes each, packed across cluster data
//! ```
//!
//! Record `i` describes stream `i`. Slots `[count, capacity)` are reserved
//! and zero. Capacity grows in blocks of `directory_growth` records and
//! never shrinks until the whole container is cleared.
//!
//! ## Back-References
//! For every non-empty record `i`, the START cluster's `prev` and the END
//! cluster's `next` hold `i`. Any operation that moves a record to another
//! slot rewrites both sentinels.

use std::collections::BTreeMap;

use crate::cluster_map::{ClusterMap, ClusterMove};
use crate::config::CachePolicy;
use crate::error::{ChainError, Result};
use crate::format::{Owner, StreamDescriptor, DESCRIPTOR_SIZE};
use crate::fragment::{ChainCursor, FragmentProvider};
use crate::store::BackingStore;

/// In-memory state of the directory chain
///
/// The chain itself lives in the cluster map; every method takes the map
/// it was loaded from.
pub struct Directory {
    /// Directory chain; `size` is `capacity * DESCRIPTOR_SIZE`
    chain: StreamDescriptor,
    cursor: ChainCursor,
    count: u64,
    growth: u64,
    integrity_checks: bool,
}

impl Directory {
    /// Empty directory (no chain yet)
    pub fn new(growth: u64, integrity_checks: bool) -> Self {
        Self {
            chain: StreamDescriptor::EMPTY,
            cursor: ChainCursor::new(CachePolicy::Remember),
            count: 0,
            growth: growth.max(1),
            integrity_checks,
        }
    }

    /// Rebuild the directory state from the map's header
    pub fn load<S: BackingStore>(
        map: &ClusterMap<S>,
        growth: u64,
        integrity_checks: bool,
    ) -> Result<Self> {
        let header = map.header();
        let mut directory = Self::new(growth, integrity_checks);
        directory.count = header.stream_count;
        if header.directory_capacity > 0 {
            let size = header.directory_capacity.checked_mul(DESCRIPTOR_SIZE).ok_or_else(|| {
                ChainError::CorruptHeader(format!(
                    "directory capacity {} overflows the directory length",
                    header.directory_capacity
                ))
            })?;
            directory.chain = StreamDescriptor {
                size,
                start_cluster: header.directory_start,
                end_cluster: header.directory_end,
            };
        }

        let needed = directory.chain.cluster_count(map.cluster_size());
        if needed > map.total_clusters() {
            return Err(ChainError::CorruptHeader(format!(
                "directory capacity {} needs {} clusters, only {} exist",
                header.directory_capacity,
                needed,
                map.total_clusters()
            )));
        }

        tracing::debug!(
            count = directory.count,
            capacity = directory.capacity(),
            "Loaded directory"
        );
        Ok(directory)
    }

    /// Forget every record and the chain (the caller resets the map)
    pub fn reset(&mut self) {
        self.chain = StreamDescriptor::EMPTY;
        self.cursor.reset();
        self.count = 0;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of live records
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Number of records the chain can hold without growing
    pub fn capacity(&self) -> u64 {
        self.chain.size / DESCRIPTOR_SIZE
    }

    /// Descriptor of the directory's own chain
    pub fn chain(&self) -> StreamDescriptor {
        self.chain
    }

    // =========================================================================
    // Record Access
    // =========================================================================

    /// Read record `index`, checking its back-references when enabled
    pub fn get<S: BackingStore>(
        &mut self,
        map: &mut ClusterMap<S>,
        index: u64,
    ) -> Result<StreamDescriptor> {
        let descriptor = self.read_record(map, index)?;
        if self.integrity_checks {
            check_back_reference(map, index, &descriptor)?;
        }
        Ok(descriptor)
    }

    /// Read record `index` without checking back-references
    pub fn read_record<S: BackingStore>(
        &mut self,
        map: &mut ClusterMap<S>,
        index: u64,
    ) -> Result<StreamDescriptor> {
        let descriptor = self.read_raw_record(map, index)?;
        descriptor.check_bounds(index, map.total_clusters())?;
        Ok(descriptor)
    }

    /// Overwrite record `index`
    pub fn update<S: BackingStore>(
        &mut self,
        map: &mut ClusterMap<S>,
        index: u64,
        descriptor: StreamDescriptor,
    ) -> Result<()> {
        self.check_live(index)?;
        self.write_record(map, index, &descriptor)?;
        if self.integrity_checks {
            check_back_reference(map, index, &descriptor)?;
        }
        Ok(())
    }

    // =========================================================================
    // Structural Operations
    // =========================================================================

    /// Append `descriptor` as the last record; returns its index
    pub fn add<S: BackingStore>(
        &mut self,
        map: &mut ClusterMap<S>,
        descriptor: StreamDescriptor,
    ) -> Result<u64> {
        let index = self.count;
        self.insert(map, index, descriptor)?;
        Ok(index)
    }

    /// Insert `descriptor` at `index`, shifting later records up by one
    ///
    /// `index` may equal `count` (append) but not exceed it.
    pub fn insert<S: BackingStore>(
        &mut self,
        map: &mut ClusterMap<S>,
        index: u64,
        descriptor: StreamDescriptor,
    ) -> Result<()> {
        if index > self.count {
            return Err(ChainError::InvalidOperation(format!(
                "cannot insert at {} past the end of {} records",
                index, self.count
            )));
        }

        self.reserve(map, self.count + 1)?;
        self.count += 1;

        for slot in (index..self.count - 1).rev() {
            let moved = self.read_record(map, slot)?;
            self.write_record(map, slot + 1, &moved)?;
            repoint(map, slot + 1, &moved)?;
        }
        self.write_record(map, index, &descriptor)?;
        repoint(map, index, &descriptor)?;

        self.persist(map)?;
        tracing::debug!(index, count = self.count, "Inserted directory record");
        Ok(())
    }

    /// Remove record `index`, shifting later records down by one
    ///
    /// The stream's chain must already be released.
    pub fn remove<S: BackingStore>(&mut self, map: &mut ClusterMap<S>, index: u64) -> Result<()> {
        self.check_live(index)?;

        for slot in index + 1..self.count {
            let moved = self.read_record(map, slot)?;
            self.write_record(map, slot - 1, &moved)?;
            repoint(map, slot - 1, &moved)?;
        }
        self.write_record(map, self.count - 1, &StreamDescriptor::EMPTY)?;
        self.count -= 1;

        self.persist(map)?;
        tracing::debug!(index, count = self.count, "Removed directory record");
        Ok(())
    }

    /// Exchange records `a` and `b`. Swapping a record with itself is a no-op.
    pub fn swap<S: BackingStore>(&mut self, map: &mut ClusterMap<S>, a: u64, b: u64) -> Result<()> {
        self.check_live(a)?;
        self.check_live(b)?;
        if a == b {
            return Ok(());
        }

        let first = self.get(map, a)?;
        let second = self.get(map, b)?;
        self.write_record(map, a, &second)?;
        self.write_record(map, b, &first)?;
        repoint(map, a, &second)?;
        repoint(map, b, &first)?;

        tracing::debug!(a, b, "Swapped directory records");
        Ok(())
    }

    /// Fix descriptors after tip migrations
    ///
    /// Boundary moves of the directory chain update the header. Boundary
    /// moves of stream chains are coalesced per stream and each affected
    /// record is rewritten once. Moves of `skip` are left to the caller.
    pub fn apply_moves<S: BackingStore>(
        &mut self,
        map: &mut ClusterMap<S>,
        moves: &[ClusterMove],
        skip: Option<Owner>,
    ) -> Result<()> {
        if moves.is_empty() {
            return Ok(());
        }

        // Step 1: Directory positions and boundaries
        let mut chain_moved = false;
        let mut fixups: BTreeMap<u64, (Option<u64>, Option<u64>)> = BTreeMap::new();
        for mv in moves {
            self.cursor.invalidate_cluster(mv.from);
            self.cursor.invalidate_cluster(mv.to);

            for (owner, is_start) in [(mv.start_of, true), (mv.end_of, false)] {
                let Some(owner) = owner else { continue };
                if Some(owner) == skip {
                    continue;
                }
                match owner {
                    Owner::Directory => {
                        if is_start {
                            self.chain.start_cluster = Some(mv.to);
                        } else {
                            self.chain.end_cluster = Some(mv.to);
                        }
                        chain_moved = true;
                    }
                    Owner::Stream(index) => {
                        let entry = fixups.entry(index).or_default();
                        if is_start {
                            entry.0 = Some(mv.to);
                        } else {
                            entry.1 = Some(mv.to);
                        }
                    }
                }
            }
        }
        if chain_moved {
            self.persist(map)?;
        }

        // Step 2: Stream records, once each
        for (index, (start, end)) in fixups {
            if index >= self.count {
                return Err(ChainError::CorruptData(format!(
                    "moved cluster names stream {} but only {} exist",
                    index, self.count
                )));
            }
            // The record may still name the old tip, which no longer exists
            let mut descriptor = self.read_raw_record(map, index)?;
            if descriptor.is_empty() {
                return Err(ChainError::CorruptData(format!(
                    "moved cluster names stream {} which has no clusters",
                    index
                )));
            }
            if start.is_some() {
                descriptor.start_cluster = start;
            }
            if end.is_some() {
                descriptor.end_cluster = end;
            }
            descriptor.check_bounds(index, map.total_clusters())?;
            self.update(map, index, descriptor)?;
        }

        tracing::trace!(moves = moves.len(), "Applied cluster moves to directory");
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn provider<'a, S: BackingStore>(
        &'a mut self,
        map: &'a mut ClusterMap<S>,
    ) -> FragmentProvider<'a, S> {
        FragmentProvider::new(map, Owner::Directory, &mut self.chain, &mut self.cursor)
    }

    fn read_raw_record<S: BackingStore>(
        &mut self,
        map: &mut ClusterMap<S>,
        index: u64,
    ) -> Result<StreamDescriptor> {
        self.check_live(index)?;
        let mut buf = [0u8; DESCRIPTOR_SIZE as usize];
        let read = self.provider(map).read_at(index * DESCRIPTOR_SIZE, &mut buf)?;
        if read != buf.len() {
            return Err(ChainError::CorruptData(format!(
                "directory record {} is truncated",
                index
            )));
        }
        StreamDescriptor::decode_raw(&buf, index)
    }

    fn write_record<S: BackingStore>(
        &mut self,
        map: &mut ClusterMap<S>,
        index: u64,
        descriptor: &StreamDescriptor,
    ) -> Result<()> {
        if index >= self.capacity() {
            return Err(ChainError::out_of_range(index, self.capacity()));
        }
        self.provider(map).write_at(index * DESCRIPTOR_SIZE, &descriptor.encode())
    }

    /// Grow the chain to hold at least `records` records
    fn reserve<S: BackingStore>(&mut self, map: &mut ClusterMap<S>, records: u64) -> Result<()> {
        if records <= self.capacity() {
            return Ok(());
        }
        let capacity = records.div_ceil(self.growth) * self.growth;
        let moves = self.provider(map).set_total_bytes(capacity * DESCRIPTOR_SIZE)?;
        debug_assert!(moves.is_empty());
        self.persist(map)?;

        tracing::debug!(capacity, "Grew directory");
        Ok(())
    }

    /// Write count, capacity and chain boundaries through to the header
    fn persist<S: BackingStore>(&self, map: &mut ClusterMap<S>) -> Result<()> {
        let (count, capacity, chain) = (self.count, self.capacity(), self.chain);
        map.update_header(|h| {
            h.stream_count = count;
            h.directory_capacity = capacity;
            h.directory_start = chain.start_cluster;
            h.directory_end = chain.end_cluster;
        })
    }

    fn check_live(&self, index: u64) -> Result<()> {
        if index >= self.count {
            return Err(ChainError::out_of_range(index, self.count));
        }
        Ok(())
    }
}

/// Point both boundary sentinels of a stream's chain at `index`
fn repoint<S: BackingStore>(
    map: &mut ClusterMap<S>,
    index: u64,
    descriptor: &StreamDescriptor,
) -> Result<()> {
    match (descriptor.start_cluster, descriptor.end_cluster) {
        (Some(start), Some(end)) if !descriptor.is_empty() => {
            map.repoint_owner(start, end, Owner::Stream(index))
        }
        _ => Ok(()),
    }
}

/// Check that the boundary clusters of a non-empty stream name `index`
pub fn check_back_reference<S: BackingStore>(
    map: &mut ClusterMap<S>,
    index: u64,
    descriptor: &StreamDescriptor,
) -> Result<()> {
    let (Some(start), Some(end)) = (descriptor.start_cluster, descriptor.end_cluster) else {
        return Ok(());
    };
    let expected = Owner::Stream(index).encode();

    let traits = map.read_traits(start)?;
    let prev = map.read_prev_raw(start)?;
    if !traits.is_start() || prev != expected {
        return Err(ChainError::BackReference {
            stream: index,
            cluster: start,
            expected,
            actual: prev,
        });
    }

    let traits = map.read_traits(end)?;
    let next = map.read_next_raw(end)?;
    if !traits.is_end() || next != expected {
        return Err(ChainError::BackReference {
            stream: index,
            cluster: end,
            expected,
            actual: next,
        });
    }
    Ok(())
}
