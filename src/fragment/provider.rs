//! Fragment provider
//!
//! Presents one chain as a sequence of fixed-size fragments and as a flat
//! byte range. Borrowed for the duration of a single operation; the
//! traversal state it accumulates lives in the caller's [`ChainCursor`].

use crate::cluster_map::{ClusterMap, ClusterMove};
use crate::error::{ChainError, Result};
use crate::format::{ClusterTraits, Link, Owner, StreamDescriptor};
use crate::store::BackingStore;

use super::cursor::{ChainCursor, Position};

/// Fragment view over the chain described by `descriptor`
///
/// Growing or shrinking the chain updates `descriptor` in place. Shrinking
/// may migrate clusters of other chains; those moves are returned so the
/// caller can fix the affected descriptors.
pub struct FragmentProvider<'a, S: BackingStore> {
    map: &'a mut ClusterMap<S>,
    owner: Owner,
    descriptor: &'a mut StreamDescriptor,
    cursor: &'a mut ChainCursor,
}

impl<'a, S: BackingStore> FragmentProvider<'a, S> {
    pub fn new(
        map: &'a mut ClusterMap<S>,
        owner: Owner,
        descriptor: &'a mut StreamDescriptor,
        cursor: &'a mut ChainCursor,
    ) -> Self {
        Self {
            map,
            owner,
            descriptor,
            cursor,
        }
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn descriptor(&self) -> StreamDescriptor {
        *self.descriptor
    }

    pub fn total_bytes(&self) -> u64 {
        self.descriptor.size
    }

    pub fn fragment_count(&self) -> u64 {
        self.descriptor.cluster_count(self.map.cluster_size())
    }

    /// Valid bytes in fragment `index` (the last one may be partial)
    pub fn fragment_len(&self, index: u64) -> Result<usize> {
        let count = self.fragment_count();
        if index >= count {
            return Err(ChainError::out_of_range(index, count));
        }
        let cluster_size = self.map.cluster_size() as u64;
        Ok((self.descriptor.size - index * cluster_size).min(cluster_size) as usize)
    }

    /// Map a byte offset to `(fragment, offset within fragment)`
    pub fn map_position(&self, position: u64) -> Option<(u64, usize)> {
        if position >= self.descriptor.size {
            return None;
        }
        let cluster_size = self.map.cluster_size() as u64;
        Some((position / cluster_size, (position % cluster_size) as usize))
    }

    // =========================================================================
    // Fragment Access
    // =========================================================================

    /// Copy of the valid bytes of fragment `index`
    pub fn get_fragment(&mut self, index: u64) -> Result<Vec<u8>> {
        let len = self.fragment_len(index)?;
        let cluster = self.cluster_of(index)?;
        let mut buf = vec![0u8; len];
        self.map.read_data(cluster, 0, &mut buf)?;
        Ok(buf)
    }

    /// Read from fragment `index` starting at `offset` into `buf`
    pub fn read_fragment(&mut self, index: u64, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check_fragment_span(index, offset, buf.len())?;
        let cluster = self.cluster_of(index)?;
        self.map.read_data(cluster, offset, buf)
    }

    /// Overwrite bytes of fragment `index` within its valid range
    pub fn update_fragment(&mut self, index: u64, offset: usize, data: &[u8]) -> Result<()> {
        self.check_fragment_span(index, offset, data.len())?;
        let cluster = self.cluster_of(index)?;
        self.map.write_data(cluster, offset, data)?;
        self.map.notify_dirty(self.owner);
        Ok(())
    }

    // =========================================================================
    // Byte Range Access
    // =========================================================================

    /// Read up to `buf.len()` bytes starting at `position`
    ///
    /// Returns the number of bytes read, zero at or past the end.
    pub fn read_at(&mut self, position: u64, buf: &mut [u8]) -> Result<usize> {
        if position >= self.descriptor.size {
            return Ok(0);
        }
        let len = (buf.len() as u64).min(self.descriptor.size - position) as usize;
        let cluster_size = self.map.cluster_size() as u64;

        let mut done = 0;
        while done < len {
            let at = position + done as u64;
            let fragment = at / cluster_size;
            let offset = (at % cluster_size) as usize;
            let chunk = (cluster_size as usize - offset).min(len - done);

            let cluster = self.cluster_of(fragment)?;
            self.map.read_data(cluster, offset, &mut buf[done..done + chunk])?;
            done += chunk;
        }
        Ok(len)
    }

    /// Write `data` at `position`, growing the chain if it ends short
    ///
    /// Bytes between the old end and `position` read back as zeros.
    pub fn write_at(&mut self, position: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = position
            .checked_add(data.len() as u64)
            .ok_or_else(|| ChainError::InvalidArgument("write extends past u64::MAX".to_string()))?;
        if end > self.descriptor.size {
            // Growth only appends; it never migrates clusters.
            let moves = self.set_total_bytes(end)?;
            debug_assert!(moves.is_empty());
        }

        let cluster_size = self.map.cluster_size() as u64;
        let mut done = 0;
        while done < data.len() {
            let at = position + done as u64;
            let fragment = at / cluster_size;
            let offset = (at % cluster_size) as usize;
            let chunk = (cluster_size as usize - offset).min(data.len() - done);

            let cluster = self.cluster_of(fragment)?;
            self.map.write_data(cluster, offset, &data[done..done + chunk])?;
            done += chunk;
        }

        self.map.notify_dirty(self.owner);
        Ok(())
    }

    // =========================================================================
    // Resizing
    // =========================================================================

    /// Grow or shrink the chain to back exactly `size` bytes
    ///
    /// New space reads as zeros. Shrinking releases whole clusters from the
    /// tail and zeroes the cut-off part of the new last cluster.
    pub fn set_total_bytes(&mut self, size: u64) -> Result<Vec<ClusterMove>> {
        let old_size = self.descriptor.size;
        if size == old_size {
            return Ok(Vec::new());
        }

        if size > i64::MAX as u64 {
            return Err(ChainError::InvalidArgument(format!(
                "size {} exceeds the largest stream ({} bytes)",
                size,
                i64::MAX
            )));
        }

        let cluster_size = self.map.cluster_size();
        let old_count = self.fragment_count();
        let new_count = size.div_ceil(cluster_size as u64);
        let mut moves = Vec::new();

        if new_count > old_count {
            let added = new_count - old_count;
            self.map.check_growth(added)?;
            match self.descriptor.end_cluster {
                Some(end) if old_count > 0 => {
                    let last = self.map.append_clusters_to_end(end, added)?;
                    self.descriptor.end_cluster = Some(last);
                }
                _ => {
                    let (start, end) = self.map.new_cluster_chain(added, self.owner)?;
                    self.descriptor.start_cluster = Some(start);
                    self.descriptor.end_cluster = Some(end);
                }
            }
        } else if new_count < old_count {
            let end = self.boundary(self.descriptor.end_cluster, "end")?;
            let trim = self.map.remove_backwards(end, old_count - new_count)?;

            for mv in &trim.moves {
                self.cursor.invalidate_cluster(mv.from);
                self.cursor.invalidate_cluster(mv.to);
                if mv.start_of == Some(self.owner) {
                    self.descriptor.start_cluster = Some(mv.to);
                }
                if mv.end_of == Some(self.owner) {
                    self.descriptor.end_cluster = Some(mv.to);
                }
            }
            self.cursor.truncate(new_count);

            if new_count == 0 {
                self.descriptor.start_cluster = None;
                self.descriptor.end_cluster = None;
            } else {
                let last = trim.predecessor.ok_or_else(|| {
                    ChainError::CorruptData(format!(
                        "{:?} lost its last cluster while shrinking",
                        self.owner
                    ))
                })?;
                self.descriptor.end_cluster = Some(last);
            }
            moves = trim.moves;
        }

        self.descriptor.size = size;
        if new_count == 0 {
            *self.descriptor = StreamDescriptor::EMPTY;
        }

        let tail = (size % cluster_size as u64) as usize;
        if size < old_size && tail != 0 {
            let last = self.boundary(self.descriptor.end_cluster, "end")?;
            self.map.zero_data(last, tail)?;
        }

        tracing::trace!(owner = ?self.owner, old_size, size, moved = moves.len(), "Resized chain");
        self.map.notify_dirty(self.owner);
        Ok(moves)
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Walk the whole chain once, checking its shape and remembering every
    /// position.
    pub fn scan(&mut self) -> Result<()> {
        let count = self.fragment_count();
        if count == 0 {
            return Ok(());
        }
        let end = self.boundary(self.descriptor.end_cluster, "end")?;
        let mut current = self.boundary(self.descriptor.start_cluster, "start")?;

        for fragment in 0..count {
            self.cursor.remember(Position {
                fragment,
                cluster: current,
            });
            let header = self.map.read_cluster_header(current)?;
            if fragment + 1 == count {
                if !header.traits.is_end() || current != end {
                    return Err(ChainError::CyclicChain {
                        start: self.descriptor.start_cluster.unwrap_or(current),
                        steps: count,
                    });
                }
                break;
            }
            if header.traits.is_end() {
                return Err(self.short_chain(fragment + 1, count));
            }
            let next = self.map.expect_cluster(current, "next", header.next)?;
            if self.map.integrity_checks() {
                self.map.check_back_link(current, next)?;
            }
            current = next;
        }

        self.cursor.set_current(Position {
            fragment: count - 1,
            cluster: end,
        });
        Ok(())
    }

    /// Resolve fragment `index` to its cluster
    ///
    /// Starts from whichever known point is nearest: the cache, the cursor,
    /// the chain START or the chain END. The walk never takes more than
    /// `fragment_count` steps.
    pub fn cluster_of(&mut self, index: u64) -> Result<u64> {
        let count = self.fragment_count();
        if index >= count {
            return Err(ChainError::out_of_range(index, count));
        }

        if let Some(cluster) = self.cursor.lookup(index) {
            self.cursor.set_current(Position {
                fragment: index,
                cluster,
            });
            return Ok(cluster);
        }

        let start = self.boundary(self.descriptor.start_cluster, "start")?;
        let end = self.boundary(self.descriptor.end_cluster, "end")?;

        let mut origin = Position {
            fragment: 0,
            cluster: start,
        };
        if count - 1 - index < index {
            origin = Position {
                fragment: count - 1,
                cluster: end,
            };
        }
        if let Some(current) = self.cursor.current() {
            if current.fragment < count
                && current.fragment.abs_diff(index) < origin.fragment.abs_diff(index)
            {
                origin = current;
            }
        }

        let checks = self.map.integrity_checks();
        self.cursor.remember(origin);
        let mut position = origin;
        while position.fragment != index {
            let header = self.map.read_cluster_header(position.cluster)?;
            position = if position.fragment < index {
                if header.traits.is_end() {
                    return Err(self.short_chain(position.fragment + 1, count));
                }
                let next = self.map.expect_cluster(position.cluster, "next", header.next)?;
                if checks {
                    self.map.check_back_link(position.cluster, next)?;
                }
                Position {
                    fragment: position.fragment + 1,
                    cluster: next,
                }
            } else {
                if header.traits.is_start() {
                    return Err(self.short_chain(count - position.fragment, count));
                }
                let prev = self.map.expect_cluster(position.cluster, "prev", header.prev)?;
                if checks {
                    self.check_forward_link(prev, position.cluster)?;
                }
                Position {
                    fragment: position.fragment - 1,
                    cluster: prev,
                }
            };
            self.cursor.remember(position);
        }

        if checks {
            self.check_boundary_traits(position, count)?;
        }

        self.cursor.remember(position);
        self.cursor.set_current(position);
        Ok(position.cluster)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn check_fragment_span(&self, index: u64, offset: usize, len: usize) -> Result<()> {
        let valid = self.fragment_len(index)?;
        if offset.checked_add(len).map_or(true, |end| end > valid) {
            return Err(ChainError::InvalidArgument(format!(
                "span {}+{} exceeds the {} valid bytes of fragment {}",
                offset, len, valid, index
            )));
        }
        Ok(())
    }

    /// `prev.next == current` and `prev` is no chain END
    fn check_forward_link(&mut self, prev: u64, current: u64) -> Result<()> {
        let header = self.map.read_cluster_header(prev)?;
        if header.traits.is_end() || header.next != Link::Cluster(current) {
            return Err(ChainError::CorruptPointer {
                cluster: prev,
                field: "next",
                value: header.next.encode(),
            });
        }
        Ok(())
    }

    /// The first and last fragments must sit on the chain boundaries
    fn check_boundary_traits(&mut self, position: Position, count: u64) -> Result<()> {
        let traits = self.map.read_traits(position.cluster)?;
        let mut expected = ClusterTraits::NONE;
        if position.fragment == 0 {
            expected.insert(ClusterTraits::START);
        }
        if position.fragment + 1 == count {
            expected.insert(ClusterTraits::END);
        }
        if traits != expected {
            return Err(ChainError::CorruptData(format!(
                "fragment {} of {:?} is cluster {} with traits {:?}, expected {:?}",
                position.fragment, self.owner, position.cluster, traits, expected
            )));
        }
        Ok(())
    }

    fn boundary(&self, cluster: Option<u64>, which: &str) -> Result<u64> {
        cluster.ok_or_else(|| {
            ChainError::CorruptData(format!(
                "{:?} holds {} bytes but has no {} cluster",
                self.owner, self.descriptor.size, which
            ))
        })
    }

    fn short_chain(&self, found: u64, expected: u64) -> ChainError {
        ChainError::CorruptData(format!(
            "chain of {:?} has {} clusters, its size needs {}",
            self.owner, found, expected
        ))
    }
}
