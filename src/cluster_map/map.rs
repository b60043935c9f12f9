//! Cluster Map
//!
//! Dense, index-addressable array of cluster records stored after the
//! header. Owns the backing store.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::error::{ChainError, Result};
use crate::format::{
    record_size, required_len, Cluster, ClusterHeader, ClusterTraits, Header, Link, Owner,
    CLUSTER_ENVELOPE_SIZE, DATA_OFFSET, HEADER_SIZE, NEXT_OFFSET, PREV_OFFSET, TRAITS_OFFSET,
};
use crate::observer::StorageObserver;
use crate::store::BackingStore;

/// Upper bound on the buffer used to write freshly allocated clusters
const ALLOCATION_BATCH_BYTES: u64 = 1024 * 1024;

/// The cluster allocator
///
/// ## Invariants
/// - `header.total_clusters` equals the number of records in the store
/// - every record belongs to exactly one chain
/// - links are `-1`, a cluster index in `[0, total_clusters)`, or an owner
///   sentinel at a chain boundary
pub struct ClusterMap<S: BackingStore> {
    /// Backing store (header + records)
    pub(super) store: S,
    /// In-memory copy of the header, written through on change
    pub(super) header: Header,
    /// Bytes per record (envelope + data)
    pub(super) record_size: u64,
    /// Gate for the expensive checks
    pub(super) integrity_checks: bool,
    /// Mutation hook subscribers
    pub(super) observers: Vec<Arc<dyn StorageObserver>>,
}

impl<S: BackingStore> ClusterMap<S> {
    /// Initialize an empty map over `store`, discarding its contents
    pub fn create(mut store: S, cluster_size: u32, integrity_checks: bool) -> Result<Self> {
        let header = Header::new(cluster_size);
        store.set_len(HEADER_SIZE)?;

        let mut map = Self {
            store,
            header,
            record_size: record_size(cluster_size),
            integrity_checks,
            observers: Vec::new(),
        };
        map.write_header()?;

        tracing::debug!(cluster_size, "Created empty cluster map");
        Ok(map)
    }

    /// Load an existing map, validating the header against the store length
    pub fn load(mut store: S, integrity_checks: bool) -> Result<Self> {
        let len = store.len()?;
        if len < HEADER_SIZE {
            return Err(ChainError::CorruptHeader(format!(
                "backing store is {} bytes, smaller than the {} byte header",
                len, HEADER_SIZE
            )));
        }

        let mut buf = [0u8; HEADER_SIZE as usize];
        store.seek(SeekFrom::Start(0))?;
        store.read_exact(&mut buf)?;

        let header = Header::decode(&buf)?;
        header.validate(len)?;

        tracing::debug!(
            cluster_size = header.cluster_size,
            total_clusters = header.total_clusters,
            streams = header.stream_count,
            "Loaded cluster map"
        );

        Ok(Self {
            store,
            record_size: record_size(header.cluster_size),
            header,
            integrity_checks,
            observers: Vec::new(),
        })
    }

    /// Drop every cluster and return to the freshly created state
    pub fn reset(&mut self) -> Result<()> {
        let total = self.header.total_clusters;
        if total > 0 {
            self.notify(|o| o.on_cluster_region_deleting(0, total));
        }

        self.header = Header::new(self.header.cluster_size);
        self.store.set_len(HEADER_SIZE)?;
        self.write_header()?;

        tracing::debug!(removed = total, "Reset cluster map");
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn cluster_size(&self) -> u32 {
        self.header.cluster_size
    }

    pub fn total_clusters(&self) -> u64 {
        self.header.total_clusters
    }

    pub fn integrity_checks(&self) -> bool {
        self.integrity_checks
    }

    /// Mutate the header and write it through
    pub fn update_header(&mut self, f: impl FnOnce(&mut Header)) -> Result<()> {
        f(&mut self.header);
        self.write_header()
    }

    pub fn subscribe(&mut self, observer: Arc<dyn StorageObserver>) {
        self.observers.push(observer);
    }

    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.store.sync()?;
        Ok(())
    }

    /// Current byte length of the backing store
    pub fn store_len(&mut self) -> Result<u64> {
        Ok(self.store.len()?)
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// Notify observers that a stream's content changed
    pub fn notify_dirty(&self, owner: Owner) {
        self.notify(|o| o.on_stream_dirty(owner));
    }

    // =========================================================================
    // Whole Records
    // =========================================================================

    /// Read and decode a full cluster record
    pub fn read_cluster(&mut self, index: u64) -> Result<Cluster> {
        self.check_index(index)?;
        let mut buf = vec![0u8; self.record_size as usize];
        self.read_at(self.record_offset(index), &mut buf)?;

        let header = self.decode_envelope(index, &buf[..CLUSTER_ENVELOPE_SIZE as usize])?;
        buf.drain(..CLUSTER_ENVELOPE_SIZE as usize);

        Ok(Cluster {
            traits: header.traits,
            prev: header.prev,
            next: header.next,
            data: buf,
        })
    }

    /// Read and decode the envelope of a cluster
    pub fn read_cluster_header(&mut self, index: u64) -> Result<ClusterHeader> {
        self.check_index(index)?;
        let mut buf = [0u8; CLUSTER_ENVELOPE_SIZE as usize];
        self.read_at(self.record_offset(index), &mut buf)?;
        self.decode_envelope(index, &buf)
    }

    /// Overwrite a full cluster record
    pub fn write_cluster(&mut self, index: u64, cluster: &Cluster) -> Result<()> {
        self.check_index(index)?;
        if cluster.data.len() != self.cluster_size() as usize {
            return Err(ChainError::InvalidArgument(format!(
                "cluster data is {} bytes, cluster size is {}",
                cluster.data.len(),
                self.cluster_size()
            )));
        }

        let buf = encode_record(
            cluster.traits,
            cluster.prev.encode(),
            cluster.next.encode(),
            &cluster.data,
        );
        self.notify(|o| o.on_cluster_region_saving(index, 1));
        self.write_at(self.record_offset(index), &buf)
    }

    // =========================================================================
    // Fast Single-Field Accessors
    // =========================================================================

    pub fn read_traits(&mut self, index: u64) -> Result<ClusterTraits> {
        self.check_index(index)?;
        let mut buf = [0u8; 1];
        self.read_at(self.record_offset(index) + TRAITS_OFFSET, &mut buf)?;
        decode_traits(index, buf[0])
    }

    pub fn read_prev_raw(&mut self, index: u64) -> Result<i64> {
        self.check_index(index)?;
        self.read_i64(self.record_offset(index) + PREV_OFFSET)
    }

    pub fn read_next_raw(&mut self, index: u64) -> Result<i64> {
        self.check_index(index)?;
        self.read_i64(self.record_offset(index) + NEXT_OFFSET)
    }

    /// Decoded `prev`: an owner if the cluster is a chain START
    pub fn read_prev(&mut self, index: u64) -> Result<Link> {
        let traits = self.read_traits(index)?;
        let raw = self.read_prev_raw(index)?;
        Link::decode(raw, traits.is_start(), index, "prev", self.total_clusters())
    }

    /// Decoded `next`: an owner if the cluster is a chain END
    pub fn read_next(&mut self, index: u64) -> Result<Link> {
        let traits = self.read_traits(index)?;
        let raw = self.read_next_raw(index)?;
        Link::decode(raw, traits.is_end(), index, "next", self.total_clusters())
    }

    pub fn write_traits(&mut self, index: u64, traits: ClusterTraits) -> Result<()> {
        self.check_index(index)?;
        self.notify(|o| o.on_cluster_region_saving(index, 1));
        self.write_at(self.record_offset(index) + TRAITS_OFFSET, &[traits.bits()])
    }

    pub fn write_prev(&mut self, index: u64, link: Link) -> Result<()> {
        self.write_prev_raw(index, link.encode())
    }

    pub fn write_next(&mut self, index: u64, link: Link) -> Result<()> {
        self.write_next_raw(index, link.encode())
    }

    pub fn write_prev_raw(&mut self, index: u64, raw: i64) -> Result<()> {
        self.check_index(index)?;
        self.notify(|o| o.on_cluster_region_saving(index, 1));
        self.write_at(self.record_offset(index) + PREV_OFFSET, &raw.to_le_bytes())
    }

    pub fn write_next_raw(&mut self, index: u64, raw: i64) -> Result<()> {
        self.check_index(index)?;
        self.notify(|o| o.on_cluster_region_saving(index, 1));
        self.write_at(self.record_offset(index) + NEXT_OFFSET, &raw.to_le_bytes())
    }

    // =========================================================================
    // Cluster Data
    // =========================================================================

    /// Read `buf.len()` data bytes of cluster `index` starting at `offset`
    pub fn read_data(&mut self, index: u64, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check_index(index)?;
        self.check_span(offset, buf.len())?;
        self.read_at(self.record_offset(index) + DATA_OFFSET + offset as u64, buf)
    }

    /// Write `data` into cluster `index` starting at `offset`
    pub fn write_data(&mut self, index: u64, offset: usize, data: &[u8]) -> Result<()> {
        self.check_index(index)?;
        self.check_span(offset, data.len())?;
        self.notify(|o| o.on_cluster_region_saving(index, 1));
        self.write_at(self.record_offset(index) + DATA_OFFSET + offset as u64, data)
    }

    /// Zero the data of cluster `index` from `offset` to its end
    pub fn zero_data(&mut self, index: u64, offset: usize) -> Result<()> {
        let len = (self.cluster_size() as usize).saturating_sub(offset);
        if len == 0 {
            return Ok(());
        }
        self.write_data(index, offset, &vec![0u8; len])
    }

    // =========================================================================
    // Chain Construction
    // =========================================================================

    /// Append `count` fresh clusters linked as a new chain owned by `owner`
    ///
    /// Returns `(start, end)`. A single cluster carries both START and END
    /// with both links holding the owner.
    pub fn new_cluster_chain(&mut self, count: u64, owner: Owner) -> Result<(u64, u64)> {
        if count == 0 {
            return Err(ChainError::InvalidArgument(
                "cannot create an empty cluster chain".to_string(),
            ));
        }

        let first = self.allocate(count, Link::Owner(owner), Link::Owner(owner))?;
        let last = first + count - 1;

        tracing::debug!(?owner, first, last, "Created cluster chain");
        Ok((first, last))
    }

    /// Extend the chain ending at `end` by `count` clusters
    ///
    /// The owner is carried over from the old tail. Returns the new tail.
    pub fn append_clusters_to_end(&mut self, end: u64, count: u64) -> Result<u64> {
        if count == 0 {
            return Err(ChainError::InvalidArgument(
                "cannot append zero clusters".to_string(),
            ));
        }

        let mut traits = self.read_traits(end)?;
        if !traits.is_end() {
            return Err(ChainError::InvalidArgument(format!(
                "cluster {} is not the end of a chain",
                end
            )));
        }
        let owner = self.read_next(end)?;

        let first = self.allocate(count, Link::Cluster(end), owner)?;
        let last = first + count - 1;

        traits.remove(ClusterTraits::END);
        self.write_traits(end, traits)?;
        self.write_next(end, Link::Cluster(first))?;

        tracing::debug!(end, first, last, "Appended clusters to chain");
        Ok(last)
    }

    /// Cluster total after adding `count` clusters
    ///
    /// Fails with `InvalidArgument` when the grown array would not fit a
    /// 64-bit store offset. Nothing is touched.
    pub fn check_growth(&self, count: u64) -> Result<u64> {
        self.total_clusters()
            .checked_add(count)
            .filter(|&total| required_len(self.cluster_size(), total).is_some())
            .ok_or_else(|| {
                ChainError::InvalidArgument(format!(
                    "cannot add {} clusters to {}: store length overflows",
                    count,
                    self.total_clusters()
                ))
            })
    }

    /// Rewrite both boundary sentinels of the chain `[start .. end]`
    pub fn repoint_owner(&mut self, start: u64, end: u64, owner: Owner) -> Result<()> {
        self.write_prev(start, Link::Owner(owner))?;
        self.write_next(end, Link::Owner(owner))
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Collect the clusters of the chain beginning at `start`, following
    /// `next` until END. Fails with `CyclicChain` after `max_steps` clusters.
    ///
    /// Every back-link is checked regardless of the integrity gate.
    pub fn walk_chain(&mut self, start: u64, max_steps: u64) -> Result<Vec<u64>> {
        let mut clusters = Vec::new();
        let mut current = start;

        loop {
            if clusters.len() as u64 >= max_steps {
                return Err(ChainError::CyclicChain {
                    start,
                    steps: max_steps,
                });
            }
            clusters.push(current);

            let header = self.read_cluster_header(current)?;
            if header.traits.is_end() {
                return Ok(clusters);
            }

            let next = self.expect_cluster(current, "next", header.next)?;
            self.check_back_link(current, next)?;
            current = next;
        }
    }

    /// Unwrap a link that must point at a neighbouring cluster
    pub(crate) fn expect_cluster(
        &self,
        index: u64,
        field: &'static str,
        link: Link,
    ) -> Result<u64> {
        link.cluster().ok_or(ChainError::CorruptPointer {
            cluster: index,
            field,
            value: link.encode(),
        })
    }

    /// Verify that `next.prev == current` and that `next` is no chain START
    pub(crate) fn check_back_link(&mut self, current: u64, next: u64) -> Result<()> {
        let header = self.read_cluster_header(next)?;
        if header.traits.is_start() || header.prev != Link::Cluster(current) {
            return Err(ChainError::CorruptPointer {
                cluster: next,
                field: "prev",
                value: header.prev.encode(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Append `count` zero-filled clusters linked in sequence. The first
    /// gets `head` as prev (START if it is an owner), the last gets `tail`
    /// as next (END if it is an owner).
    fn allocate(&mut self, count: u64, head: Link, tail: Link) -> Result<u64> {
        let first = self.total_clusters();
        let total = self.check_growth(count)?;
        let last = total - 1;
        let cluster_size = self.cluster_size() as usize;

        self.notify(|o| o.on_cluster_region_creating(first, count));
        self.store.set_len(self.record_offset(total))?;

        let batch = (ALLOCATION_BATCH_BYTES / self.record_size).max(1);
        let data = vec![0u8; cluster_size];
        let mut buf = Vec::new();
        let mut batch_first = first;
        while batch_first <= last {
            let batch_last = last.min(batch_first + batch - 1);
            buf.clear();
            for index in batch_first..=batch_last {
                let mut traits = ClusterTraits::NONE;
                let prev = if index == first {
                    if matches!(head, Link::Owner(_)) {
                        traits.insert(ClusterTraits::START);
                    }
                    head
                } else {
                    Link::Cluster(index - 1)
                };
                let next = if index == last {
                    if matches!(tail, Link::Owner(_)) {
                        traits.insert(ClusterTraits::END);
                    }
                    tail
                } else {
                    Link::Cluster(index + 1)
                };
                buf.extend_from_slice(&encode_record(traits, prev.encode(), next.encode(), &data));
            }
            self.write_at(self.record_offset(batch_first), &buf)?;
            batch_first = batch_last + 1;
        }

        self.header.total_clusters = total;
        self.write_header()?;

        Ok(first)
    }

    pub(super) fn decode_envelope(&self, index: u64, buf: &[u8]) -> Result<ClusterHeader> {
        let traits = decode_traits(index, buf[TRAITS_OFFSET as usize])?;
        let prev_raw = get_i64(buf, PREV_OFFSET as usize);
        let next_raw = get_i64(buf, NEXT_OFFSET as usize);
        let total = self.total_clusters();

        Ok(ClusterHeader {
            traits,
            prev: Link::decode(prev_raw, traits.is_start(), index, "prev", total)?,
            next: Link::decode(next_raw, traits.is_end(), index, "next", total)?,
        })
    }

    pub(super) fn write_header(&mut self) -> Result<()> {
        let buf = self.header.encode();
        self.write_at(0, &buf)
    }

    pub(super) fn record_offset(&self, index: u64) -> u64 {
        HEADER_SIZE + index * self.record_size
    }

    pub(super) fn check_index(&self, index: u64) -> Result<()> {
        if index >= self.total_clusters() {
            return Err(ChainError::out_of_range(index, self.total_clusters()));
        }
        Ok(())
    }

    fn check_span(&self, offset: usize, len: usize) -> Result<()> {
        let cluster_size = self.cluster_size() as usize;
        if offset.checked_add(len).map_or(true, |end| end > cluster_size) {
            return Err(ChainError::InvalidArgument(format!(
                "span {}+{} exceeds cluster size {}",
                offset, len, cluster_size
            )));
        }
        Ok(())
    }

    pub(super) fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.store.seek(SeekFrom::Start(offset))?;
        self.store.read_exact(buf)?;
        Ok(())
    }

    pub(super) fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.store.seek(SeekFrom::Start(offset))?;
        self.store.write_all(buf)?;
        Ok(())
    }

    fn read_i64(&mut self, offset: u64) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_at(offset, &mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub(super) fn notify(&self, f: impl Fn(&dyn StorageObserver)) {
        for observer in &self.observers {
            f(observer.as_ref());
        }
    }
}

fn get_i64(buf: &[u8], at: usize) -> i64 {
    i64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

pub(super) fn decode_traits(index: u64, bits: u8) -> Result<ClusterTraits> {
    ClusterTraits::from_bits(bits).ok_or_else(|| {
        ChainError::CorruptData(format!("cluster {} has unknown traits {:#04x}", index, bits))
    })
}

pub(super) fn encode_record(traits: ClusterTraits, prev: i64, next: i64, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CLUSTER_ENVELOPE_SIZE as usize + data.len());
    buf.push(traits.bits());
    buf.extend_from_slice(&prev.to_le_bytes());
    buf.extend_from_slice(&next.to_le_bytes());
    buf.extend_from_slice(data);
    buf
}
