//! Container state
//!
//! Everything behind the container lock. All methods assume the caller
//! holds it.

use serde::Serialize;

use crate::cluster_map::{ClusterMap, ClusterMove};
use crate::config::{CachePolicy, Config};
use crate::directory::{check_back_reference, Directory};
use crate::error::{ChainError, Result};
use crate::format::{Owner, StreamDescriptor};
use crate::fragment::{ChainCursor, FragmentProvider};
use crate::store::BackingStore;

/// Summary returned by a successful verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IntegrityReport {
    /// Live streams in the directory
    pub streams: u64,
    /// Streams holding at least one cluster
    pub non_empty_streams: u64,
    /// Clusters in the array
    pub total_clusters: u64,
    /// Clusters owned by the directory chain
    pub directory_clusters: u64,
    /// Clusters owned by stream chains
    pub stream_clusters: u64,
    /// Bytes stored across all streams
    pub stream_bytes: u64,
}

/// The stream currently handed out to a `StreamHandle`
pub(crate) struct OpenStream {
    pub(crate) index: u64,
    pub(crate) descriptor: StreamDescriptor,
    pub(crate) cursor: ChainCursor,
    pub(crate) position: u64,
}

impl OpenStream {
    fn provider<'a, S: BackingStore>(
        &'a mut self,
        map: &'a mut ClusterMap<S>,
    ) -> FragmentProvider<'a, S> {
        let owner = Owner::Stream(self.index);
        FragmentProvider::new(map, owner, &mut self.descriptor, &mut self.cursor)
    }
}

pub(crate) struct ContainerState<S: BackingStore> {
    pub(crate) map: ClusterMap<S>,
    pub(crate) directory: Directory,
    pub(crate) config: Config,
    pub(crate) open: Option<OpenStream>,
}

impl<S: BackingStore> ContainerState<S> {
    // =========================================================================
    // Container Operations
    // =========================================================================

    pub(crate) fn add(&mut self) -> Result<u64> {
        self.ensure_closed("add a stream")?;
        let index = self.directory.add(&mut self.map, StreamDescriptor::EMPTY)?;
        self.map.notify_dirty(Owner::Directory);
        Ok(index)
    }

    pub(crate) fn insert(&mut self, index: u64) -> Result<()> {
        self.ensure_closed("insert a stream")?;
        self.directory.insert(&mut self.map, index, StreamDescriptor::EMPTY)?;
        self.map.notify_dirty(Owner::Directory);
        Ok(())
    }

    pub(crate) fn open_stream(&mut self, index: u64) -> Result<()> {
        self.ensure_closed("open another stream")?;
        let mut descriptor = self.directory.get(&mut self.map, index)?;

        let mut cursor = ChainCursor::new(self.config.cache_policy);
        if self.config.cache_policy == CachePolicy::Scan {
            FragmentProvider::new(&mut self.map, Owner::Stream(index), &mut descriptor, &mut cursor)
                .scan()?;
        }

        self.open = Some(OpenStream {
            index,
            descriptor,
            cursor,
            position: 0,
        });
        tracing::trace!(index, size = descriptor.size, "Opened stream");
        Ok(())
    }

    pub(crate) fn close_stream(&mut self) {
        if let Some(open) = self.open.take() {
            tracing::trace!(index = open.index, "Closed stream");
        }
    }

    pub(crate) fn remove(&mut self, index: u64) -> Result<()> {
        self.ensure_closed("remove a stream")?;
        self.release_chain(index)?;
        self.directory.remove(&mut self.map, index)?;
        self.map.notify_dirty(Owner::Directory);
        Ok(())
    }

    pub(crate) fn clear(&mut self, index: u64) -> Result<()> {
        self.ensure_closed("clear a stream")?;
        if self.release_chain(index)? {
            self.directory.update(&mut self.map, index, StreamDescriptor::EMPTY)?;
            self.map.notify_dirty(Owner::Stream(index));
        }
        Ok(())
    }

    pub(crate) fn swap(&mut self, a: u64, b: u64) -> Result<()> {
        self.ensure_closed("swap streams")?;
        self.directory.swap(&mut self.map, a, b)?;
        if a != b {
            self.map.notify_dirty(Owner::Directory);
        }
        Ok(())
    }

    pub(crate) fn clear_all(&mut self) -> Result<()> {
        self.ensure_closed("clear the container")?;
        self.map.reset()?;
        self.directory.reset();
        self.map.notify_dirty(Owner::Directory);
        tracing::debug!("Cleared container");
        Ok(())
    }

    /// Full structural check of every chain reachable from the header
    pub(crate) fn verify(&mut self) -> Result<IntegrityReport> {
        let len = self.map.store_len()?;
        self.map.header().validate(len)?;

        let cluster_size = self.map.cluster_size();
        let mut report = IntegrityReport {
            streams: self.directory.count(),
            total_clusters: self.map.total_clusters(),
            ..IntegrityReport::default()
        };

        let chain = self.directory.chain();
        report.directory_clusters = walk_owned(&mut self.map, &chain, Owner::Directory)?;

        for index in 0..self.directory.count() {
            let descriptor = self.directory.read_record(&mut self.map, index)?;
            check_back_reference(&mut self.map, index, &descriptor)?;
            if descriptor.is_empty() {
                continue;
            }
            let clusters = walk_owned(&mut self.map, &descriptor, Owner::Stream(index))?;
            if clusters != descriptor.cluster_count(cluster_size) {
                return Err(ChainError::CorruptData(format!(
                    "stream {} has {} clusters, its size {} needs {}",
                    index,
                    clusters,
                    descriptor.size,
                    descriptor.cluster_count(cluster_size)
                )));
            }
            report.non_empty_streams += 1;
            report.stream_clusters += clusters;
            report.stream_bytes += descriptor.size;
        }

        let reachable = report.directory_clusters + report.stream_clusters;
        if reachable != report.total_clusters {
            return Err(ChainError::CorruptData(format!(
                "{} clusters reachable from the directory, {} present",
                reachable, report.total_clusters
            )));
        }

        tracing::debug!(?report, "Verified container");
        Ok(report)
    }

    // =========================================================================
    // Open Stream Operations
    // =========================================================================

    pub(crate) fn read_open(&mut self, buf: &mut [u8]) -> Result<usize> {
        let ContainerState { map, open, .. } = self;
        let open = open.as_mut().ok_or_else(not_open)?;
        let position = open.position;
        let read = open.provider(map).read_at(position, buf)?;
        open.position += read as u64;
        Ok(read)
    }

    pub(crate) fn write_open(&mut self, data: &[u8]) -> Result<usize> {
        let before = self.open_descriptor()?;
        {
            let ContainerState { map, open, .. } = self;
            let open = open.as_mut().ok_or_else(not_open)?;
            let position = open.position;
            open.provider(map).write_at(position, data)?;
            open.position += data.len() as u64;
        }
        self.sync_open_descriptor(before, &[])?;
        Ok(data.len())
    }

    pub(crate) fn set_open_len(&mut self, size: u64) -> Result<()> {
        let before = self.open_descriptor()?;
        let moves = {
            let ContainerState { map, open, .. } = self;
            let open = open.as_mut().ok_or_else(not_open)?;
            open.provider(map).set_total_bytes(size)?
        };
        self.sync_open_descriptor(before, &moves)
    }

    pub(crate) fn open_descriptor(&self) -> Result<StreamDescriptor> {
        self.open.as_ref().map(|o| o.descriptor).ok_or_else(not_open)
    }

    pub(crate) fn open_position(&self) -> Result<u64> {
        self.open.as_ref().map(|o| o.position).ok_or_else(not_open)
    }

    pub(crate) fn set_open_position(&mut self, position: u64) -> Result<()> {
        let open = self.open.as_mut().ok_or_else(not_open)?;
        open.position = position;
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_closed(&self, action: &str) -> Result<()> {
        match &self.open {
            Some(open) => Err(ChainError::InvalidOperation(format!(
                "cannot {} while stream {} is open",
                action, open.index
            ))),
            None => Ok(()),
        }
    }

    /// Release every cluster of stream `index`; false if it had none
    fn release_chain(&mut self, index: u64) -> Result<bool> {
        let descriptor = self.directory.get(&mut self.map, index)?;
        let Some(start) = descriptor.start_cluster else {
            return Ok(false);
        };

        let count = descriptor.cluster_count(self.map.cluster_size());
        if self.config.integrity_checks {
            // A chain longer than its descriptor would be cut in half.
            walk_owned(&mut self.map, &descriptor, Owner::Stream(index))?;
        }

        let trim = self.map.remove_next_clusters(start, count)?;
        if trim.predecessor.is_some() || trim.successor.is_some() {
            return Err(ChainError::CorruptData(format!(
                "chain of stream {} does not match its descriptor",
                index
            )));
        }
        self.directory
            .apply_moves(&mut self.map, &trim.moves, Some(Owner::Stream(index)))?;

        tracing::debug!(index, clusters = count, moved = trim.moves.len(), "Released stream chain");
        Ok(true)
    }

    /// Persist the open stream's descriptor and fix other descriptors
    fn sync_open_descriptor(
        &mut self,
        before: StreamDescriptor,
        moves: &[ClusterMove],
    ) -> Result<()> {
        let (index, descriptor) = {
            let open = self.open.as_ref().ok_or_else(not_open)?;
            (open.index, open.descriptor)
        };
        self.directory
            .apply_moves(&mut self.map, moves, Some(Owner::Stream(index)))?;
        if descriptor != before {
            self.directory.update(&mut self.map, index, descriptor)?;
        }
        Ok(())
    }
}

/// Walk a chain from its descriptor, checking both sentinels and the END
/// position. Returns the number of clusters.
fn walk_owned<S: BackingStore>(
    map: &mut ClusterMap<S>,
    chain: &StreamDescriptor,
    owner: Owner,
) -> Result<u64> {
    let (Some(start), Some(end)) = (chain.start_cluster, chain.end_cluster) else {
        return Ok(0);
    };
    let expected = chain.cluster_count(map.cluster_size());

    let head = map.read_cluster_header(start)?;
    if !head.traits.is_start() || head.prev.owner() != Some(owner) {
        return Err(ChainError::CorruptPointer {
            cluster: start,
            field: "prev",
            value: head.prev.encode(),
        });
    }

    let clusters = map.walk_chain(start, expected)?;
    let last = clusters.last().copied().unwrap_or(start);
    let tail = map.read_cluster_header(last)?;
    if last != end || tail.next.owner() != Some(owner) {
        return Err(ChainError::CorruptData(format!(
            "chain of {:?} ends at cluster {} ({:?}), expected cluster {}",
            owner, last, tail.next, end
        )));
    }
    Ok(clusters.len() as u64)
}

fn not_open() -> ChainError {
    ChainError::InvalidOperation("no stream is open".to_string())
}
