//! Mutation hooks
//!
//! Notification points for layers built on top of the container: a
//! transactional layer watching cluster regions for commit/rollback, and a
//! Merkle layer re-hashing streams that became dirty. The container never
//! waits on or depends on what an observer does.

use crate::format::Owner;

/// Receives structural and content change notifications
///
/// Cluster ranges are `[first, first + count)` in physical cluster indices,
/// as they are at the moment of the call.
pub trait StorageObserver: Send + Sync {
    /// Clusters are about to be appended to the array
    fn on_cluster_region_creating(&self, _first: u64, _count: u64) {}

    /// Clusters are about to be written
    fn on_cluster_region_saving(&self, _first: u64, _count: u64) {}

    /// Clusters at the tip of the array are about to be cut off
    fn on_cluster_region_deleting(&self, _first: u64, _count: u64) {}

    /// The content or shape of a stream changed
    fn on_stream_dirty(&self, _owner: Owner) {}
}
