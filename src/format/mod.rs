//! Format Module
//!
//! On-disk layout of a stream container.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (256 bytes)                                           │
//! │   Version: u8 | ClusterSize: i32 | TotalClusters: i64        │
//! │   StreamCount: i64 | DirCapacity: i64 | DirStart: i64        │
//! │   DirEnd: i64 | Reserved (zero) | CRC32: u32 (last 4 bytes)  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Cluster 0                                                    │
//! │   Traits: u8 | Prev: i64 | Next: i64 | Data [ClusterSize]    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Cluster 1 ... Cluster (TotalClusters - 1)                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Pointers are 64-bit everywhere: header
//! counters, cluster links and directory records share the same width.
//!
//! The directory (one 24-byte `StreamDescriptor` per stream) is not a
//! separate region: it is stored as the data of its own cluster chain,
//! owned by [`Owner::Directory`].

mod cluster;
mod descriptor;
mod header;

pub use cluster::{Cluster, ClusterHeader, ClusterTraits, Link, Owner};
pub use descriptor::StreamDescriptor;
pub use header::Header;

// =============================================================================
// Shared Constants
// =============================================================================

/// Current format version
pub const FORMAT_VERSION: u8 = 1;

/// Width in bytes of every pointer and counter in the format
pub const POINTER_WIDTH: usize = 8;

/// Fixed header size
pub const HEADER_SIZE: u64 = 256;

/// Cluster envelope: Traits (1) + Prev (8) + Next (8) = 17 bytes
pub const CLUSTER_ENVELOPE_SIZE: u64 = 1 + 2 * POINTER_WIDTH as u64;

/// Directory record: Start (8) + End (8) + Size (8) = 24 bytes
pub const DESCRIPTOR_SIZE: u64 = 3 * POINTER_WIDTH as u64;

/// Largest accepted cluster size (16 MiB)
pub const MAX_CLUSTER_SIZE: u32 = 16 * 1024 * 1024;

/// Encoded null link
pub const NULL_POINTER: i64 = -1;

/// Encoded owner index of the directory chain
pub const DIRECTORY_OWNER: i64 = -2;

// Field offsets inside a cluster record
pub(crate) const TRAITS_OFFSET: u64 = 0;
pub(crate) const PREV_OFFSET: u64 = 1;
pub(crate) const NEXT_OFFSET: u64 = 1 + POINTER_WIDTH as u64;
pub(crate) const DATA_OFFSET: u64 = CLUSTER_ENVELOPE_SIZE;

/// Size of one cluster record for the given cluster size
pub fn record_size(cluster_size: u32) -> u64 {
    CLUSTER_ENVELOPE_SIZE + cluster_size as u64
}

/// Minimum backing store length for `total_clusters` records
///
/// `None` when the length does not fit a signed 64-bit store offset.
pub fn required_len(cluster_size: u32, total_clusters: u64) -> Option<u64> {
    total_clusters
        .checked_mul(record_size(cluster_size))
        .and_then(|records| records.checked_add(HEADER_SIZE))
        .filter(|&len| len <= i64::MAX as u64)
}
