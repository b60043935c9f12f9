//! Directory records

use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};

use super::{DESCRIPTOR_SIZE, NULL_POINTER};

/// Per-stream directory entry
///
/// An empty stream has `size == 0` and no clusters. Otherwise
/// `cluster(start).prev` and `cluster(end).next` hold this descriptor's
/// directory index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub size: u64,
    pub start_cluster: Option<u64>,
    pub end_cluster: Option<u64>,
}

impl StreamDescriptor {
    pub const EMPTY: StreamDescriptor = StreamDescriptor {
        size: 0,
        start_cluster: None,
        end_cluster: None,
    };

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of clusters backing `size` bytes
    pub fn cluster_count(&self, cluster_size: u32) -> u64 {
        self.size.div_ceil(cluster_size as u64)
    }

    pub fn encode(&self) -> [u8; DESCRIPTOR_SIZE as usize] {
        let mut buf = [0u8; DESCRIPTOR_SIZE as usize];
        buf[0..8].copy_from_slice(&opt_to_raw(self.start_cluster).to_le_bytes());
        buf[8..16].copy_from_slice(&opt_to_raw(self.end_cluster).to_le_bytes());
        buf[16..24].copy_from_slice(&(self.size as i64).to_le_bytes());
        buf
    }

    /// Decode the record stored in directory slot `index`
    pub fn decode(
        buf: &[u8; DESCRIPTOR_SIZE as usize],
        index: u64,
        total_clusters: u64,
    ) -> Result<Self> {
        let descriptor = Self::decode_raw(buf, index)?;
        descriptor.check_bounds(index, total_clusters)?;
        Ok(descriptor)
    }

    /// Decode without checking the cluster pointers against the array
    ///
    /// Used while a removal is being folded back into the directory, when a
    /// record may still name a cluster that was just cut off.
    pub fn decode_raw(buf: &[u8; DESCRIPTOR_SIZE as usize], index: u64) -> Result<Self> {
        let start = get_i64(buf, 0);
        let end = get_i64(buf, 8);
        let size = get_i64(buf, 16);

        if size < 0 {
            return Err(corrupt(index, "negative size", start, end, size));
        }
        if size == 0 {
            // Freshly reserved slots are zero-filled; treat both encodings as empty.
            return Ok(Self::EMPTY);
        }
        if start < 0 || end < 0 {
            return Err(corrupt(index, "negative cluster pointer", start, end, size));
        }

        Ok(Self {
            size: size as u64,
            start_cluster: Some(start as u64),
            end_cluster: Some(end as u64),
        })
    }

    /// Both boundary clusters of a non-empty descriptor lie in `[0, total_clusters)`
    pub fn check_bounds(&self, index: u64, total_clusters: u64) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let in_range = |v: Option<u64>| v.is_some_and(|c| c < total_clusters);
        if !in_range(self.start_cluster) || !in_range(self.end_cluster) {
            let [start, end] = [self.start_cluster, self.end_cluster].map(opt_to_raw);
            return Err(corrupt(
                index,
                "cluster pointer out of range",
                start,
                end,
                self.size as i64,
            ));
        }
        Ok(())
    }
}

impl Default for StreamDescriptor {
    fn default() -> Self {
        Self::EMPTY
    }
}

fn opt_to_raw(value: Option<u64>) -> i64 {
    value.map(|v| v as i64).unwrap_or(NULL_POINTER)
}

fn get_i64(buf: &[u8], at: usize) -> i64 {
    i64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

fn corrupt(index: u64, what: &str, start: i64, end: i64, size: i64) -> ChainError {
    ChainError::CorruptData(format!(
        "directory record {}: {} (start={}, end={}, size={})",
        index, what, start, end, size
    ))
}
