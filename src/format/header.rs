//! Container header
//!
//! Fixed 256-byte region at offset 0. Validated eagerly on load.

use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};

use super::{
    required_len, DESCRIPTOR_SIZE, FORMAT_VERSION, HEADER_SIZE, MAX_CLUSTER_SIZE, NULL_POINTER,
};

const VERSION_AT: usize = 0;
const CLUSTER_SIZE_AT: usize = 1;
const TOTAL_CLUSTERS_AT: usize = 5;
const STREAM_COUNT_AT: usize = 13;
const DIRECTORY_CAPACITY_AT: usize = 21;
const DIRECTORY_START_AT: usize = 29;
const DIRECTORY_END_AT: usize = 37;
const CHECKSUM_AT: usize = HEADER_SIZE as usize - 4;

/// Decoded container header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Format version
    pub version: u8,
    /// Data bytes per cluster
    pub cluster_size: u32,
    /// Number of cluster records physically present
    pub total_clusters: u64,
    /// Number of logical streams (live directory records)
    pub stream_count: u64,
    /// Number of directory records the directory chain can hold
    pub directory_capacity: u64,
    /// First cluster of the directory chain
    pub directory_start: Option<u64>,
    /// Last cluster of the directory chain
    pub directory_end: Option<u64>,
}

impl Header {
    /// Header of an empty container
    pub fn new(cluster_size: u32) -> Self {
        Self {
            version: FORMAT_VERSION,
            cluster_size,
            total_clusters: 0,
            stream_count: 0,
            directory_capacity: 0,
            directory_start: None,
            directory_end: None,
        }
    }

    /// Serialize to the fixed on-disk layout, checksum included
    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[VERSION_AT] = self.version;
        put_i32(&mut buf, CLUSTER_SIZE_AT, self.cluster_size as i32);
        put_i64(&mut buf, TOTAL_CLUSTERS_AT, self.total_clusters as i64);
        put_i64(&mut buf, STREAM_COUNT_AT, self.stream_count as i64);
        put_i64(&mut buf, DIRECTORY_CAPACITY_AT, self.directory_capacity as i64);
        put_i64(&mut buf, DIRECTORY_START_AT, encode_opt(self.directory_start));
        put_i64(&mut buf, DIRECTORY_END_AT, encode_opt(self.directory_end));

        let crc = crc32fast::hash(&buf[..CHECKSUM_AT]);
        buf[CHECKSUM_AT..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parse and validate the header fields (not the store length)
    pub fn decode(buf: &[u8; HEADER_SIZE as usize]) -> Result<Self> {
        let stored_crc = u32::from_le_bytes(buf[CHECKSUM_AT..].try_into().unwrap());
        let actual_crc = crc32fast::hash(&buf[..CHECKSUM_AT]);
        if stored_crc != actual_crc {
            return Err(ChainError::CorruptHeader(format!(
                "checksum mismatch: expected {:#010x}, got {:#010x}",
                stored_crc, actual_crc
            )));
        }

        let version = buf[VERSION_AT];
        if version != FORMAT_VERSION {
            return Err(ChainError::CorruptHeader(format!(
                "unsupported version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }

        let cluster_size = get_i32(buf, CLUSTER_SIZE_AT);
        if cluster_size <= 0 || cluster_size as u32 > MAX_CLUSTER_SIZE {
            return Err(ChainError::CorruptHeader(format!(
                "cluster size {} outside 1..={}",
                cluster_size, MAX_CLUSTER_SIZE
            )));
        }

        let total_clusters = non_negative(buf, TOTAL_CLUSTERS_AT, "total clusters")?;
        let stream_count = non_negative(buf, STREAM_COUNT_AT, "stream count")?;
        let directory_capacity = non_negative(buf, DIRECTORY_CAPACITY_AT, "directory capacity")?;

        if required_len(cluster_size as u32, total_clusters).is_none() {
            return Err(ChainError::CorruptHeader(format!(
                "total clusters {} overflow the store length",
                total_clusters
            )));
        }
        if directory_capacity.checked_mul(DESCRIPTOR_SIZE).is_none() {
            return Err(ChainError::CorruptHeader(format!(
                "directory capacity {} overflows the directory length",
                directory_capacity
            )));
        }

        if stream_count > directory_capacity {
            return Err(ChainError::CorruptHeader(format!(
                "stream count {} exceeds directory capacity {}",
                stream_count, directory_capacity
            )));
        }

        let directory_start =
            decode_opt(buf, DIRECTORY_START_AT, total_clusters, "directory start")?;
        let directory_end = decode_opt(buf, DIRECTORY_END_AT, total_clusters, "directory end")?;

        let has_chain = directory_start.is_some() && directory_end.is_some();
        let no_chain = directory_start.is_none() && directory_end.is_none();
        if (directory_capacity > 0 && !has_chain) || (directory_capacity == 0 && !no_chain) {
            return Err(ChainError::CorruptHeader(format!(
                "directory chain ({:?}, {:?}) inconsistent with capacity {}",
                directory_start, directory_end, directory_capacity
            )));
        }

        Ok(Self {
            version,
            cluster_size: cluster_size as u32,
            total_clusters,
            stream_count,
            directory_capacity,
            directory_start,
            directory_end,
        })
    }

    /// Check that a backing store of `store_len` bytes can hold everything
    /// this header describes
    pub fn validate(&self, store_len: u64) -> Result<()> {
        let required = self.required_len();
        if store_len < required {
            return Err(ChainError::CorruptHeader(format!(
                "backing store is {} bytes, header requires at least {}",
                store_len, required
            )));
        }
        Ok(())
    }

    /// Minimum backing store length for this header, saturating at
    /// `u64::MAX` when it cannot be represented
    pub fn required_len(&self) -> u64 {
        required_len(self.cluster_size, self.total_clusters).unwrap_or(u64::MAX)
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn put_i32(buf: &mut [u8], at: usize, value: i32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_i64(buf: &mut [u8], at: usize, value: i64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn get_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

fn get_i64(buf: &[u8], at: usize) -> i64 {
    i64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

fn encode_opt(value: Option<u64>) -> i64 {
    value.map(|v| v as i64).unwrap_or(NULL_POINTER)
}

fn non_negative(buf: &[u8], at: usize, what: &str) -> Result<u64> {
    let value = get_i64(buf, at);
    if value < 0 {
        return Err(ChainError::CorruptHeader(format!("{} is negative ({})", what, value)));
    }
    Ok(value as u64)
}

fn decode_opt(buf: &[u8], at: usize, total_clusters: u64, what: &str) -> Result<Option<u64>> {
    match get_i64(buf, at) {
        NULL_POINTER => Ok(None),
        v if v >= 0 && (v as u64) < total_clusters => Ok(Some(v as u64)),
        v => Err(ChainError::CorruptHeader(format!(
            "{} {} outside [0, {})",
            what, v, total_clusters
        ))),
    }
}
