//! Chain cursor
//!
//! Traversal state that survives between provider borrows: the last
//! visited (fragment, cluster) pair and, depending on the cache policy, a
//! two-way fragment ↔ cluster position map.

use std::collections::HashMap;

use crate::config::CachePolicy;

/// A fragment and the cluster that backs it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub fragment: u64,
    pub cluster: u64,
}

/// Cursor and position cache for one chain
#[derive(Debug, Clone)]
pub struct ChainCursor {
    policy: CachePolicy,
    current: Option<Position>,
    by_fragment: HashMap<u64, u64>,
    by_cluster: HashMap<u64, u64>,
}

impl ChainCursor {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            current: None,
            by_fragment: HashMap::new(),
            by_cluster: HashMap::new(),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Last position the provider stood on
    pub fn current(&self) -> Option<Position> {
        self.current
    }

    /// Number of cached positions
    pub fn cached(&self) -> usize {
        self.by_fragment.len()
    }

    pub(crate) fn lookup(&self, fragment: u64) -> Option<u64> {
        self.by_fragment.get(&fragment).copied()
    }

    pub(crate) fn set_current(&mut self, position: Position) {
        self.current = Some(position);
    }

    /// Record a discovered position (no-op under `CachePolicy::None`)
    pub(crate) fn remember(&mut self, position: Position) {
        if self.policy == CachePolicy::None {
            return;
        }
        if let Some(old_cluster) = self.by_fragment.insert(position.fragment, position.cluster) {
            if old_cluster != position.cluster {
                self.by_cluster.remove(&old_cluster);
            }
        }
        if let Some(old_fragment) = self.by_cluster.insert(position.cluster, position.fragment) {
            if old_fragment != position.fragment {
                self.by_fragment.remove(&old_fragment);
            }
        }
    }

    /// Forget everything that refers to `cluster`
    pub fn invalidate_cluster(&mut self, cluster: u64) {
        if let Some(fragment) = self.by_cluster.remove(&cluster) {
            self.by_fragment.remove(&fragment);
        }
        if self.current.map_or(false, |p| p.cluster == cluster) {
            self.current = None;
        }
    }

    /// Forget every position at or beyond `fragment_count`
    pub fn truncate(&mut self, fragment_count: u64) {
        let by_cluster = &mut self.by_cluster;
        self.by_fragment.retain(|&fragment, cluster| {
            let keep = fragment < fragment_count;
            if !keep {
                by_cluster.remove(cluster);
            }
            keep
        });
        if self.current.map_or(false, |p| p.fragment >= fragment_count) {
            self.current = None;
        }
    }

    /// Forget everything
    pub fn reset(&mut self) {
        self.current = None;
        self.by_fragment.clear();
        self.by_cluster.clear();
    }
}
