//! Chain removal by tip migration
//!
//! Removing cluster `C` copies the highest-index cluster (the tip) into `C`,
//! repoints the tip's live neighbours at `C`, then cuts the tip off the
//! array. The array stays dense without a free list.
//!
//! Indices are positions, not identities: once the tip has been migrated,
//! every position the removal is still tracking (the next cluster to remove,
//! the surviving predecessor and successor) that named the tip must be
//! re-aliased to the slot it moved into.

use crate::error::{ChainError, Result};
use crate::format::{ClusterTraits, Link, Owner, NEXT_OFFSET, PREV_OFFSET};
use crate::store::BackingStore;

use super::map::{decode_traits, ClusterMap};

/// One tip migration performed during a removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterMove {
    /// Index the record lived at (the tip at the time)
    pub from: u64,
    /// Vacated slot it now occupies
    pub to: u64,
    /// Owner whose chain START moved, if the record was a START
    pub start_of: Option<Owner>,
    /// Owner whose chain END moved, if the record was an END
    pub end_of: Option<Owner>,
}

/// Outcome of a chain removal
#[derive(Debug, Clone, Default)]
pub struct ChainTrim {
    /// Tip migrations, in the order they happened
    pub moves: Vec<ClusterMove>,
    /// Surviving cluster before the removed run (final index)
    pub predecessor: Option<u64>,
    /// Surviving cluster after the removed run (final index)
    pub successor: Option<u64>,
}

impl<S: BackingStore> ClusterMap<S> {
    /// Remove `count` clusters starting at `from` and following `next`
    ///
    /// The survivors on either side are stitched back together; if the run
    /// reached a chain boundary the survivor becomes the new START or END.
    /// The whole run is validated before anything is mutated.
    pub fn remove_next_clusters(&mut self, from: u64, count: u64) -> Result<ChainTrim> {
        if count == 0 {
            return Err(ChainError::InvalidArgument(
                "cannot remove zero clusters".to_string(),
            ));
        }
        self.check_index(from)?;
        if count > self.total_clusters() {
            return Err(ChainError::InvalidArgument(format!(
                "cannot remove {} clusters, only {} exist",
                count,
                self.total_clusters()
            )));
        }

        // ---------------------------------------------------------------------
        // Validate the run and find its neighbours
        // ---------------------------------------------------------------------
        let first = self.read_cluster_header(from)?;
        let (mut predecessor, head_owner) = if first.traits.is_start() {
            (None, first.prev.owner())
        } else {
            (Some(self.expect_cluster(from, "prev", first.prev)?), None)
        };

        let mut last = from;
        let mut last_header = first;
        for step in 1..count {
            if last_header.traits.is_end() {
                return Err(ChainError::InvalidArgument(format!(
                    "chain from cluster {} ends after {} clusters, {} requested",
                    from, step, count
                )));
            }
            let next = self.expect_cluster(last, "next", last_header.next)?;
            if next == from {
                return Err(ChainError::CyclicChain { start: from, steps: step });
            }
            if self.integrity_checks {
                self.check_back_link(last, next)?;
            }
            last = next;
            last_header = self.read_cluster_header(next)?;
        }

        let (mut successor, tail_owner) = if last_header.traits.is_end() {
            (None, last_header.next.owner())
        } else {
            (Some(self.expect_cluster(last, "next", last_header.next)?), None)
        };

        let owner = match (head_owner, tail_owner) {
            (Some(head), Some(tail)) if head != tail => {
                return Err(ChainError::CorruptData(format!(
                    "chain from cluster {} starts as {:?} but ends as {:?}",
                    from, head, tail
                )));
            }
            (head, tail) => head.or(tail),
        };

        tracing::debug!(from, count, ?predecessor, ?successor, "Removing clusters");

        // ---------------------------------------------------------------------
        // Remove one position at a time
        // ---------------------------------------------------------------------
        let mut moves = Vec::new();
        let mut target = from;
        for removed in 0..count {
            let mut next_target = if removed + 1 < count {
                let link = self.read_next(target)?;
                Some(self.expect_cluster(target, "next", link)?)
            } else {
                None
            };

            if let Some(mv) = self.remove_one(target, predecessor)? {
                for tracked in [&mut next_target, &mut predecessor, &mut successor] {
                    if *tracked == Some(mv.from) {
                        *tracked = Some(mv.to);
                    }
                }
                moves.push(mv);
            }

            match next_target {
                Some(next) => target = next,
                None => break,
            }
        }

        // ---------------------------------------------------------------------
        // Stitch the survivors
        // ---------------------------------------------------------------------
        match (predecessor, successor) {
            (Some(pred), Some(succ)) => {
                self.write_next(pred, Link::Cluster(succ))?;
                self.write_prev(succ, Link::Cluster(pred))?;
            }
            (Some(pred), None) => {
                let owner = owner_or_corrupt(owner, pred)?;
                let mut traits = self.read_traits(pred)?;
                traits.insert(ClusterTraits::END);
                self.write_traits(pred, traits)?;
                self.write_next(pred, Link::Owner(owner))?;
            }
            (None, Some(succ)) => {
                let owner = owner_or_corrupt(owner, succ)?;
                let mut traits = self.read_traits(succ)?;
                traits.insert(ClusterTraits::START);
                self.write_traits(succ, traits)?;
                self.write_prev(succ, Link::Owner(owner))?;
            }
            (None, None) => {}
        }

        Ok(ChainTrim {
            moves,
            predecessor,
            successor,
        })
    }

    /// Remove `count` clusters ending at `last`, walking `prev`
    pub fn remove_backwards(&mut self, last: u64, count: u64) -> Result<ChainTrim> {
        if count == 0 {
            return Err(ChainError::InvalidArgument(
                "cannot remove zero clusters".to_string(),
            ));
        }
        self.check_index(last)?;
        if count > self.total_clusters() {
            return Err(ChainError::InvalidArgument(format!(
                "cannot remove {} clusters, only {} exist",
                count,
                self.total_clusters()
            )));
        }

        let mut first = last;
        for step in 1..count {
            let header = self.read_cluster_header(first)?;
            if header.traits.is_start() {
                return Err(ChainError::InvalidArgument(format!(
                    "chain ending at cluster {} starts after {} clusters, {} requested",
                    last, step, count
                )));
            }
            let prev = self.expect_cluster(first, "prev", header.prev)?;
            if prev == last {
                return Err(ChainError::CyclicChain { start: last, steps: step });
            }
            first = prev;
        }

        self.remove_next_clusters(first, count)
    }

    /// Remove the single position `target`, migrating the tip into it.
    ///
    /// `predecessor` is the survivor before the run being removed; its
    /// `next` already names a removed position and must not be followed.
    fn remove_one(&mut self, target: u64, predecessor: Option<u64>) -> Result<Option<ClusterMove>> {
        let tip = self.total_clusters() - 1;
        self.notify(|o| o.on_cluster_region_deleting(tip, 1));

        let moved = if target != tip {
            let mut record = vec![0u8; self.record_size as usize];
            self.read_at(self.record_offset(tip), &mut record)?;

            let traits = decode_traits(tip, record[0])?;
            let prev_raw = read_raw(&record, PREV_OFFSET as usize);
            let next_raw = read_raw(&record, NEXT_OFFSET as usize);

            if !traits.is_start() && prev_raw != target as i64 {
                let neighbour = self.live_neighbour(tip, "prev", prev_raw)?;
                self.write_next_raw(neighbour, target as i64)?;
            }
            if !traits.is_end() && next_raw != target as i64 && predecessor != Some(tip) {
                let neighbour = self.live_neighbour(tip, "next", next_raw)?;
                self.write_prev_raw(neighbour, target as i64)?;
            }

            self.notify(|o| o.on_cluster_region_saving(target, 1));
            self.write_at(self.record_offset(target), &record)?;

            tracing::trace!(from = tip, to = target, ?traits, "Migrated tip cluster");

            Some(ClusterMove {
                from: tip,
                to: target,
                start_of: if traits.is_start() { Owner::decode(prev_raw) } else { None },
                end_of: if traits.is_end() { Owner::decode(next_raw) } else { None },
            })
        } else {
            None
        };

        self.store.set_len(self.record_offset(tip))?;
        self.header.total_clusters -= 1;
        self.write_header()?;

        Ok(moved)
    }

    fn live_neighbour(&self, cluster: u64, field: &'static str, raw: i64) -> Result<u64> {
        if raw < 0 || raw as u64 >= self.total_clusters() || raw as u64 == cluster {
            return Err(ChainError::CorruptPointer {
                cluster,
                field,
                value: raw,
            });
        }
        Ok(raw as u64)
    }
}

fn read_raw(record: &[u8], at: usize) -> i64 {
    i64::from_le_bytes(record[at..at + 8].try_into().unwrap())
}

fn owner_or_corrupt(owner: Option<Owner>, cluster: u64) -> Result<Owner> {
    owner.ok_or_else(|| {
        ChainError::CorruptData(format!(
            "cannot find the owner of the chain containing cluster {}",
            cluster
        ))
    })
}
