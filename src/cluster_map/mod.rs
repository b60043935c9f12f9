//! Cluster Map Module
//!
//! The allocator: a dense array of fixed-size clusters, each linked into
//! exactly one doubly-linked chain.
//!
//! ## Responsibilities
//! - Create chains and extend them at the tail
//! - Remove runs of clusters while keeping the array dense (tip migration)
//! - Single-field record accessors for hot paths
//! - Step-bounded traversal that fails instead of looping on a cycle
//!
//! ## Chain Shape
//! ```text
//!            START                               END
//!   owner ◄── [a] ◄──────► [b] ◄──────► [c] ──► owner
//!        prev      next/prev    next/prev    next
//! ```
//!
//! A single-cluster chain carries both START and END, and both of its links
//! hold the owner.

mod map;
mod removal;

pub use map::ClusterMap;
pub use removal::{ChainTrim, ClusterMove};
