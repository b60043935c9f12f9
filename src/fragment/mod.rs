//! Fragment Module
//!
//! Views a cluster chain as an ordered list of fragments: fragment `i` is
//! the data of the `i`-th cluster from the chain START. The last fragment
//! holds `size - i * cluster_size` valid bytes; the rest of its cluster is
//! zero.
//!
//! ```text
//!   bytes:     [0 ........ cs) [cs ...... 2cs) [2cs .. size)
//!   fragment:        0               1               2
//!   cluster:        17               4               9
//! ```
//!
//! Fragment → cluster resolution walks from the nearest known point and
//! caches what it finds according to [`CachePolicy`](crate::config::CachePolicy).

mod cursor;
mod provider;

pub use cursor::{ChainCursor, Position};
pub use provider::FragmentProvider;
