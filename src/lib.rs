//! # chainstream
//!
//! Many independently resizable byte streams multiplexed over one backing
//! stream:
//! - Fixed-size clusters linked into doubly-linked chains, one per stream
//! - A dense cluster array kept free of holes by tip migration
//! - A directory of stream descriptors stored as a chain of its own
//! - Back-references from every chain to its directory slot
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StreamContainer                          │
//! │        (re-entrant lock, one open StreamHandle max)          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  Directory  │          │ StreamHandle│
//!   │ (listing)   │          │ (Read/Write)│
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          └───────────┬────────────┘
//!                      ▼
//!             ┌──────────────────┐
//!             │ FragmentProvider │
//!             │ (chain as bytes) │
//!             └────────┬─────────┘
//!                      ▼
//!             ┌──────────────────┐
//!             │    ClusterMap    │
//!             │   (allocator)    │
//!             └────────┬─────────┘
//!                      ▼
//!             ┌──────────────────┐
//!             │   BackingStore   │
//!             └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::io::{Cursor, Read, Write};
//! use chainstream::{Config, StreamContainer};
//!
//! let config = Config::builder().cluster_size(64).build();
//! let container = StreamContainer::create(Cursor::new(Vec::new()), config).unwrap();
//!
//! {
//!     let mut stream = container.add().unwrap();
//!     stream.write_all(b"hello").unwrap();
//! }
//!
//! let mut buf = String::new();
//! container.open_stream(0).unwrap().read_to_string(&mut buf).unwrap();
//! assert_eq!(buf, "hello");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod format;
pub mod store;
pub mod observer;
pub mod cluster_map;
pub mod fragment;
pub mod directory;
pub mod container;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ChainError, Result};
pub use config::{CachePolicy, Config};
pub use container::{AccessScope, IntegrityReport, StreamContainer, StreamHandle};
pub use format::{Owner, StreamDescriptor};
pub use observer::StorageObserver;
pub use store::BackingStore;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of chainstream
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
