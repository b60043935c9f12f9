//! Cluster records
//!
//! A cluster is `traits | prev | next | data`. At chain boundaries the
//! `prev` (START) and `next` (END) fields hold the owning stream instead of
//! a neighbour, so links are decoded into [`Link`] using the traits byte.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};

use super::{DIRECTORY_OWNER, NULL_POINTER};

// =============================================================================
// Traits
// =============================================================================

/// Bitset of boundary markers carried by a cluster
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ClusterTraits(u8);

impl ClusterTraits {
    pub const NONE: ClusterTraits = ClusterTraits(0);
    pub const START: ClusterTraits = ClusterTraits(1);
    pub const END: ClusterTraits = ClusterTraits(2);

    const ALL: u8 = 0b11;

    /// Parse a traits byte, rejecting unknown bits
    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL == 0 {
            Some(ClusterTraits(bits))
        } else {
            None
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: ClusterTraits) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ClusterTraits) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ClusterTraits) {
        self.0 &= !other.0;
    }

    pub fn is_start(self) -> bool {
        self.contains(Self::START)
    }

    pub fn is_end(self) -> bool {
        self.contains(Self::END)
    }
}

impl BitOr for ClusterTraits {
    type Output = ClusterTraits;

    fn bitor(self, rhs: Self) -> Self::Output {
        ClusterTraits(self.0 | rhs.0)
    }
}

impl fmt::Debug for ClusterTraits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_start(), self.is_end()) {
            (false, false) => write!(f, "NONE"),
            (true, false) => write!(f, "START"),
            (false, true) => write!(f, "END"),
            (true, true) => write!(f, "START | END"),
        }
    }
}

// =============================================================================
// Links
// =============================================================================

/// Who a chain belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Owner {
    /// The directory's own bootstrap chain
    Directory,
    /// A logical stream, by directory index
    Stream(u64),
}

impl Owner {
    pub fn encode(self) -> i64 {
        match self {
            Owner::Directory => DIRECTORY_OWNER,
            Owner::Stream(index) => index as i64,
        }
    }

    pub fn decode(raw: i64) -> Option<Self> {
        match raw {
            DIRECTORY_OWNER => Some(Owner::Directory),
            r if r >= 0 => Some(Owner::Stream(r as u64)),
            _ => None,
        }
    }
}

/// Decoded `prev`/`next` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Link {
    /// No link
    Null,
    /// Neighbouring cluster index
    Cluster(u64),
    /// Owning stream (only at a START `prev` or END `next`)
    Owner(Owner),
}

impl Link {
    /// Raw on-disk value
    pub fn encode(self) -> i64 {
        match self {
            Link::Null => NULL_POINTER,
            Link::Cluster(index) => index as i64,
            Link::Owner(owner) => owner.encode(),
        }
    }

    /// Decode a raw field of `cluster`. `boundary` says whether the cluster
    /// carries the trait (START for prev, END for next) that turns this
    /// field into an owner sentinel.
    pub fn decode(
        raw: i64,
        boundary: bool,
        cluster: u64,
        field: &'static str,
        total_clusters: u64,
    ) -> Result<Self> {
        let corrupt = || ChainError::CorruptPointer {
            cluster,
            field,
            value: raw,
        };

        if boundary {
            return Owner::decode(raw).map(Link::Owner).ok_or_else(corrupt);
        }

        match raw {
            NULL_POINTER => Ok(Link::Null),
            r if r >= 0 && (r as u64) < total_clusters && r as u64 != cluster => {
                Ok(Link::Cluster(r as u64))
            }
            _ => Err(corrupt()),
        }
    }

    pub fn cluster(self) -> Option<u64> {
        match self {
            Link::Cluster(index) => Some(index),
            _ => None,
        }
    }

    pub fn owner(self) -> Option<Owner> {
        match self {
            Link::Owner(owner) => Some(owner),
            _ => None,
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// Cluster envelope without its data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterHeader {
    pub traits: ClusterTraits,
    pub prev: Link,
    pub next: Link,
}

/// A full cluster record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub traits: ClusterTraits,
    pub prev: Link,
    pub next: Link,
    pub data: Vec<u8>,
}

impl Cluster {
    pub fn header(&self) -> ClusterHeader {
        ClusterHeader {
            traits: self.traits,
            prev: self.prev,
            next: self.next,
        }
    }
}
