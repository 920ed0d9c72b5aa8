//! Strongly-typed identifiers for staged data blocks.
//!
//! Every identifier reserves its all-ones bit pattern as the "undefined"
//! sentinel. A freshly minted page carries undefined ids until an equipment
//! reader fills them in from the wire header; undefined ids disable the
//! corresponding grouping dimension in the slicer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one readout link (one channel of front-end electronics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct LinkId(u16);

impl LinkId {
    /// Sentinel for "no link specified".
    pub const UNDEFINED: LinkId = LinkId(u16::MAX);

    /// Create a link ID from a raw value.
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Whether this is the undefined sentinel.
    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        self.0 == u16::MAX
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undefined() {
            write!(f, "link_undefined")
        } else {
            write!(f, "link_{}", self.0)
        }
    }
}

impl From<u16> for LinkId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

/// Identifier of a logical time window (timeframe).
///
/// Blocks within one link arrive timeframe-monotonic, so a change of
/// timeframe ID closes the link's current slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TimeframeId(u64);

impl TimeframeId {
    /// Sentinel for "no timeframe specified".
    pub const UNDEFINED: TimeframeId = TimeframeId(u64::MAX);

    /// Create a timeframe ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this is the undefined sentinel.
    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Display for TimeframeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undefined() {
            write!(f, "tf_undefined")
        } else {
            write!(f, "tf_{}", self.0)
        }
    }
}

impl From<u64> for TimeframeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identifier of the equipment (detector front-end) that produced a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EquipmentId(u16);

impl EquipmentId {
    /// Sentinel for "no equipment specified".
    pub const UNDEFINED: EquipmentId = EquipmentId(u16::MAX);

    /// Create an equipment ID from a raw value.
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Whether this is the undefined sentinel.
    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        self.0 == u16::MAX
    }
}

impl fmt::Display for EquipmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eq_{}", self.0)
    }
}

/// Monotonic identifier of one data block within an equipment stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BlockId(u64);

impl BlockId {
    /// Sentinel for "no block id assigned".
    pub const UNDEFINED: BlockId = BlockId(u64::MAX);

    /// Create a block ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this is the undefined sentinel.
    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block_{}", self.0)
    }
}
