//! Convenience re-exports for the common staging workflow.
//!
//! ```
//! use framestage::prelude::*;
//! ```

pub use crate::aggregator::{Aggregator, AggregatorConfig, TickOutcome};
pub use crate::block::{BlockContainer, BlockHeader, BlockRef};
pub use crate::error::{Result, StageError};
pub use crate::fifo::SpscFifo;
pub use crate::pool::{PagePool, PagePoolConfig, PagePtr};
pub use crate::rdh::{Rdh, RdhV4};
pub use crate::slicer::{Slice, Slicer};
pub use crate::types::{BlockId, EquipmentId, LinkId, TimeframeId};
