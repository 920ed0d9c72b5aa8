//! Framestage: in-memory staging and aggregation for high-rate detector
//! readout.
//!
//! Fixed-size memory pages carrying raw detector blocks flow from
//! per-equipment input queues through a single aggregator that groups blocks
//! of the same timeframe into ordered slices on one output queue. Consumers
//! recycle each page back to its originating pool when done. These three
//! pieces set the latency floor of the readout path, the correctness of
//! timeframe boundaries, and the memory discipline that keeps pages from
//! leaking.
//!
//! # Key Components
//!
//! - **[`PagePool`]**: carves one pre-allocated base block into fixed-size
//!   pages and recirculates them through a lock-free free list
//! - **[`BlockContainer`]**: reference-counted page handle that recycles its
//!   page on drop
//! - **[`Slicer`]**: groups contiguous blocks into slices keyed by
//!   `(link, timeframe)`
//! - **[`Aggregator`]**: one worker thread multiplexing all inputs into the
//!   output queue, with staleness-driven flushing of incomplete slices
//! - **[`SpscFifo`]**: the bounded lock-free queue under every data path
//!
//! # Example
//!
//! ```
//! use framestage::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> framestage::Result<()> {
//! let pool = PagePool::with_capacity(PagePoolConfig::new(4096, 8))?;
//! let input = Arc::new(SpscFifo::with_capacity(8));
//! let output = Arc::new(SpscFifo::with_capacity(8));
//!
//! let aggregator = Aggregator::new(Arc::clone(&output), AggregatorConfig::default());
//! aggregator.add_input(Arc::clone(&input))?;
//! aggregator.start()?;
//!
//! // An equipment reader fills a page and queues it.
//! let mut block = pool.wrap().expect("pool has free pages");
//! block.set_link_id(LinkId::new(0));
//! block.set_timeframe_id(TimeframeId::new(1));
//! input.push(Arc::new(block)).ok();
//!
//! aggregator.request_flush();
//! aggregator.stop(true);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregator;
pub mod block;
pub mod error;
pub mod fifo;
pub mod pool;
pub mod prelude;
pub mod rdh;
pub mod slicer;
pub mod types;

// Re-export key types at crate root for convenience
pub use aggregator::{Aggregator, AggregatorConfig, TickOutcome};
pub use block::{BlockContainer, BlockHeader, BlockRef, BLOCK_HEADER_SIZE};
pub use error::{Result, StageError};
pub use fifo::SpscFifo;
pub use pool::{PagePool, PagePoolConfig, PagePtr};
pub use rdh::{Rdh, RdhV2, RdhV3, RdhV4};
pub use slicer::{Slice, Slicer};
pub use types::{BlockId, EquipmentId, LinkId, TimeframeId};
