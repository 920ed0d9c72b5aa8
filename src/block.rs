//! Staging block header and the reference-counted page container.
//!
//! Every page checked out of a [`PagePool`](crate::pool::PagePool) starts
//! with a fixed 48-byte [`BlockHeader`] that carries the ids the staging
//! layer groups on; the payload (typically an RDH plus detector data)
//! follows contiguously. The header is *ours*, written by the pool when a
//! page is wrapped and updated by the equipment reader, and is
//! distinct from the wire-format [RDH](crate::rdh) inside the payload, which
//! the staging layer treats as opaque bytes.

use crate::error::{Result, StageError};
use crate::pool::{PagePtr, PoolInner};
use crate::types::{BlockId, EquipmentId, LinkId, TimeframeId};
use byteorder::{ByteOrder, LittleEndian};
use std::sync::Arc;

/// Marker identifying a staging block header.
pub const BLOCK_TYPE_BASE: u32 = 0xB10C_0001;

/// Fixed size of the staging block header in bytes.
pub const BLOCK_HEADER_SIZE: usize = 48;

// Byte offsets of the header fields. The grouping keys get dedicated fast
// accessors on the container, so their offsets are named.
const OFFSET_BLOCK_TYPE: usize = 0;
const OFFSET_HEADER_SIZE: usize = 4;
const OFFSET_DATA_SIZE: usize = 8;
const OFFSET_BLOCK_ID: usize = 16;
const OFFSET_TIMEFRAME_ID: usize = 24;
const OFFSET_LINK_ID: usize = 32;
const OFFSET_EQUIPMENT_ID: usize = 34;

/// The staging preamble at offset 0 of every page.
///
/// Serialized little-endian; bytes 12..16 and 36..48 are reserved and
/// zeroed on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Header marker, always [`BLOCK_TYPE_BASE`].
    pub block_type: u32,
    /// Size of this header in bytes, always [`BLOCK_HEADER_SIZE`].
    pub header_size: u32,
    /// Number of valid payload bytes following the header.
    pub data_size: u32,
    /// Monotonic block number within the equipment stream.
    pub block_id: BlockId,
    /// Timeframe the block belongs to.
    pub timeframe_id: TimeframeId,
    /// Readout link the block arrived on.
    pub link_id: LinkId,
    /// Equipment that produced the block.
    pub equipment_id: EquipmentId,
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            block_type: BLOCK_TYPE_BASE,
            header_size: BLOCK_HEADER_SIZE as u32,
            data_size: 0,
            block_id: BlockId::UNDEFINED,
            timeframe_id: TimeframeId::UNDEFINED,
            link_id: LinkId::UNDEFINED,
            equipment_id: EquipmentId::UNDEFINED,
        }
    }
}

impl BlockHeader {
    /// The default header minted onto a freshly wrapped page: sentinel ids
    /// and a data size covering the whole region after the header.
    #[must_use]
    pub fn for_page(page_size: usize) -> Self {
        Self {
            data_size: (page_size - BLOCK_HEADER_SIZE) as u32,
            ..Self::default()
        }
    }

    /// Read and validate a header from a byte buffer.
    ///
    /// # Errors
    /// [`StageError::HeaderMalformed`] on a short buffer, a wrong block-type
    /// marker, or a wrong declared header size.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOCK_HEADER_SIZE {
            return Err(StageError::HeaderMalformed {
                cause: format!(
                    "buffer of {} bytes, block header needs {}",
                    bytes.len(),
                    BLOCK_HEADER_SIZE
                ),
            });
        }

        let header = Self::read_fields(bytes);
        header.validate()?;
        Ok(header)
    }

    /// Write this header into a byte buffer, zeroing the reserved bytes.
    ///
    /// # Errors
    /// [`StageError::HeaderMalformed`] when the buffer is too short.
    pub fn write_to(&self, bytes: &mut [u8]) -> Result<()> {
        if bytes.len() < BLOCK_HEADER_SIZE {
            return Err(StageError::HeaderMalformed {
                cause: format!(
                    "buffer of {} bytes, block header needs {}",
                    bytes.len(),
                    BLOCK_HEADER_SIZE
                ),
            });
        }

        bytes[..BLOCK_HEADER_SIZE].fill(0);
        LittleEndian::write_u32(&mut bytes[OFFSET_BLOCK_TYPE..], self.block_type);
        LittleEndian::write_u32(&mut bytes[OFFSET_HEADER_SIZE..], self.header_size);
        LittleEndian::write_u32(&mut bytes[OFFSET_DATA_SIZE..], self.data_size);
        LittleEndian::write_u64(&mut bytes[OFFSET_BLOCK_ID..], self.block_id.as_u64());
        LittleEndian::write_u64(&mut bytes[OFFSET_TIMEFRAME_ID..], self.timeframe_id.as_u64());
        LittleEndian::write_u16(&mut bytes[OFFSET_LINK_ID..], self.link_id.as_u16());
        LittleEndian::write_u16(&mut bytes[OFFSET_EQUIPMENT_ID..], self.equipment_id.as_u16());
        Ok(())
    }

    /// Check the marker and declared size.
    ///
    /// # Errors
    /// [`StageError::HeaderMalformed`] when either is wrong.
    pub fn validate(&self) -> Result<()> {
        if self.block_type != BLOCK_TYPE_BASE {
            return Err(StageError::HeaderMalformed {
                cause: format!("bad block type marker {:#x}", self.block_type),
            });
        }
        if self.header_size != BLOCK_HEADER_SIZE as u32 {
            return Err(StageError::HeaderMalformed {
                cause: format!("bad header size {}", self.header_size),
            });
        }
        Ok(())
    }

    fn read_fields(bytes: &[u8]) -> Self {
        Self {
            block_type: LittleEndian::read_u32(&bytes[OFFSET_BLOCK_TYPE..]),
            header_size: LittleEndian::read_u32(&bytes[OFFSET_HEADER_SIZE..]),
            data_size: LittleEndian::read_u32(&bytes[OFFSET_DATA_SIZE..]),
            block_id: BlockId::new(LittleEndian::read_u64(&bytes[OFFSET_BLOCK_ID..])),
            timeframe_id: TimeframeId::new(LittleEndian::read_u64(
                &bytes[OFFSET_TIMEFRAME_ID..],
            )),
            link_id: LinkId::new(LittleEndian::read_u16(&bytes[OFFSET_LINK_ID..])),
            equipment_id: EquipmentId::new(LittleEndian::read_u16(&bytes[OFFSET_EQUIPMENT_ID..])),
        }
    }
}

/// A checked-out page with exactly-once recycling.
///
/// The container holds the page address plus a handle on the originating
/// pool's internals; dropping the container returns the page to that pool's
/// free list. Share it across threads as a [`BlockRef`]: the `Arc` refcount
/// is the only cross-thread primitive a block ever needs, and the page
/// rides back to its pool from whichever thread drops the last reference.
///
/// Mutation (filling the payload, stamping ids) requires `&mut self`, so it
/// is only possible before the container goes behind an `Arc`.
pub struct BlockContainer {
    page: PagePtr,
    page_size: usize,
    pool: Arc<PoolInner>,
}

// SAFETY: the container has exclusive ownership of its page region for its
// whole lifetime (the pool hands each page to at most one container at a
// time), all `&self` accessors are read-only, and mutation requires
// `&mut self`.
unsafe impl Send for BlockContainer {}
unsafe impl Sync for BlockContainer {}

/// Reference-counted handle to a [`BlockContainer`], the element type of
/// every staging queue.
pub type BlockRef = Arc<BlockContainer>;

impl BlockContainer {
    /// Build a container around a page already checked out of `pool` and
    /// stamp the default header onto it.
    pub(crate) fn new(page: PagePtr, pool: Arc<PoolInner>) -> Self {
        let page_size = pool.page_size();
        let mut container = Self {
            page,
            page_size,
            pool,
        };
        container.set_header(&BlockHeader::for_page(page_size));
        container
    }

    /// The whole page as bytes, header included.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `page` points at `page_size` readable bytes owned by this
        // container; see the Send/Sync note above.
        unsafe { std::slice::from_raw_parts(self.page.as_ptr(), self.page_size) }
    }

    /// The whole page as mutable bytes, header included.
    #[must_use]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as `as_bytes`, plus `&mut self` guarantees uniqueness.
        unsafe { std::slice::from_raw_parts_mut(self.page.as_ptr(), self.page_size) }
    }

    /// Parse the full header.
    ///
    /// Field extraction only; the header was validated when the page was
    /// wrapped, and the grouping hot path uses [`link_id`](Self::link_id)
    /// and [`timeframe_id`](Self::timeframe_id) instead.
    #[must_use]
    pub fn header(&self) -> BlockHeader {
        BlockHeader::read_fields(self.as_bytes())
    }

    /// Overwrite the header.
    pub fn set_header(&mut self, header: &BlockHeader) {
        header
            .write_to(self.as_bytes_mut())
            .expect("page is larger than the block header by construction");
    }

    /// Read the link ID without parsing the rest of the header.
    #[must_use]
    pub fn link_id(&self) -> LinkId {
        LinkId::new(LittleEndian::read_u16(&self.as_bytes()[OFFSET_LINK_ID..]))
    }

    /// Read the timeframe ID without parsing the rest of the header.
    #[must_use]
    pub fn timeframe_id(&self) -> TimeframeId {
        TimeframeId::new(LittleEndian::read_u64(
            &self.as_bytes()[OFFSET_TIMEFRAME_ID..],
        ))
    }

    /// Stamp the link ID.
    pub fn set_link_id(&mut self, link_id: LinkId) {
        LittleEndian::write_u16(&mut self.as_bytes_mut()[OFFSET_LINK_ID..], link_id.as_u16());
    }

    /// Stamp the timeframe ID.
    pub fn set_timeframe_id(&mut self, timeframe_id: TimeframeId) {
        LittleEndian::write_u64(
            &mut self.as_bytes_mut()[OFFSET_TIMEFRAME_ID..],
            timeframe_id.as_u64(),
        );
    }

    /// Stamp the block ID.
    pub fn set_block_id(&mut self, block_id: BlockId) {
        LittleEndian::write_u64(&mut self.as_bytes_mut()[OFFSET_BLOCK_ID..], block_id.as_u64());
    }

    /// Stamp the equipment ID.
    pub fn set_equipment_id(&mut self, equipment_id: EquipmentId) {
        LittleEndian::write_u16(
            &mut self.as_bytes_mut()[OFFSET_EQUIPMENT_ID..],
            equipment_id.as_u16(),
        );
    }

    /// Record how many payload bytes are valid.
    pub fn set_data_size(&mut self, data_size: u32) {
        LittleEndian::write_u32(&mut self.as_bytes_mut()[OFFSET_DATA_SIZE..], data_size);
    }

    /// The valid payload bytes, as declared by the header's `data_size`
    /// (clamped to the page).
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let data_size = LittleEndian::read_u32(&self.as_bytes()[OFFSET_DATA_SIZE..]) as usize;
        let end = BLOCK_HEADER_SIZE + data_size.min(self.payload_capacity());
        &self.as_bytes()[BLOCK_HEADER_SIZE..end]
    }

    /// The whole writable payload region after the header.
    #[must_use]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.as_bytes_mut()[BLOCK_HEADER_SIZE..]
    }

    /// Bytes available for payload on this page.
    #[must_use]
    pub fn payload_capacity(&self) -> usize {
        self.page_size - BLOCK_HEADER_SIZE
    }

    /// Size of the underlying page in bytes.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// The underlying page handle.
    #[must_use]
    pub fn page(&self) -> PagePtr {
        self.page
    }
}

impl Drop for BlockContainer {
    fn drop(&mut self) {
        // The page came from this pool, so release can only fail on an
        // internal invariant violation; report it instead of panicking in
        // a destructor.
        if let Err(err) = self.pool.release_page(self.page) {
            tracing::error!(error = %err, "Failed to recycle page on container drop");
        }
    }
}

impl std::fmt::Debug for BlockContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockContainer")
            .field("page", &self.page)
            .field("page_size", &self.page_size)
            .field("link_id", &self.link_id())
            .field("timeframe_id", &self.timeframe_id())
            .finish()
    }
}
