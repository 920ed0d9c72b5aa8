//! Fixed-size memory page pool.
//!
//! A [`PagePool`] carves one pre-allocated base block into `num_pages`
//! contiguous pages of `page_size` bytes and recirculates them through a
//! lock-free free list. Pages leave the pool either raw (via
//! [`acquire`](PagePool::acquire)) or wrapped in a
//! [`BlockContainer`](crate::block::BlockContainer) whose drop returns the
//! page automatically.
//!
//! The free list is single-producer/single-consumer: one thread may acquire
//! while another releases without any locking, which is exactly the shape of
//! a readout path (equipment reader checks pages out, downstream consumer
//! recycles them). Two concurrent acquirers or two concurrent releasers need
//! external mutual exclusion.

use crate::block::{BlockContainer, BLOCK_HEADER_SIZE};
use crate::error::{Result, StageError};
use crate::fifo::SpscFifo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Callback releasing the base block, invoked exactly once when the pool and
/// every container it ever minted are gone.
pub type ReleaseFn = Box<dyn FnOnce(NonNull<u8>) + Send>;

/// Configuration for a page pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagePoolConfig {
    /// Bytes per page.
    pub page_size: usize,
    /// Pages in the pool. May be silently reduced to fit the base block.
    pub num_pages: usize,
    /// Byte offset of the first page inside the base block, for alignment
    /// control. Pages are contiguous from this point.
    pub first_page_offset: usize,
}

impl Default for PagePoolConfig {
    fn default() -> Self {
        Self {
            page_size: 1024 * 1024,
            num_pages: 128,
            first_page_offset: 0,
        }
    }
}

impl PagePoolConfig {
    /// Create a configuration with the given page geometry.
    #[must_use]
    pub fn new(page_size: usize, num_pages: usize) -> Self {
        Self {
            page_size,
            num_pages,
            first_page_offset: 0,
        }
    }

    /// Set the offset of the first page inside the base block.
    #[must_use]
    pub fn with_first_page_offset(mut self, offset: usize) -> Self {
        self.first_page_offset = offset;
        self
    }
}

/// Handle to one page of a pool.
///
/// A plain address capability: copying it does not duplicate the page, and
/// only its owning pool can judge its validity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PagePtr(NonNull<u8>);

// SAFETY: a PagePtr is only an address; the memory behind it is owned by the
// pool's base block, and exclusive access is arbitrated by the pool's free
// list and container handout, not by this handle.
unsafe impl Send for PagePtr {}
unsafe impl Sync for PagePtr {}

impl PagePtr {
    /// Wrap a raw page address.
    #[must_use]
    pub fn new(ptr: NonNull<u8>) -> Self {
        Self(ptr)
    }

    /// The raw page address.
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.0.as_ptr()
    }

    fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl fmt::Debug for PagePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PagePtr({:#x})", self.addr())
    }
}

/// Shared pool internals.
///
/// Containers hold an `Arc` of this, so the base block (and its release
/// callback) cannot disappear while any page is still checked out.
pub(crate) struct PoolInner {
    page_size: usize,
    num_pages: usize,
    base: NonNull<u8>,
    base_size: usize,
    first_page: usize,
    last_page: usize,
    free: SpscFifo<PagePtr>,
    /// Backing storage when the pool allocated its own base block.
    _owned: Option<Box<[u8]>>,
    /// User callback for an externally provided base block. Taken exactly
    /// once, in `Drop`.
    release: Mutex<Option<ReleaseFn>>,
}

// SAFETY: the raw base pointer is either owned storage or an external block
// the caller contractually keeps alive (see `PagePool::from_raw`); page
// regions are handed to at most one holder at a time through the SPSC free
// list, which provides the necessary synchronization.
unsafe impl Send for PoolInner {}
unsafe impl Sync for PoolInner {}

impl PoolInner {
    fn build(
        config: &PagePoolConfig,
        base: NonNull<u8>,
        base_size: usize,
        owned: Option<Box<[u8]>>,
        release: Option<ReleaseFn>,
    ) -> Result<Self> {
        if config.page_size == 0 {
            return Err(StageError::PoolConfig {
                cause: "page_size is zero".to_string(),
            });
        }
        if config.page_size < BLOCK_HEADER_SIZE {
            return Err(StageError::PoolConfig {
                cause: format!(
                    "page_size {} is smaller than the {}-byte block header",
                    config.page_size, BLOCK_HEADER_SIZE
                ),
            });
        }
        if config.num_pages == 0 {
            return Err(StageError::PoolConfig {
                cause: "num_pages is zero".to_string(),
            });
        }

        // A zero base size means "assume the pages fit".
        let base_size = if base_size == 0 {
            config.page_size * config.num_pages
        } else {
            base_size
        };
        if config.first_page_offset >= base_size {
            return Err(StageError::PoolConfig {
                cause: format!(
                    "first_page_offset {} is outside the {}-byte base block",
                    config.first_page_offset, base_size
                ),
            });
        }

        // Never overrun the base block: shrink the page count to what fits.
        let mut num_pages = config.num_pages;
        let size_needed = config.page_size * num_pages + config.first_page_offset;
        if size_needed > base_size {
            num_pages = (base_size - config.first_page_offset) / config.page_size;
            if num_pages == 0 {
                return Err(StageError::PoolConfig {
                    cause: format!(
                        "no page of {} bytes fits after offset {} in a {}-byte base block",
                        config.page_size, config.first_page_offset, base_size
                    ),
                });
            }
            tracing::warn!(
                requested = config.num_pages,
                effective = num_pages,
                "Reduced page count to fit base block"
            );
        }

        let free = SpscFifo::with_capacity(num_pages);
        let first_page = base.as_ptr() as usize + config.first_page_offset;
        let mut last_page = first_page;
        for i in 0..num_pages {
            let addr = first_page + i * config.page_size;
            // SAFETY: addr lies within the base block (checked above) and is
            // therefore non-null.
            let page = PagePtr::new(unsafe { NonNull::new_unchecked(addr as *mut u8) });
            free.push(page)
                .expect("free list sized to hold every page");
            last_page = addr;
        }

        Ok(Self {
            page_size: config.page_size,
            num_pages,
            base,
            base_size,
            first_page,
            last_page,
            free,
            _owned: owned,
            release: Mutex::new(release),
        })
    }

    pub(crate) fn page_size(&self) -> usize {
        self.page_size
    }

    fn acquire_page(&self) -> Option<PagePtr> {
        self.free.pop()
    }

    pub(crate) fn release_page(&self, page: PagePtr) -> Result<()> {
        self.check_page(page)?;
        self.free.push(page).map_err(|_| StageError::PageInvalid {
            address: page.addr(),
            cause: "free list full, page released more than once".to_string(),
        })
    }

    fn is_valid(&self, page: PagePtr) -> bool {
        let addr = page.addr();
        addr >= self.first_page
            && addr <= self.last_page
            && (addr - self.first_page) % self.page_size == 0
    }

    fn check_page(&self, page: PagePtr) -> Result<()> {
        if self.is_valid(page) {
            Ok(())
        } else {
            Err(StageError::PageInvalid {
                address: page.addr(),
                cause: format!(
                    "not on the page grid [{:#x}, {:#x}] step {}",
                    self.first_page, self.last_page, self.page_size
                ),
            })
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(release) = self.release.lock().take() {
            release(self.base);
        }
    }
}

/// A pool of fixed-size memory pages carved from one base block.
///
/// Cloning the pool handle is cheap and shares the same pages. See the
/// module docs for the concurrency contract on `acquire`/`release`.
#[derive(Clone)]
pub struct PagePool {
    inner: Arc<PoolInner>,
}

impl PagePool {
    /// Create a pool backed by an internally allocated base block.
    ///
    /// # Errors
    /// [`StageError::PoolConfig`] on a zero `page_size`/`num_pages`, a page
    /// smaller than the block header, or an offset that leaves no room for a
    /// single page.
    pub fn with_capacity(config: PagePoolConfig) -> Result<Self> {
        let base_size = config.first_page_offset + config.page_size * config.num_pages;
        let mut owned = vec![0u8; base_size].into_boxed_slice();
        // SAFETY: a boxed slice allocation is never null.
        let base = unsafe { NonNull::new_unchecked(owned.as_mut_ptr()) };

        let inner = PoolInner::build(&config, base, base_size, Some(owned), None)?;
        tracing::info!(
            page_size = inner.page_size,
            num_pages = inner.num_pages,
            base_size = inner.base_size,
            "Created page pool"
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Create a pool over a caller-provided base block.
    ///
    /// `base_size == 0` means "assume `page_size * num_pages` bytes are
    /// available" (the `first_page_offset` then eats into the page budget).
    /// The optional `release` callback is invoked with the base address
    /// exactly once, when the pool handle and every container it ever minted
    /// have been dropped.
    ///
    /// # Safety
    /// `base` must be valid for reads and writes of `base_size` bytes (or
    /// `page_size * num_pages` when `base_size` is 0) and must not be
    /// accessed elsewhere until the release callback runs (or, without a
    /// callback, until pool and containers are gone).
    ///
    /// # Errors
    /// [`StageError::PoolConfig`] under the same conditions as
    /// [`with_capacity`](Self::with_capacity), plus an offset at or past the
    /// end of the base block.
    pub unsafe fn from_raw(
        config: PagePoolConfig,
        base: NonNull<u8>,
        base_size: usize,
        release: Option<ReleaseFn>,
    ) -> Result<Self> {
        let inner = PoolInner::build(&config, base, base_size, None, release)?;
        tracing::info!(
            page_size = inner.page_size,
            num_pages = inner.num_pages,
            base_size = inner.base_size,
            "Created page pool over external base block"
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Check out a page, or `None` when the pool is exhausted.
    ///
    /// Non-blocking; exhaustion is an expected condition the caller handles.
    #[must_use]
    pub fn acquire(&self) -> Option<PagePtr> {
        self.inner.acquire_page()
    }

    /// Return a previously acquired page.
    ///
    /// # Errors
    /// [`StageError::PageInvalid`] when the address is outside this pool or
    /// off the page grid. That is a caller bug, not a data condition.
    pub fn release(&self, page: PagePtr) -> Result<()> {
        self.inner.release_page(page)
    }

    /// Check out a page and wrap it in a container carrying the default
    /// header (sentinel ids, full-page data size). `None` when exhausted.
    #[must_use]
    pub fn wrap(&self) -> Option<BlockContainer> {
        let page = self.inner.acquire_page()?;
        Some(BlockContainer::new(page, Arc::clone(&self.inner)))
    }

    /// Wrap a page the caller already acquired from this pool.
    ///
    /// # Errors
    /// [`StageError::PageInvalid`] when the page does not belong to this
    /// pool.
    pub fn wrap_page(&self, page: PagePtr) -> Result<BlockContainer> {
        self.inner.check_page(page)?;
        Ok(BlockContainer::new(page, Arc::clone(&self.inner)))
    }

    /// Whether an address is a legal page of this pool.
    #[must_use]
    pub fn is_valid(&self, page: PagePtr) -> bool {
        self.inner.is_valid(page)
    }

    /// Bytes per page.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    /// Total pages in the pool (after any fit reduction).
    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.inner.num_pages
    }

    /// Pages currently in the free list.
    #[must_use]
    pub fn available_pages(&self) -> usize {
        self.inner.free.len()
    }

    /// Pages currently checked out.
    #[must_use]
    pub fn checked_out_pages(&self) -> usize {
        self.inner.num_pages - self.inner.free.len()
    }

    /// Base address of the block the pages are carved from.
    #[must_use]
    pub fn base_address(&self) -> NonNull<u8> {
        self.inner.base
    }

    /// Size of the base block in bytes. All pages lie within it.
    #[must_use]
    pub fn base_size(&self) -> usize {
        self.inner.base_size
    }
}

impl fmt::Debug for PagePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagePool")
            .field("page_size", &self.inner.page_size)
            .field("num_pages", &self.inner.num_pages)
            .field("available", &self.available_pages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pool_over(base: &mut [u8], config: PagePoolConfig) -> PagePool {
        let ptr = NonNull::new(base.as_mut_ptr()).unwrap();
        // SAFETY: the base slice outlives the pool in every test here.
        unsafe { PagePool::from_raw(config, ptr, base.len(), None) }.unwrap()
    }

    #[test]
    fn acquire_until_exhausted_then_recycle() {
        let mut base = vec![0u8; 16384];
        let pool = pool_over(&mut base, PagePoolConfig::new(4096, 4));

        let pages: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        assert!(pool.acquire().is_none());

        let distinct: HashSet<usize> = pages.iter().map(|p| p.as_ptr() as usize).collect();
        assert_eq!(distinct.len(), 4);
        for page in &pages {
            assert!(pool.is_valid(*page));
            assert_eq!((page.as_ptr() as usize - base.as_ptr() as usize) % 4096, 0);
        }

        for page in pages {
            pool.release(page).unwrap();
        }
        for _ in 0..4 {
            assert!(pool.acquire().is_some());
        }
    }

    #[test]
    fn page_count_reduced_by_offset() {
        let mut base = vec![0u8; 16384];
        let config = PagePoolConfig::new(4096, 4).with_first_page_offset(8192);
        let pool = pool_over(&mut base, config);

        assert_eq!(pool.total_pages(), 2);
        assert_eq!(pool.available_pages(), 2);
        assert_eq!(pool.base_size(), 16384);
    }

    #[test]
    fn zero_base_size_assumes_pages_fit() {
        let mut base = vec![0u8; 16384];
        let ptr = NonNull::new(base.as_mut_ptr()).unwrap();
        let pool =
            unsafe { PagePool::from_raw(PagePoolConfig::new(4096, 4), ptr, 0, None) }.unwrap();

        assert_eq!(pool.total_pages(), 4);
        assert_eq!(pool.base_size(), 16384);
    }

    #[test]
    fn construction_rejects_bad_parameters() {
        let mut base = vec![0u8; 4096];
        let ptr = NonNull::new(base.as_mut_ptr()).unwrap();

        let err = unsafe { PagePool::from_raw(PagePoolConfig::new(0, 4), ptr, 4096, None) }
            .unwrap_err();
        assert_eq!(err.code(), "E001");

        let err = unsafe { PagePool::from_raw(PagePoolConfig::new(4096, 0), ptr, 4096, None) }
            .unwrap_err();
        assert_eq!(err.code(), "E001");

        let config = PagePoolConfig::new(4096, 1).with_first_page_offset(4096);
        let err = unsafe { PagePool::from_raw(config, ptr, 4096, None) }.unwrap_err();
        assert_eq!(err.code(), "E001");

        // Offset leaves no room for a single page.
        let config = PagePoolConfig::new(4096, 1).with_first_page_offset(100);
        let err = unsafe { PagePool::from_raw(config, ptr, 4096, None) }.unwrap_err();
        assert_eq!(err.code(), "E001");
    }

    #[test]
    fn release_rejects_foreign_and_misaligned_pages() {
        let mut base_a = vec![0u8; 8192];
        let mut base_b = vec![0u8; 8192];
        let pool_a = pool_over(&mut base_a, PagePoolConfig::new(4096, 2));
        let pool_b = pool_over(&mut base_b, PagePoolConfig::new(4096, 2));

        let foreign = pool_b.acquire().unwrap();
        let err = pool_a.release(foreign).unwrap_err();
        assert_eq!(err.code(), "E002");

        let page = pool_a.acquire().unwrap();
        let misaligned =
            PagePtr::new(NonNull::new(unsafe { page.as_ptr().add(1) }).unwrap());
        assert!(!pool_a.is_valid(misaligned));
        let err = pool_a.release(misaligned).unwrap_err();
        assert_eq!(err.code(), "E002");

        pool_a.release(page).unwrap();
        let err = pool_b.wrap_page(page).unwrap_err();
        assert_eq!(err.code(), "E002");
    }

    #[test]
    fn wrap_writes_default_header() {
        let pool = PagePool::with_capacity(PagePoolConfig::new(4096, 2)).unwrap();

        let container = pool.wrap().unwrap();
        let header = container.header();
        assert!(header.link_id.is_undefined());
        assert!(header.timeframe_id.is_undefined());
        assert!(header.block_id.is_undefined());
        assert!(header.equipment_id.is_undefined());
        assert_eq!(header.data_size as usize, 4096 - BLOCK_HEADER_SIZE);
        assert_eq!(container.payload_capacity(), 4096 - BLOCK_HEADER_SIZE);
    }

    #[test]
    fn page_conservation_holds() {
        let pool = PagePool::with_capacity(PagePoolConfig::new(4096, 4)).unwrap();
        assert_eq!(pool.available_pages() + pool.checked_out_pages(), 4);

        let a = pool.wrap().unwrap();
        let _b = pool.acquire().unwrap();
        assert_eq!(pool.available_pages(), 2);
        assert_eq!(pool.checked_out_pages(), 2);
        assert_eq!(pool.available_pages() + pool.checked_out_pages(), 4);

        drop(a);
        assert_eq!(pool.available_pages(), 3);
    }

    #[test]
    fn container_drop_returns_same_page() {
        let pool = PagePool::with_capacity(PagePoolConfig::new(4096, 1)).unwrap();

        let container = pool.wrap().unwrap();
        let addr = container.page().as_ptr() as usize;
        assert!(pool.wrap().is_none());

        drop(container);
        let container = pool.wrap().unwrap();
        assert_eq!(container.page().as_ptr() as usize, addr);
    }
}
