//! Shared helpers for integration tests.

#![allow(dead_code)]

use framestage::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Initialize test logging once. `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .init();
    });
}

/// A small pool for block-shuffling tests.
pub fn test_pool(page_size: usize, num_pages: usize) -> PagePool {
    PagePool::with_capacity(PagePoolConfig::new(page_size, num_pages))
        .expect("test pool configuration is valid")
}

/// Wrap a page and stamp the grouping ids.
pub fn make_block(pool: &PagePool, link: u16, tf: u64) -> BlockRef {
    let mut container = pool.wrap().expect("test pool has free pages");
    container.set_link_id(LinkId::new(link));
    container.set_timeframe_id(TimeframeId::new(tf));
    Arc::new(container)
}

/// Wrap a page, stamp ids and a per-block sequence number.
pub fn make_numbered_block(pool: &PagePool, link: u16, tf: u64, seq: u64) -> BlockRef {
    let mut container = pool.wrap().expect("test pool has free pages");
    container.set_link_id(LinkId::new(link));
    container.set_timeframe_id(TimeframeId::new(tf));
    container.set_block_id(BlockId::new(seq));
    Arc::new(container)
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
