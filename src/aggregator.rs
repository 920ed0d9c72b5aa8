//! Single-worker aggregation of equipment inputs into timeframe slices.
//!
//! One [`Aggregator`] owns one worker thread that multiplexes any number of
//! input queues (one per equipment, each with a dedicated [`Slicer`]) into
//! a single output queue of [`Slice`]s. The worker only ever performs
//! non-blocking queue operations; when a tick finds nothing to do it reports
//! [`TickOutcome::Idle`] and the harness sleeps briefly.
//!
//! Keeping all slicer state on one thread is deliberate: no cross-core
//! coherency traffic touches the per-link accumulators. When the input count
//! outgrows one worker's drainage budget, shard inputs across several
//! aggregator instances, each with its own output queue.

use crate::block::BlockRef;
use crate::error::{Result, StageError};
use crate::fifo::SpscFifo;
use crate::slicer::{Slice, Slicer};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Configuration for an [`Aggregator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Bypass the slicers: every input block is forwarded as a singleton
    /// slice.
    pub disable_slicing: bool,
    /// How long a partial slice may sit unchanged before it is force-emitted
    /// incomplete.
    pub staleness_interval: Duration,
    /// How long the worker sleeps after a tick that did no work.
    pub idle_sleep: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            disable_slicing: false,
            staleness_interval: Duration::from_millis(100),
            idle_sleep: Duration::from_micros(50),
        }
    }
}

impl AggregatorConfig {
    /// Read configuration from `FRAMESTAGE_*` environment variables,
    /// falling back to defaults:
    ///
    /// - `FRAMESTAGE_DISABLE_SLICING`: `1` or `true` enables pass-through
    /// - `FRAMESTAGE_STALENESS_MS`: staleness interval in milliseconds
    /// - `FRAMESTAGE_IDLE_SLEEP_US`: idle sleep in microseconds
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let disable_slicing = std::env::var("FRAMESTAGE_DISABLE_SLICING")
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.disable_slicing);

        let staleness_interval = std::env::var("FRAMESTAGE_STALENESS_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.staleness_interval);

        let idle_sleep = std::env::var("FRAMESTAGE_IDLE_SLEEP_US")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_micros)
            .unwrap_or(defaults.idle_sleep);

        Self {
            disable_slicing,
            staleness_interval,
            idle_sleep,
        }
    }

    /// Set pass-through mode.
    #[must_use]
    pub fn with_disable_slicing(mut self, disable: bool) -> Self {
        self.disable_slicing = disable;
        self
    }

    /// Set the staleness interval.
    #[must_use]
    pub fn with_staleness_interval(mut self, interval: Duration) -> Self {
        self.staleness_interval = interval;
        self
    }

    /// Set the idle sleep.
    #[must_use]
    pub fn with_idle_sleep(mut self, sleep: Duration) -> Self {
        self.idle_sleep = sleep;
        self
    }
}

/// What one worker tick tells the scheduling harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to do; sleep a little before the next tick.
    Idle,
    /// Work was done; tick again immediately.
    Active,
    /// Terminate the worker.
    Stop,
}

/// Flags and counters shared between the handle and the worker thread.
struct SharedState {
    stop: AtomicBool,
    flush: AtomicBool,
    running: AtomicBool,
    total_blocks_in: AtomicU64,
}

/// Deadline tracking for the incomplete-slice flush.
///
/// One timer covers all slicers: it is armed by any tick that leaves a
/// non-empty partial without completing a slice, and disarmed whenever a
/// slice completes. A single chronically stale link therefore flushes fresh
/// partials on other links too; that is the accepted cost of keeping one
/// timer instead of one per slicer.
struct StalenessTimer {
    interval: Duration,
    armed_at: Option<Instant>,
}

impl StalenessTimer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            armed_at: None,
        }
    }

    /// Start the countdown unless it is already running.
    fn arm(&mut self) {
        if self.armed_at.is_none() {
            self.armed_at = Some(Instant::now());
        }
    }

    fn disarm(&mut self) {
        self.armed_at = None;
    }

    fn expired(&self) -> bool {
        self.armed_at
            .map_or(false, |armed| armed.elapsed() >= self.interval)
    }
}

/// Multiplexes equipment input queues into one output queue of slices.
///
/// The aggregator borrows its queues (shared `Arc` handles) and owns its
/// slicers and worker thread. Stopping does not drain the inputs; set the
/// flush flag via [`request_flush`](Self::request_flush) before stopping if
/// pending partial slices must reach the output.
pub struct Aggregator {
    name: String,
    config: AggregatorConfig,
    output: Arc<SpscFifo<Slice>>,
    inputs: Mutex<Vec<Arc<SpscFifo<BlockRef>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<SharedState>,
}

impl Aggregator {
    /// Create an aggregator writing to `output`.
    #[must_use]
    pub fn new(output: Arc<SpscFifo<Slice>>, config: AggregatorConfig) -> Self {
        Self {
            name: "aggregator".to_string(),
            config,
            output,
            inputs: Mutex::new(Vec::new()),
            worker: Mutex::new(None),
            shared: Arc::new(SharedState {
                stop: AtomicBool::new(false),
                flush: AtomicBool::new(false),
                running: AtomicBool::new(false),
                total_blocks_in: AtomicU64::new(0),
            }),
        }
    }

    /// Set the instance name used in log events and the worker thread name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Register an input queue. One slicer is created per input at start.
    ///
    /// # Errors
    /// [`StageError::AggregatorState`] when the worker is already running.
    pub fn add_input(&self, input: Arc<SpscFifo<BlockRef>>) -> Result<()> {
        if self.shared.running.load(Ordering::Acquire) {
            return Err(StageError::AggregatorState {
                cause: "cannot add an input while the worker is running".to_string(),
            });
        }
        self.inputs.lock().push(input);
        Ok(())
    }

    /// Launch the worker thread.
    ///
    /// # Errors
    /// [`StageError::AggregatorState`] when already started or when the
    /// thread cannot be spawned.
    pub fn start(&self) -> Result<()> {
        let mut worker_slot = self.worker.lock();
        if worker_slot.is_some() {
            return Err(StageError::AggregatorState {
                cause: "worker already started".to_string(),
            });
        }

        let inputs = self.inputs.lock().clone();
        let slicers = (0..inputs.len()).map(|_| Slicer::new()).collect();

        self.shared.stop.store(false, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);

        let mut worker = Worker {
            name: self.name.clone(),
            inputs,
            slicers,
            output: Arc::clone(&self.output),
            shared: Arc::clone(&self.shared),
            timer: StalenessTimer::new(self.config.staleness_interval),
            next_index: 0,
            disable_slicing: self.config.disable_slicing,
        };
        let idle_sleep = self.config.idle_sleep;
        let shared = Arc::clone(&self.shared);

        let handle = std::thread::Builder::new()
            .name(format!("framestage-{}", self.name))
            .spawn(move || {
                tracing::info!(
                    name = %worker.name,
                    inputs = worker.inputs.len(),
                    pass_through = worker.disable_slicing,
                    "Aggregator worker started"
                );
                loop {
                    match worker.tick() {
                        TickOutcome::Active => {}
                        TickOutcome::Idle => std::thread::sleep(idle_sleep),
                        TickOutcome::Stop => break,
                    }
                }
                shared.running.store(false, Ordering::Release);
                tracing::info!(
                    name = %worker.name,
                    total_blocks_in = shared.total_blocks_in.load(Ordering::Relaxed),
                    "Aggregator worker stopped"
                );
            })
            .map_err(|e| StageError::AggregatorState {
                cause: format!("failed to spawn worker thread: {e}"),
            })?;

        *worker_slot = Some(handle);
        Ok(())
    }

    /// Signal the worker to terminate. With `wait` set, join it before
    /// returning.
    ///
    /// Input queues are not drained; whatever they still hold stays there.
    pub fn stop(&self, wait: bool) {
        self.shared.stop.store(true, Ordering::Release);
        if wait {
            if let Some(handle) = self.worker.lock().take() {
                if handle.join().is_err() {
                    tracing::error!(name = %self.name, "Aggregator worker panicked");
                }
            }
        }
    }

    /// Ask the worker to flush incomplete slices on its next tick, as if the
    /// staleness timer had fired. The flag clears itself once the flush has
    /// fully reached the output queue. This is how shutdown drains pending
    /// data: `request_flush()`, give the consumer time, then `stop(true)`.
    pub fn request_flush(&self) {
        self.shared.flush.store(true, Ordering::Release);
    }

    /// Whether the worker thread is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Total number of blocks drained from all inputs since start.
    #[must_use]
    pub fn total_blocks_in(&self) -> u64 {
        self.shared.total_blocks_in.load(Ordering::Relaxed)
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.stop(true);
    }
}

/// The worker-thread side: slicers, round-robin cursor, staleness timer.
struct Worker {
    name: String,
    inputs: Vec<Arc<SpscFifo<BlockRef>>>,
    slicers: Vec<Slicer>,
    output: Arc<SpscFifo<Slice>>,
    shared: Arc<SharedState>,
    timer: StalenessTimer,
    /// Input index the next tick starts at, advanced once per tick so
    /// low-index inputs are not favored under backpressure.
    next_index: usize,
    disable_slicing: bool,
}

impl Worker {
    /// Run one tick: drain inputs round-robin, move completed slices to the
    /// output, handle staleness and explicit flushes.
    fn tick(&mut self) -> TickOutcome {
        if self.shared.stop.load(Ordering::Acquire) {
            return TickOutcome::Stop;
        }
        // Backpressure: without a free output slot nothing can move.
        if self.output.is_full() {
            return TickOutcome::Idle;
        }

        let input_count = self.inputs.len();
        let start = self.next_index;
        if input_count > 0 {
            self.next_index = (self.next_index + 1) % input_count;
        }

        let mut did_work = false;
        let mut completed_this_tick = 0usize;

        // Drain each input into its slicer (or straight through), walking
        // the inputs from this tick's round-robin start.
        for offset in 0..input_count {
            let index = (start + offset) % input_count;
            let pending = self.inputs[index].len();

            for _ in 0..pending {
                if self.disable_slicing && self.output.is_full() {
                    // Leave the rest queued for the next tick.
                    break;
                }
                let Some(block) = self.inputs[index].pop() else {
                    break;
                };
                self.shared.total_blocks_in.fetch_add(1, Ordering::Relaxed);
                did_work = true;

                if self.disable_slicing {
                    // Sole producer and a free slot was just checked.
                    let pushed = self.output.push(Slice::singleton(block));
                    debug_assert!(pushed.is_ok(), "output rejected slice despite free slot");
                } else if let Err(err) = self.slicers[index].append(block) {
                    tracing::error!(
                        name = %self.name,
                        input = index,
                        error = %err,
                        "Fatal slicer error, stopping worker"
                    );
                    return TickOutcome::Stop;
                }
            }
        }

        if self.disable_slicing {
            // Nothing is ever held back in pass-through mode; an explicit
            // flush request is trivially satisfied.
            self.shared.flush.store(false, Ordering::Release);
            return if did_work {
                TickOutcome::Active
            } else {
                TickOutcome::Idle
            };
        }

        // Move completed slices out, same round-robin order, retaining
        // whatever the output cannot take right now.
        for offset in 0..input_count {
            let index = (start + offset) % input_count;
            while !self.output.is_full() {
                let Some(slice) = self.slicers[index].take_slice(false) else {
                    break;
                };
                completed_this_tick += 1;
                did_work = true;
                let pushed = self.output.push(slice);
                debug_assert!(pushed.is_ok(), "output rejected slice despite free slot");
            }
            if self.output.is_full() {
                break;
            }
        }

        // Staleness: a tick that completes a slice proves the flow is
        // healthy; a tick that leaves partials without completing anything
        // starts (or continues) the countdown.
        if completed_this_tick > 0 {
            self.timer.disarm();
        } else if self.slicers.iter().any(Slicer::has_partial_blocks) {
            self.timer.arm();
        }

        let flush_requested = self.shared.flush.load(Ordering::Acquire);
        if flush_requested || self.timer.expired() {
            let (flushed, done) = self.flush_incomplete();
            if flushed > 0 {
                did_work = true;
                tracing::debug!(name = %self.name, flushed, "Flushed incomplete slices");
            }
            if done {
                // Re-arm only when a partial goes stale again.
                self.timer.disarm();
                if flush_requested {
                    self.shared.flush.store(false, Ordering::Release);
                }
            }
            // Otherwise the output is full; flag and timer stay set so the
            // flush resumes next tick.
        }

        if did_work {
            TickOutcome::Active
        } else {
            TickOutcome::Idle
        }
    }

    /// Push every slice, complete or not, to the output. Returns how many
    /// slices were emitted and whether every slicer is now empty.
    fn flush_incomplete(&mut self) -> (usize, bool) {
        let mut flushed = 0;
        for slicer in &mut self.slicers {
            loop {
                if self.output.is_full() {
                    return (flushed, false);
                }
                let Some(slice) = slicer.take_slice(true) else {
                    break;
                };
                flushed += 1;
                let pushed = self.output.push(slice);
                debug_assert!(pushed.is_ok(), "output rejected slice despite free slot");
            }
        }
        (flushed, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PagePool, PagePoolConfig};
    use crate::types::{LinkId, TimeframeId};

    fn block(pool: &PagePool, link: u16, tf: u64) -> BlockRef {
        let mut container = pool.wrap().unwrap();
        container.set_link_id(LinkId::new(link));
        container.set_timeframe_id(TimeframeId::new(tf));
        Arc::new(container)
    }

    fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn default_config() {
        let config = AggregatorConfig::default();
        assert!(!config.disable_slicing);
        assert_eq!(config.staleness_interval, Duration::from_millis(100));
        assert_eq!(config.idle_sleep, Duration::from_micros(50));
    }

    #[test]
    fn config_builders() {
        let config = AggregatorConfig::default()
            .with_disable_slicing(true)
            .with_staleness_interval(Duration::from_millis(10))
            .with_idle_sleep(Duration::from_micros(5));
        assert!(config.disable_slicing);
        assert_eq!(config.staleness_interval, Duration::from_millis(10));
        assert_eq!(config.idle_sleep, Duration::from_micros(5));
    }

    #[test]
    fn staleness_timer_arms_once() {
        let mut timer = StalenessTimer::new(Duration::from_millis(20));
        assert!(!timer.expired());

        timer.arm();
        let first = timer.armed_at;
        std::thread::sleep(Duration::from_millis(5));
        timer.arm(); // must not restart the countdown
        assert_eq!(timer.armed_at, first);
        assert!(!timer.expired());

        std::thread::sleep(Duration::from_millis(20));
        assert!(timer.expired());

        timer.disarm();
        assert!(!timer.expired());
    }

    #[test]
    fn lifecycle_guards() {
        let output = Arc::new(SpscFifo::with_capacity(8));
        let aggregator = Aggregator::new(output, AggregatorConfig::default());
        let input = Arc::new(SpscFifo::with_capacity(8));
        aggregator.add_input(Arc::clone(&input)).unwrap();

        aggregator.start().unwrap();
        assert!(aggregator.is_running());

        let err = aggregator.start().unwrap_err();
        assert_eq!(err.code(), "E301");
        let err = aggregator.add_input(input).unwrap_err();
        assert_eq!(err.code(), "E301");

        aggregator.stop(true);
        assert!(!aggregator.is_running());
    }

    #[test]
    fn slices_flow_to_output() {
        let pool = PagePool::with_capacity(PagePoolConfig::new(256, 16)).unwrap();
        let output: Arc<SpscFifo<Slice>> = Arc::new(SpscFifo::with_capacity(8));
        let input = Arc::new(SpscFifo::with_capacity(8));

        let aggregator =
            Aggregator::new(Arc::clone(&output), AggregatorConfig::default()).with_name("unit");
        aggregator.add_input(Arc::clone(&input)).unwrap();

        input.push(block(&pool, 1, 10)).unwrap();
        input.push(block(&pool, 1, 10)).unwrap();
        input.push(block(&pool, 1, 11)).unwrap();

        aggregator.start().unwrap();
        assert!(wait_for(|| !output.is_empty(), Duration::from_secs(1)));

        let slice = output.pop().unwrap();
        assert_eq!(slice.timeframe_id(), TimeframeId::new(10));
        assert_eq!(slice.len(), 2);
        assert_eq!(aggregator.total_blocks_in(), 3);

        aggregator.stop(true);
    }

    #[test]
    fn stop_without_flush_keeps_partials_unsent() {
        let pool = PagePool::with_capacity(PagePoolConfig::new(256, 16)).unwrap();
        let output: Arc<SpscFifo<Slice>> = Arc::new(SpscFifo::with_capacity(8));
        let input = Arc::new(SpscFifo::with_capacity(8));

        let config = AggregatorConfig::default().with_staleness_interval(Duration::from_secs(60));
        let aggregator = Aggregator::new(Arc::clone(&output), config);
        aggregator.add_input(Arc::clone(&input)).unwrap();

        input.push(block(&pool, 1, 10)).unwrap();
        aggregator.start().unwrap();
        assert!(wait_for(
            || aggregator.total_blocks_in() == 1,
            Duration::from_secs(1)
        ));
        aggregator.stop(true);

        // The lone block never completed a slice and no flush was requested.
        assert!(output.is_empty());
    }
}
