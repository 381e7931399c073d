//! A bounded pool of workers shared by every strip.
//!
//! The pool owns all workers of both kinds. Their counts come from the chip's channel table
//! and are fixed at construction. Strips borrow a worker per frame with
//! [`WorkerPool::acquire_worker`]. The completion interrupt hands it back.
//!
//! Selection is size-based: frames up to [`PoolConfig::one_shot_threshold_bytes`] prefer a
//! one-shot worker (no mid-frame interrupts), and longer frames prefer a double-buffer
//! worker (fixed channel memory). Either kind falls back to the other when none of its own
//! is free.
//!
//! # Example
//!
//! ```rust
//! # #[cfg(feature = "host")]
//! # fn main() -> clockless_kit::Result<()> {
//! use clockless_kit::channel::Pin;
//! use clockless_kit::channel::host::SimulatedDriver;
//! use clockless_kit::pool::{PoolConfig, WorkerPool};
//! use clockless_kit::timing::{ChipVariant, Chipset};
//! use clockless_kit::worker::WorkerKind;
//!
//! let driver = SimulatedDriver::new(ChipVariant::Esp32);
//! let pool = WorkerPool::new(driver, ChipVariant::Esp32, PoolConfig::new())?;
//!
//! // 10 RGB pixels: short enough for a one-shot worker.
//! let lease = pool.acquire_worker(30, Pin(2), Chipset::Ws2812.timing())?;
//! assert_eq!(lease.kind(), WorkerKind::OneShot);
//! pool.release_worker(lease);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "host"))]
//! # fn main() {}
//! ```

use embassy_sync::once_lock::OnceLock;
use embassy_time::{Duration, block_for};

use crate::channel::{ChannelDriver, Pin};
use crate::log::{debug, error, info, warn};
use crate::timing::{ChipVariant, ChipsetTiming, MEMORY_BLOCKS_PER_WORKER};
use crate::worker::double_buffer::DoubleBufferWorker;
use crate::worker::one_shot::OneShotWorker;
use crate::worker::{Worker, WorkerId, WorkerKind, WorkerLease, WorkerSettings};
use crate::{Error, Result};

pub use crate::worker::{DEFAULT_RESOLUTION_HZ, WAIT_POLL_INTERVAL};

// ============================================================================
// Configuration
// ============================================================================

/// Strips up to this many LEDs prefer a one-shot worker.
pub const ONE_SHOT_THRESHOLD_LEDS: usize = 200;

/// Bytes per LED used to turn [`ONE_SHOT_THRESHOLD_LEDS`] into a byte threshold.
pub const BYTES_PER_RGB_PIXEL: usize = 3;

/// Delay between acquisition attempts while every worker is busy.
pub const POLL_INTERVAL_DEFAULT: Duration = Duration::from_micros(50);

/// Acquisition attempts before giving up with [`Error::ChannelExhausted`] (about one second
/// at [`POLL_INTERVAL_DEFAULT`]).
pub const RETRY_LIMIT_DEFAULT: u32 = 20_000;

/// Upper bound on workers of each kind (the largest chip has 8 channels).
pub const MAX_POOL_WORKERS: usize = 8;

/// Runtime tunables for a [`WorkerPool`].
///
/// ```rust
/// use clockless_kit::pool::PoolConfig;
/// use embassy_time::Duration;
///
/// let config = PoolConfig::new()
///     .with_one_shot_threshold_leds(64)
///     .with_retry_limit(100)
///     .with_poll_interval(Duration::from_micros(20));
/// assert_eq!(config.one_shot_threshold_bytes(), 192);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PoolConfig {
    /// Frames up to this many LEDs prefer a one-shot worker.
    pub one_shot_threshold_leds: usize,
    /// Delay between acquisition attempts.
    pub poll_interval: Duration,
    /// Acquisition attempts before giving up.
    pub retry_limit: u32,
    /// Settings handed to every worker.
    pub worker: WorkerSettings,
}

impl PoolConfig {
    /// The default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            one_shot_threshold_leds: ONE_SHOT_THRESHOLD_LEDS,
            poll_interval: POLL_INTERVAL_DEFAULT,
            retry_limit: RETRY_LIMIT_DEFAULT,
            worker: WorkerSettings::DEFAULT,
        }
    }

    /// Set the one-shot threshold in LEDs.
    #[must_use]
    pub const fn with_one_shot_threshold_leds(mut self, leds: usize) -> Self {
        self.one_shot_threshold_leds = leds;
        self
    }

    /// Set the delay between acquisition attempts.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the number of acquisition attempts before giving up.
    #[must_use]
    pub const fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Set the channel tick rate.
    #[must_use]
    pub const fn with_resolution_hz(mut self, resolution_hz: u32) -> Self {
        self.worker.resolution_hz = resolution_hz;
        self
    }

    /// Set the delay between checks while waiting for a transmission.
    #[must_use]
    pub const fn with_wait_poll_interval(mut self, wait_poll_interval: Duration) -> Self {
        self.worker.wait_poll_interval = wait_poll_interval;
        self
    }

    /// Cap each one-shot worker's encode buffer at `symbols` symbols.
    #[must_use]
    pub const fn with_max_one_shot_symbols(mut self, symbols: usize) -> Self {
        self.worker.max_one_shot_symbols = symbols;
        self
    }

    /// Frames up to this many bytes prefer a one-shot worker.
    #[must_use]
    pub const fn one_shot_threshold_bytes(&self) -> usize {
        self.one_shot_threshold_leds
            .saturating_mul(BYTES_PER_RGB_PIXEL)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Layout
// ============================================================================

/// How many workers of each kind a pool holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PoolLayout {
    /// Double-buffer workers (two memory blocks each).
    pub double_buffer: usize,
    /// One-shot workers (one memory block each).
    pub one_shot: usize,
}

impl PoolLayout {
    /// An explicit layout. Check it with [`validate`](Self::validate).
    #[must_use]
    pub const fn new(double_buffer: usize, one_shot: usize) -> Self {
        Self {
            double_buffer,
            one_shot,
        }
    }

    /// Default split for `variant`.
    ///
    /// One double-buffer worker fewer than the chip could host, so the freed blocks become
    /// one-shot workers. Chips with a single double-buffer worker keep it.
    ///
    /// | Variant  | Blocks | Double-buffer | One-shot |
    /// |----------|--------|---------------|----------|
    /// | ESP32    | 8      | 3             | 2        |
    /// | S2 / S3  | 4      | 1             | 2        |
    /// | C3/C6/H2 | 2      | 1             | 0        |
    #[must_use]
    pub const fn for_variant(variant: ChipVariant) -> Self {
        let max_workers = variant.max_workers();
        let double_buffer = if max_workers > 1 {
            max_workers - 1
        } else {
            max_workers
        };
        let spare_blocks = variant.memory_blocks() - double_buffer * MEMORY_BLOCKS_PER_WORKER;
        let spare_channels = variant.tx_channels() - double_buffer;
        let one_shot = if spare_blocks < spare_channels {
            spare_blocks
        } else {
            spare_channels
        };
        Self::new(double_buffer, one_shot)
    }

    /// Workers of both kinds.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.double_buffer + self.one_shot
    }

    /// Memory blocks the layout claims once every worker has a channel.
    #[must_use]
    pub const fn memory_blocks(&self) -> usize {
        self.double_buffer * MEMORY_BLOCKS_PER_WORKER + self.one_shot
    }

    /// Check the layout against the chip.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] if the layout needs more memory blocks or channels
    /// than `variant` has, more workers of one kind than [`MAX_POOL_WORKERS`], or no workers
    /// at all.
    pub const fn validate(&self, variant: ChipVariant) -> Result<()> {
        let blocks_needed = self.memory_blocks();
        let blocks_available = variant.memory_blocks();
        if self.total() == 0
            || blocks_needed > blocks_available
            || self.total() > variant.tx_channels()
            || self.double_buffer > MAX_POOL_WORKERS
            || self.one_shot > MAX_POOL_WORKERS
        {
            return Err(Error::InvalidLayout {
                double_buffer: self.double_buffer,
                one_shot: self.one_shot,
                blocks_needed,
                blocks_available,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Pool
// ============================================================================

struct Workers<C> {
    double_buffer: heapless::Vec<DoubleBufferWorker<C>, MAX_POOL_WORKERS>,
    one_shot: heapless::Vec<OneShotWorker<C>, MAX_POOL_WORKERS>,
}

/// The shared pool of channel workers.
///
/// Build one per application and hand `&WorkerPool` to every strip controller. The
/// platform's pulse-peripheral interrupt must call [`on_interrupt`](Self::on_interrupt).
pub struct WorkerPool<D: ChannelDriver> {
    driver: D,
    variant: ChipVariant,
    config: PoolConfig,
    layout: PoolLayout,
    workers: OnceLock<Workers<D::Channel>>,
}

impl<D: ChannelDriver> WorkerPool<D> {
    /// A pool with the default layout for `variant`. Workers are built on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] if the default layout does not fit `variant`.
    pub fn new(driver: D, variant: ChipVariant, config: PoolConfig) -> Result<Self> {
        Self::with_layout(driver, variant, config, PoolLayout::for_variant(variant))
    }

    /// A pool with an explicit layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] if `layout` does not fit `variant`.
    pub fn with_layout(
        driver: D,
        variant: ChipVariant,
        config: PoolConfig,
        layout: PoolLayout,
    ) -> Result<Self> {
        layout.validate(variant)?;
        Ok(Self {
            driver,
            variant,
            config,
            layout,
            workers: OnceLock::new(),
        })
    }

    /// Channel driver the workers create their channels with.
    #[must_use]
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// Chip the pool was sized for.
    #[must_use]
    pub const fn variant(&self) -> ChipVariant {
        self.variant
    }

    /// Configuration the pool was built with.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Worker split.
    #[must_use]
    pub const fn layout(&self) -> PoolLayout {
        self.layout
    }

    /// Build the workers if that has not happened yet. Safe to call any number of times.
    pub fn initialize_workers_if_needed(&self) {
        self.workers();
    }

    fn workers(&self) -> &Workers<D::Channel> {
        self.workers.get_or_init(|| {
            let settings = self.config.worker;
            let double_buffer = (0..self.layout.double_buffer)
                .map(|index| {
                    DoubleBufferWorker::with_settings(worker_id(index), self.variant, settings)
                })
                .collect();
            let one_shot = (0..self.layout.one_shot)
                .map(|index| {
                    OneShotWorker::with_settings(
                        worker_id(self.layout.double_buffer + index),
                        self.variant,
                        settings,
                    )
                })
                .collect();
            info!(
                "worker pool ready: {} double-buffer, {} one-shot",
                self.layout.double_buffer,
                self.layout.one_shot
            );
            Workers {
                double_buffer,
                one_shot,
            }
        })
    }

    fn iter(&self) -> impl Iterator<Item = &dyn Worker<D>> + '_ {
        let workers = self.workers();
        workers
            .double_buffer
            .iter()
            .map(|worker| worker as &dyn Worker<D>)
            .chain(workers.one_shot.iter().map(|worker| worker as &dyn Worker<D>))
    }

    fn claim(&self, prefer_one_shot: bool) -> Option<(&dyn Worker<D>, u32)> {
        let workers = self.workers();
        let double_buffer = workers
            .double_buffer
            .iter()
            .map(|worker| worker as &dyn Worker<D>);
        let one_shot = workers
            .one_shot
            .iter()
            .map(|worker| worker as &dyn Worker<D>);
        critical_section::with(|_| {
            if prefer_one_shot {
                first_claim(one_shot.chain(double_buffer))
            } else {
                first_claim(double_buffer.chain(one_shot))
            }
        })
    }

    /// Borrow a worker for a `num_bytes` frame on `pin`.
    ///
    /// Blocks, polling every [`PoolConfig::poll_interval`], while every worker is busy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelExhausted`] if the claimed worker cannot be configured, or if
    /// no worker frees up within [`PoolConfig::retry_limit`] attempts.
    pub fn acquire_worker(
        &self,
        num_bytes: usize,
        pin: Pin,
        timing: ChipsetTiming,
    ) -> Result<WorkerLease<'_, D>> {
        let prefer_one_shot = num_bytes <= self.config.one_shot_threshold_bytes();
        let mut attempts: u32 = 0;
        loop {
            if let Some((worker, ticket)) = self.claim(prefer_one_shot) {
                let lease =
                    WorkerLease::new(worker, ticket, self.config.worker.wait_poll_interval);
                if let Err(error) = worker.configure(&self.driver, pin, timing) {
                    warn!(
                        "{} worker {} could not be configured for {}: {}",
                        worker.kind(),
                        worker.id(),
                        pin,
                        error
                    );
                    drop(lease);
                    return Err(self.exhausted(pin));
                }
                debug!(
                    "{} acquired {} worker {} for {} bytes (ticket {})",
                    pin,
                    worker.kind(),
                    worker.id(),
                    num_bytes,
                    ticket
                );
                return Ok(lease);
            }
            attempts = attempts.saturating_add(1);
            if attempts > self.config.retry_limit {
                warn!("{}: no worker freed up after {} attempts", pin, attempts);
                return Err(self.exhausted(pin));
            }
            block_for(self.config.poll_interval);
        }
    }

    fn exhausted(&self, pin: Pin) -> Error {
        Error::ChannelExhausted {
            pin,
            expected: self.worker_count(),
            available: self.available_count(),
        }
    }

    /// Give a lease back. A no-op for the worker if it was already released by its completion
    /// interrupt or if its transmission is still in flight.
    pub fn release_worker(&self, lease: WorkerLease<'_, D>) {
        debug!("released worker {} (ticket {})", lease.id(), lease.ticket());
        lease.release();
    }

    /// Interrupt entry point: read and handle one pending event on every busy worker.
    ///
    /// Returns whether any event was handled.
    pub fn on_interrupt(&self) -> bool {
        let Some(workers) = self.workers.try_get() else {
            return false;
        };
        let mut handled = false;
        for worker in &workers.double_buffer {
            handled |= Worker::<D>::service_interrupt(worker);
        }
        for worker in &workers.one_shot {
            handled |= Worker::<D>::service_interrupt(worker);
        }
        handled
    }

    /// Block until no worker is transmitting.
    pub fn wait_idle(&self) {
        for worker in self.iter() {
            worker.wait_for_completion();
        }
    }

    /// Workers of both kinds.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.layout.total()
    }

    /// Double-buffer workers.
    #[must_use]
    pub const fn double_buffer_count(&self) -> usize {
        self.layout.double_buffer
    }

    /// One-shot workers.
    #[must_use]
    pub const fn one_shot_count(&self) -> usize {
        self.layout.one_shot
    }

    /// Workers that can be claimed right now.
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.iter().filter(|worker| worker.is_available()).count()
    }

    /// Workers of `kind` that can be claimed right now.
    #[must_use]
    pub fn available_count_of(&self, kind: WorkerKind) -> usize {
        self.iter()
            .filter(|worker| worker.kind() == kind && worker.is_available())
            .count()
    }

    /// Log every worker's state. Used on the fatal exhaustion path.
    pub fn log_diagnostics(&self) {
        error!(
            "worker pool: {} workers ({} double-buffer, {} one-shot), {} available",
            self.worker_count(),
            self.double_buffer_count(),
            self.one_shot_count(),
            self.available_count()
        );
        for worker in self.iter() {
            let flags = worker.flags();
            error!(
                "  {} worker {}: {}, available={}, transmitting={}, ticket={}",
                worker.kind(),
                worker.id(),
                worker.state(),
                flags.is_available(),
                flags.is_transmitting(),
                flags.claimed_ticket()
            );
        }
    }
}

fn first_claim<'a, D: ChannelDriver>(
    mut workers: impl Iterator<Item = &'a dyn Worker<D>>,
) -> Option<(&'a dyn Worker<D>, u32)>
where
    D: 'a,
{
    workers.find_map(|worker| worker.flags().try_claim().map(|ticket| (worker, ticket)))
}

fn worker_id(index: usize) -> WorkerId {
    WorkerId(u8::try_from(index).unwrap_or(u8::MAX))
}
