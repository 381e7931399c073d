//! Workers: one hardware channel each, in one of two transmission strategies.
//!
//! See [`double_buffer`] and [`one_shot`] for the strategies, [`flags`] for the state shared
//! with the interrupt handler, and [`WorkerLease`] for how a strip holds on to a worker.

pub mod double_buffer;
pub mod flags;
pub mod one_shot;

use embassy_time::Duration;
use portable_atomic_util::Arc;

use crate::Result;
use crate::buffer::GrowableBuffer;
use crate::channel::{ChannelDriver, Pin};
use crate::timing::ChipsetTiming;

use self::flags::WorkerFlags;

/// Default channel tick rate (25 ns per tick).
pub const DEFAULT_RESOLUTION_HZ: u32 = 40_000_000;

/// Delay between checks while waiting for a transmission to finish.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_micros(10);

/// Pixel bytes shared between a strip and the worker sending them.
///
/// The worker only reads it. The strip gets exclusive access back once the worker has
/// dropped its handle at completion.
pub type SharedFrame = Arc<GrowableBuffer<u8>>;

/// Transmission strategy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, derive_more::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WorkerKind {
    /// Interrupt-refilled ring of two memory halves.
    #[display("double-buffer")]
    DoubleBuffer,
    /// Whole frame pre-encoded and sent in one transfer.
    #[display("one-shot")]
    OneShot,
}

/// Worker index within its pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, derive_more::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[display("#{_0}")]
pub struct WorkerId(pub u8);

/// Lifecycle of a worker.
///
/// `Idle → Configuring → Ready → Transmitting → Ready`. A worker only goes back to
/// `Configuring` from `Ready`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, derive_more::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WorkerState {
    /// No channel created yet.
    #[display("idle")]
    Idle,
    /// Channel being created or rebound.
    #[display("configuring")]
    Configuring,
    /// Channel configured, nothing in flight.
    #[display("ready")]
    Ready,
    /// A frame is on the wire.
    #[display("transmitting")]
    Transmitting,
}

/// Runtime settings shared by every worker in a pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WorkerSettings {
    /// Channel tick rate.
    pub resolution_hz: u32,
    /// Delay between checks in [`Worker::wait_for_completion`].
    pub wait_poll_interval: Duration,
    /// Most symbols a one-shot worker's encode buffer may hold. Longer frames are dropped.
    pub max_one_shot_symbols: usize,
}

impl WorkerSettings {
    /// [`DEFAULT_RESOLUTION_HZ`], [`WAIT_POLL_INTERVAL`], no symbol limit.
    pub const DEFAULT: Self = Self {
        resolution_hz: DEFAULT_RESOLUTION_HZ,
        wait_poll_interval: WAIT_POLL_INTERVAL,
        max_one_shot_symbols: usize::MAX,
    };
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Operations every worker supports, whatever its strategy.
///
/// All methods take `&self`: the pool shares workers between strips and the interrupt
/// handler, and each worker keeps its channel behind a critical-section mutex.
pub trait Worker<D: ChannelDriver> {
    /// Index within the pool.
    fn id(&self) -> WorkerId;

    /// Transmission strategy.
    fn kind(&self) -> WorkerKind;

    /// State shared with the interrupt handler.
    fn flags(&self) -> &WorkerFlags;

    /// Current lifecycle state.
    fn state(&self) -> WorkerState;

    /// Pin the channel is bound to, once configured.
    fn pin(&self) -> Option<Pin>;

    /// Bind the worker to `pin` with `timing`, creating the channel on first use.
    ///
    /// Does nothing if pin and timing are unchanged. Otherwise waits out any transmission
    /// in flight before touching the channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelCreate`](crate::Error::ChannelCreate) or
    /// [`Error::PinRebind`](crate::Error::PinRebind) when the channel cannot be set up.
    fn configure(&self, driver: &D, pin: Pin, timing: ChipsetTiming) -> Result<()>;

    /// Start sending `frame`. Returns once the hardware is running.
    ///
    /// # Panics
    ///
    /// Panics if a transmission is already in flight.
    fn transmit(&self, frame: &SharedFrame);

    /// Read and handle one pending channel event. Returns whether there was one.
    ///
    /// Runs in interrupt context.
    fn service_interrupt(&self) -> bool;

    /// Whether the worker can be claimed.
    fn is_available(&self) -> bool {
        self.flags().is_available()
    }

    /// Block until no transmission is in flight.
    fn wait_for_completion(&self);
}

/// A claim on one worker, held by a strip from acquisition until its frame is done.
///
/// The completion interrupt releases the worker as soon as the frame is sent, so the lease
/// may outlive its hold on the worker. Waiting on the lease waits for *this* claim's
/// transmission. Dropping the lease releases the worker if nothing was sent.
pub struct WorkerLease<'a, D: ChannelDriver> {
    worker: &'a dyn Worker<D>,
    ticket: u32,
    wait_poll_interval: Duration,
}

impl<'a, D: ChannelDriver> WorkerLease<'a, D> {
    pub(crate) fn new(worker: &'a dyn Worker<D>, ticket: u32, wait_poll_interval: Duration) -> Self {
        Self {
            worker,
            ticket,
            wait_poll_interval,
        }
    }

    /// Leased worker's index.
    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.worker.id()
    }

    /// Leased worker's strategy.
    #[must_use]
    pub fn kind(&self) -> WorkerKind {
        self.worker.kind()
    }

    /// Claim number.
    #[must_use]
    pub const fn ticket(&self) -> u32 {
        self.ticket
    }

    /// Start sending `frame` on the leased worker.
    pub fn transmit(&self, frame: &SharedFrame) {
        self.worker.transmit(frame);
    }

    /// Whether this claim's transmission has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.worker.flags().is_done(self.ticket)
    }

    /// Block until this claim's transmission has finished.
    pub fn wait(&self) {
        self.worker.flags().wait(self.ticket, self.wait_poll_interval);
    }

    /// Wait asynchronously until this claim's transmission has finished.
    pub async fn completion(&self) {
        self.worker.flags().completion(self.ticket).await;
    }

    /// Return the worker to the pool. Same as dropping the lease.
    pub fn release(self) {
        drop(self);
    }
}

impl<D: ChannelDriver> Drop for WorkerLease<'_, D> {
    fn drop(&mut self) {
        self.worker.flags().release(self.ticket);
    }
}

impl<D: ChannelDriver> core::fmt::Debug for WorkerLease<'_, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerLease")
            .field("worker", &self.worker.id())
            .field("kind", &self.worker.kind())
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}
