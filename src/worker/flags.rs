//! Per-worker flags shared between the foreground and the interrupt handler.
//!
//! Ordering contract: the interrupt publishes with [`PUBLISH`] (`Release`) and the
//! foreground observes with [`OBSERVE`] (`Acquire`). Everything the interrupt wrote before
//! clearing `transmitting` is visible to a foreground that sees it cleared.
//!
//! Claims are numbered. A borrower keeps its claim ticket and can wait on *its own*
//! transmission even after the interrupt released the worker and someone else claimed it.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, block_for};
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

/// Ordering used by the interrupt to publish a flag.
pub const PUBLISH: Ordering = Ordering::Release;
/// Ordering used by the foreground to observe a flag.
pub const OBSERVE: Ordering = Ordering::Acquire;

/// Availability, transmission, and claim bookkeeping for one worker.
pub struct WorkerFlags {
    available: AtomicBool,
    transmitting: AtomicBool,
    claimed_ticket: AtomicU32,
    completed_ticket: AtomicU32,
    latched_at: Mutex<CriticalSectionRawMutex, Cell<Option<Instant>>>,
    completion: Signal<CriticalSectionRawMutex, u32>,
}

impl WorkerFlags {
    /// Flags for an idle, available worker.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            transmitting: AtomicBool::new(false),
            claimed_ticket: AtomicU32::new(0),
            completed_ticket: AtomicU32::new(0),
            latched_at: Mutex::new(Cell::new(None)),
            completion: Signal::new(),
        }
    }

    /// Whether the worker can be claimed.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(OBSERVE)
    }

    /// Whether a transmission is in flight.
    #[must_use]
    pub fn is_transmitting(&self) -> bool {
        self.transmitting.load(OBSERVE)
    }

    /// Ticket of the most recent claim.
    #[must_use]
    pub fn claimed_ticket(&self) -> u32 {
        self.claimed_ticket.load(OBSERVE)
    }

    /// Take the worker if it is available, returning the new claim ticket.
    ///
    /// The pool calls this inside its critical section.
    pub fn try_claim(&self) -> Option<u32> {
        self.available
            .compare_exchange(true, false, Ordering::AcqRel, OBSERVE)
            .ok()?;
        Some(self.claimed_ticket.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
    }

    /// Mark a transmission as started. Called before the hardware is kicked.
    pub fn begin_transmit(&self) {
        self.completion.reset();
        self.transmitting.store(true, PUBLISH);
    }

    /// Completion: clear `transmitting`, publish the finished ticket, release the worker,
    /// and wake async waiters. Records the latch start.
    pub fn complete(&self) {
        self.latched_at.lock(|latched_at| latched_at.set(Some(Instant::now())));
        self.finish();
    }

    /// Completion without anything on the wire (dropped or empty frame). No latch wait follows.
    pub fn abandon(&self) {
        self.finish();
    }

    fn finish(&self) {
        let ticket = self.claimed_ticket.load(OBSERVE);
        self.transmitting.store(false, PUBLISH);
        self.completed_ticket.store(ticket, PUBLISH);
        self.available.store(true, PUBLISH);
        self.completion.signal(ticket);
    }

    /// Return a claim that is not transmitting. A no-op if the worker was already released
    /// and re-claimed, or if a transmission is still in flight (completion releases it).
    ///
    /// Returns whether this call made the worker available.
    pub fn release(&self, ticket: u32) -> bool {
        critical_section::with(|_| {
            if self.claimed_ticket.load(OBSERVE) != ticket
                || self.is_transmitting()
                || self.is_available()
            {
                return false;
            }
            self.completed_ticket.store(ticket, PUBLISH);
            self.available.store(true, PUBLISH);
            true
        })
    }

    /// Whether the claim numbered `ticket` has finished.
    #[must_use]
    pub fn is_done(&self, ticket: u32) -> bool {
        // Tickets wrap; a completed ticket at or past ours means ours is done.
        self.completed_ticket.load(OBSERVE).wrapping_sub(ticket) < 0x8000_0000
    }

    /// Block until the claim numbered `ticket` has finished.
    pub fn wait(&self, ticket: u32, poll_interval: Duration) {
        while !self.is_done(ticket) {
            block_for(poll_interval);
        }
    }

    /// Block until no transmission is in flight.
    pub fn wait_while_transmitting(&self, poll_interval: Duration) {
        while self.is_transmitting() {
            block_for(poll_interval);
        }
    }

    /// Wait asynchronously until the claim numbered `ticket` has finished.
    pub async fn completion(&self, ticket: u32) {
        while !self.is_done(ticket) {
            self.completion.wait().await;
        }
    }

    /// Block until the strip has latched the previous frame.
    pub fn wait_for_latch(&self, reset: Duration) {
        let Some(latched_at) = self.latched_at.lock(Cell::get) else {
            return;
        };
        if let Some(remaining) = reset.checked_sub(latched_at.elapsed()) {
            block_for(remaining);
        }
    }
}

impl Default for WorkerFlags {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_are_exclusive_and_numbered() {
        let flags = WorkerFlags::new();
        assert_eq!(flags.try_claim(), Some(1));
        assert_eq!(flags.try_claim(), None);
        assert!(flags.release(1));
        assert_eq!(flags.try_claim(), Some(2));
    }

    #[test]
    fn release_is_idempotent_and_ticket_checked() {
        let flags = WorkerFlags::new();
        let first = flags.try_claim().expect("available");
        assert!(flags.release(first));
        assert!(!flags.release(first));
        let second = flags.try_claim().expect("available again");
        assert!(!flags.release(first), "a stale ticket must not free the new claim");
        assert!(!flags.is_available());
        assert!(flags.release(second));
    }

    #[test]
    fn release_waits_for_the_transmission() {
        let flags = WorkerFlags::new();
        let ticket = flags.try_claim().expect("available");
        flags.begin_transmit();
        assert!(!flags.release(ticket));
        assert!(!flags.is_done(ticket));
        flags.complete();
        assert!(flags.is_done(ticket));
        assert!(flags.is_available());
        assert!(!flags.is_transmitting());
    }

    #[test]
    fn completion_is_visible_to_an_observing_thread() {
        let flags = WorkerFlags::new();
        let ticket = flags.try_claim().expect("available");
        flags.begin_transmit();
        std::thread::scope(|scope| {
            scope.spawn(|| flags.complete());
            flags.wait(ticket, Duration::from_micros(10));
        });
        assert!(flags.is_done(ticket));
        assert!(flags.is_available());
    }

    #[test]
    fn later_completions_cover_earlier_tickets() {
        let flags = WorkerFlags::new();
        let first = flags.try_claim().expect("available");
        flags.begin_transmit();
        flags.complete();
        let second = flags.try_claim().expect("available");
        assert!(flags.is_done(first));
        assert!(!flags.is_done(second));
    }

    #[test]
    fn async_completion_resolves() {
        let flags = WorkerFlags::new();
        let ticket = flags.try_claim().expect("available");
        flags.begin_transmit();
        flags.complete();
        embassy_futures::block_on(flags.completion(ticket));
    }

    #[test]
    fn latch_wait_covers_the_reset_time() {
        let flags = WorkerFlags::new();
        let reset = Duration::from_millis(20);
        flags.wait_for_latch(reset);
        flags.complete();
        let start = Instant::now();
        flags.wait_for_latch(reset);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
