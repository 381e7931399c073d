//! Crate-wide error type.

use crate::channel::Pin;

/// Result type used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors raised by the channel pool, its workers, and strip buffers.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display, derive_more::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The hardware channel could not be created (no free channel or memory blocks).
    #[display("could not create a pulse channel on {pin}")]
    ChannelCreate {
        /// Pin the channel was requested for.
        pin: Pin,
    },
    /// The hardware channel could not be rebound to a new pin.
    #[display("could not rebind pulse channel to {pin}")]
    PinRebind {
        /// Pin the channel was being moved to.
        pin: Pin,
    },
    /// No worker could be configured or freed up for this pin within the retry budget.
    #[display(
        "channel exhaustion on {pin}: expected {expected} channels, {available} available"
    )]
    ChannelExhausted {
        /// Pin that requested a worker.
        pin: Pin,
        /// Number of workers the pool was built with.
        expected: usize,
        /// Number of workers that were available at the time of failure.
        available: usize,
    },
    /// A buffer could not grow to the requested number of elements.
    #[display("allocation of {requested} elements failed")]
    Allocation {
        /// Requested element count.
        requested: usize,
    },
    /// The requested worker layout does not fit the chip's channels and memory blocks.
    #[display(
        "worker layout {double_buffer}+{one_shot} needs {blocks_needed} memory blocks, chip has {blocks_available}"
    )]
    InvalidLayout {
        /// Requested double-buffer workers.
        double_buffer: usize,
        /// Requested one-shot workers.
        one_shot: usize,
        /// Memory blocks the layout needs.
        blocks_needed: usize,
        /// Memory blocks the chip provides.
        blocks_available: usize,
    },
}
