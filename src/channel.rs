//! The hardware pulse-channel interface consumed by the workers.
//!
//! A platform implements [`ChannelDriver`] (channel creation) and [`PulseChannel`] (one
//! channel's memory, start/stop, and interrupt status). The model follows an RMT peripheral:
//!
//! - Each channel owns one or more memory blocks of [`Symbol`]s.
//! - In [streaming mode](ChannelMode::Streaming), the channel reads its memory as a ring.
//!   It raises [`ChannelEvent::Threshold`] each time a configured number of symbols has been
//!   sent.
//! - In [one-shot mode](ChannelMode::OneShot), the channel takes a complete symbol sequence in
//!   one [`transmit`](PulseChannel::transmit).
//! - Either way, the channel stops at the first zero-duration symbol and raises
//!   [`ChannelEvent::Done`].
//!
//! Interrupts are not delivered through callbacks. The platform's interrupt handler calls
//! [`WorkerPool::on_interrupt`](crate::pool::WorkerPool::on_interrupt). That call reads and
//! clears each busy channel's pending status through [`PulseChannel::take_event`].
//!
//! The `host` submodule (feature `host`) provides a simulated peripheral for host testing.

use crate::Result;
use crate::symbol::Symbol;

#[cfg(any(test, feature = "host"))]
pub mod host;

/// Output GPIO number.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, derive_more::Display, derive_more::From,
)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[display("GPIO{_0}")]
pub struct Pin(pub u8);

/// How a channel's memory is fed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelMode {
    /// Software refills ring memory on threshold interrupts.
    Streaming,
    /// The whole sequence is handed over at once; only a completion interrupt fires.
    OneShot,
}

/// Parameters for creating a channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelConfig {
    /// Output pin.
    pub pin: Pin,
    /// Channel tick rate.
    pub resolution_hz: u32,
    /// Memory blocks to claim for this channel.
    pub memory_blocks: usize,
    /// Feeding mode.
    pub mode: ChannelMode,
}

/// Pending interrupt status read from a channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelEvent {
    /// The configured number of symbols has been sent since the last threshold.
    Threshold,
    /// The channel reached an end marker and stopped.
    Done,
}

/// Creates hardware channels.
pub trait ChannelDriver {
    /// Channel type produced by this driver.
    type Channel: PulseChannel;

    /// Create a channel bound to `config.pin`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelCreate`](crate::Error::ChannelCreate) when no channel or not
    /// enough memory blocks are free.
    fn create(&self, config: &ChannelConfig) -> Result<Self::Channel>;
}

/// One hardware pulse-generation channel.
///
/// A channel has exactly one logical owner (a worker). The interrupt path reaches it through
/// that owner.
pub trait PulseChannel {
    /// Symbols the channel's memory holds.
    fn memory_len(&self) -> usize;

    /// Route the channel output to a different pin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PinRebind`](crate::Error::PinRebind) if the pin cannot be used.
    fn rebind(&mut self, pin: Pin) -> Result<()>;

    /// Enable the channel output.
    fn enable(&mut self);

    /// Disable the channel output.
    fn disable(&mut self);

    /// Write `symbols` into channel memory starting at `offset`.
    fn write_memory(&mut self, offset: usize, symbols: &[Symbol]);

    /// Start sending from memory offset 0, wrapping around. Raise a threshold event every
    /// `threshold` symbols.
    fn start_stream(&mut self, threshold: usize);

    /// Stop raising threshold events. The stream ends at the next end marker.
    fn finish_stream(&mut self);

    /// Send `symbols` in one transfer. The sequence must end with an end marker.
    fn transmit(&mut self, symbols: &[Symbol]);

    /// Read and clear the pending interrupt status.
    fn take_event(&mut self) -> Option<ChannelEvent>;
}
