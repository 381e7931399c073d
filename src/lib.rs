//! Drive NeoPixel-style (WS2812) "clockless" LED strips through a small pool of shared
//! RMT-style pulse channels.
//!
//! Each strip is a [`StripController`](controller::StripController) that owns its pixel bytes.
//! At show time it borrows a worker from the [`WorkerPool`](pool::WorkerPool). The worker
//! converts bytes to timed pulse [`Symbol`](symbol::Symbol)s and streams them out of one
//! hardware channel. Two strategies share the pool:
//!
//! - **Double buffering** ([`DoubleBufferWorker`](worker::double_buffer::DoubleBufferWorker)):
//!   the channel memory is split in two halves that an interrupt refills while the other half
//!   transmits. Memory stays fixed regardless of strip length, which suits long strips.
//! - **One-shot** ([`OneShotWorker`](worker::one_shot::OneShotWorker)): the whole strip is
//!   encoded up front and handed to the channel in one transfer. There is no mid-frame
//!   interrupt work, which suits short strips.
//!
//! # Glossary
//!
//! - **Channel:** a hardware peripheral instance that generates a timed pulse train on one
//!   output pin. The ESP32 has 8; the ESP32-S3 has 4 transmit channels; the ESP32-C3 has 2.
//! - **Memory block:** the per-channel symbol RAM (64 symbols on ESP32/S2, 48 elsewhere). A
//!   double-buffer worker claims two blocks.
//! - **Symbol:** a (high-duration, low-duration) pulse pair that represents one bit.
//! - **Channel exhaustion:** more strips want to transmit at once than there are channels,
//!   and none frees up within the retry budget.
#![cfg_attr(not(any(test, feature = "host")), no_std)]

extern crate alloc;

// Compile-time check: at most one chip variant may be selected
const _: () = assert!(
    (cfg!(feature = "esp32") as usize)
        + (cfg!(feature = "esp32s2") as usize)
        + (cfg!(feature = "esp32s3") as usize)
        + (cfg!(feature = "esp32c3") as usize)
        + (cfg!(feature = "esp32c6") as usize)
        + (cfg!(feature = "esp32h2") as usize)
        <= 1,
    "Enable at most one chip feature: 'esp32', 'esp32s2', 'esp32s3', 'esp32c3', 'esp32c6' or 'esp32h2' (use default-features = false)"
);

#[cfg(all(feature = "defmt", feature = "log"))]
compile_error!("Cannot enable both 'defmt' and 'log' features simultaneously");

#[cfg(not(any(feature = "defmt", feature = "log")))]
compile_error!("Must enable exactly one logging feature: 'defmt' or 'log'");

pub mod buffer;
pub mod channel;
pub mod controller;
mod error;
pub mod pool;
pub mod symbol;
pub mod timing;
pub mod worker;

// Re-export error types and result (used throughout)
pub use crate::error::{Error, Result};

#[cfg(feature = "defmt")]
mod log {
    pub(crate) use defmt::{debug, error, info, trace, warn};
}

#[cfg(feature = "log")]
mod log {
    pub(crate) use ::log::{debug, error, info, trace, warn};
}
