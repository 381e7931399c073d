//! Per-strip controller: owns the pixel bytes and borrows a worker for each frame.
//!
//! A frame goes through three steps, which [`StripController::show`] runs in order:
//!
//! 1. [`on_before_show`](StripController::on_before_show) waits until the previous frame
//!    is off the wire.
//! 2. [`load_pixel_data`](StripController::load_pixel_data) copies and scales pixels from a
//!    [`PixelSource`] into the strip's own buffer.
//! 3. [`on_end_show`](StripController::on_end_show) borrows a worker and starts the frame.
//!    It returns without waiting. The next frame waits instead.
//!
//! # Example
//!
//! ```rust
//! # #[cfg(feature = "host")]
//! # fn main() -> clockless_kit::Result<()> {
//! use clockless_kit::channel::Pin;
//! use clockless_kit::channel::host::SimulatedDriver;
//! use clockless_kit::controller::{ColorOrder, ScaledPixels, StripController};
//! use clockless_kit::pool::{PoolConfig, WorkerPool};
//! use clockless_kit::timing::{ChipVariant, Chipset};
//! use smart_leds::RGB8;
//!
//! let pool = WorkerPool::new(
//!     SimulatedDriver::new(ChipVariant::Esp32),
//!     ChipVariant::Esp32,
//!     PoolConfig::new(),
//! )?;
//! let mut strip = StripController::new(&pool, Pin(2), Chipset::Ws2812);
//!
//! let pixels = [RGB8::new(255, 0, 0); 8];
//! strip.show(&mut ScaledPixels::new(&pixels).with_color_order(ColorOrder::Grb))?;
//!
//! // Stand-in for the peripheral interrupt.
//! while pool.on_interrupt() {}
//! assert_eq!(pool.driver().transmissions()[0].symbols.len(), 8 * 3 * 8 + 1);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "host"))]
//! # fn main() {}
//! ```

use portable_atomic_util::Arc;
use smart_leds::RGB8;

use crate::buffer::{GrowableBuffer, GrowthPolicy};
use crate::channel::{ChannelDriver, Pin};
use crate::log::{debug, error, warn};
use crate::pool::WorkerPool;
use crate::timing::ChipsetTiming;
use crate::worker::{SharedFrame, WorkerLease};
use crate::{Error, Result};

// ============================================================================
// Pixel Sources
// ============================================================================

/// A stream of pixels, already converted to wire byte order.
pub trait PixelSource {
    /// Whether another pixel is available.
    fn has_next(&self) -> bool;

    /// Pixels left, used to size the strip buffer.
    fn remaining(&self) -> usize;

    /// Whether pixels carry a white channel.
    fn is_rgbw(&self) -> bool;

    /// Next pixel as three wire-order bytes.
    fn load_and_scale_rgb(&mut self) -> [u8; 3];

    /// Next pixel as three wire-order bytes followed by white.
    fn load_and_scale_rgbw(&mut self) -> [u8; 4];
}

/// Order in which a chipset expects the color bytes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ColorOrder {
    /// Red, green, blue.
    Rgb,
    /// Red, blue, green.
    Rbg,
    /// Green, red, blue (WS2812 native).
    #[default]
    Grb,
    /// Green, blue, red.
    Gbr,
    /// Blue, red, green.
    Brg,
    /// Blue, green, red.
    Bgr,
}

impl ColorOrder {
    /// Arrange `color` in wire order.
    #[must_use]
    pub const fn arrange(self, color: RGB8) -> [u8; 3] {
        let RGB8 { r, g, b } = color;
        match self {
            Self::Rgb => [r, g, b],
            Self::Rbg => [r, b, g],
            Self::Grb => [g, r, b],
            Self::Gbr => [g, b, r],
            Self::Brg => [b, r, g],
            Self::Bgr => [b, g, r],
        }
    }
}

/// Scale a channel by `scale / 256`, with 255 meaning full brightness.
#[must_use]
pub const fn scale8(value: u8, scale: u8) -> u8 {
    ((value as u16 * (scale as u16 + 1)) >> 8) as u8
}

/// Pixels from an [`RGB8`] slice with brightness, color order, and optional white
/// extraction.
#[derive(Clone, Debug)]
pub struct ScaledPixels<'a> {
    pixels: core::slice::Iter<'a, RGB8>,
    brightness: u8,
    order: ColorOrder,
    rgbw: bool,
}

impl<'a> ScaledPixels<'a> {
    /// Full brightness, GRB order, no white channel.
    #[must_use]
    pub fn new(pixels: &'a [RGB8]) -> Self {
        Self {
            pixels: pixels.iter(),
            brightness: u8::MAX,
            order: ColorOrder::default(),
            rgbw: false,
        }
    }

    /// Scale every channel by `brightness / 256` (255 leaves values unchanged).
    #[must_use]
    pub const fn with_brightness(mut self, brightness: u8) -> Self {
        self.brightness = brightness;
        self
    }

    /// Emit bytes in `order`.
    #[must_use]
    pub const fn with_color_order(mut self, order: ColorOrder) -> Self {
        self.order = order;
        self
    }

    /// Emit a fourth white byte. White is the common part of red, green, and blue, and is
    /// taken out of each of them.
    #[must_use]
    pub const fn with_rgbw(mut self, rgbw: bool) -> Self {
        self.rgbw = rgbw;
        self
    }

    fn next_scaled(&mut self) -> RGB8 {
        let color = self.pixels.next().copied().unwrap_or_default();
        RGB8::new(
            scale8(color.r, self.brightness),
            scale8(color.g, self.brightness),
            scale8(color.b, self.brightness),
        )
    }
}

impl PixelSource for ScaledPixels<'_> {
    fn has_next(&self) -> bool {
        !self.pixels.as_slice().is_empty()
    }

    fn remaining(&self) -> usize {
        self.pixels.len()
    }

    fn is_rgbw(&self) -> bool {
        self.rgbw
    }

    fn load_and_scale_rgb(&mut self) -> [u8; 3] {
        let color = self.next_scaled();
        self.order.arrange(color)
    }

    fn load_and_scale_rgbw(&mut self) -> [u8; 4] {
        let color = self.next_scaled();
        let white = color.r.min(color.g).min(color.b);
        let [c0, c1, c2] = self.order.arrange(RGB8::new(
            color.r - white,
            color.g - white,
            color.b - white,
        ));
        [c0, c1, c2, white]
    }
}

// ============================================================================
// Strip Controller
// ============================================================================

/// One LED strip: its pin, its chipset timing, and its pixel bytes.
///
/// The pixel buffer grows with 25% headroom and never shrinks. While a frame is on the wire
/// the buffer is shared with the worker sending it; the next frame waits for that worker to
/// let go before writing.
pub struct StripController<'a, D: ChannelDriver> {
    pool: &'a WorkerPool<D>,
    pin: Pin,
    timing: ChipsetTiming,
    pixels: SharedFrame,
    lease: Option<WorkerLease<'a, D>>,
}

impl<'a, D: ChannelDriver> StripController<'a, D> {
    /// A strip on `pin`. No memory or worker is claimed until the first frame.
    pub fn new(pool: &'a WorkerPool<D>, pin: Pin, timing: impl Into<ChipsetTiming>) -> Self {
        Self {
            pool,
            pin,
            timing: timing.into(),
            pixels: Arc::new(GrowableBuffer::new(GrowthPolicy::Headroom)),
            lease: None,
        }
    }

    /// Output pin.
    #[must_use]
    pub const fn pin(&self) -> Pin {
        self.pin
    }

    /// Chipset timing.
    #[must_use]
    pub const fn timing(&self) -> ChipsetTiming {
        self.timing
    }

    /// Bytes the next [`on_end_show`](Self::on_end_show) will send.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.pixels.len()
    }

    /// Bytes the pixel buffer holds without growing.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pixels.capacity()
    }

    /// How many times the pixel buffer has grown.
    #[must_use]
    pub fn reallocations(&self) -> usize {
        self.pixels.reallocations()
    }

    /// Whether the previous frame is still on the wire.
    #[must_use]
    pub fn is_transmitting(&self) -> bool {
        self.lease.as_ref().is_some_and(|lease| !lease.is_done())
    }

    /// Copy the pixels of `source` into the strip buffer.
    ///
    /// Waits for the previous frame first. If the buffer cannot grow, the frame is dropped
    /// with a warning and nothing is pending.
    pub fn load_pixel_data(&mut self, source: &mut impl PixelSource) {
        self.wait_for_previous();
        let bytes_per_pixel = if source.is_rgbw() { 4 } else { 3 };
        let required = source.remaining().saturating_mul(bytes_per_pixel);

        let Some(buffer) = Arc::get_mut(&mut self.pixels) else {
            // Only reachable if a worker kept its frame handle past completion.
            warn!("{}: pixel buffer still in use; frame dropped", self.pin);
            return;
        };
        if let Err(error) = buffer.resize(required) {
            warn!("{}: {}; frame dropped", self.pin, error);
            return;
        }

        let mut filled = 0;
        for pixel in buffer.as_mut_slice().chunks_exact_mut(bytes_per_pixel) {
            if !source.has_next() {
                break;
            }
            if bytes_per_pixel == 4 {
                pixel.copy_from_slice(&source.load_and_scale_rgbw());
            } else {
                pixel.copy_from_slice(&source.load_and_scale_rgb());
            }
            filled += bytes_per_pixel;
        }
        buffer.truncate(filled);
    }

    /// Wait until the previous frame is off the wire.
    pub fn on_before_show(&mut self) {
        self.wait_for_previous();
    }

    /// Start sending the loaded pixels.
    ///
    /// # Panics
    ///
    /// Panics on channel exhaustion, after logging the channel counts, the pin, and the
    /// pool diagnostics. A strip that silently never lights is worse than a loud failure.
    /// Use [`try_end_show`](Self::try_end_show) to get the error instead.
    pub fn on_end_show(&mut self) {
        if let Err(error) = self.try_end_show() {
            if let Error::ChannelExhausted {
                expected,
                available,
                ..
            } = error
            {
                error!(
                    "channel exhaustion on {}: expected {} channels, {} available",
                    self.pin,
                    expected,
                    available
                );
            }
            self.pool.log_diagnostics();
            panic!("{}: {}", self.pin, error);
        }
    }

    /// Start sending the loaded pixels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelExhausted`] if no worker could be acquired.
    pub fn try_end_show(&mut self) -> Result<()> {
        self.wait_for_previous();
        let num_bytes = self.pixels.len();
        let lease = self.pool.acquire_worker(num_bytes, self.pin, self.timing)?;
        debug!(
            "{}: sending {} bytes on {} worker {}",
            self.pin,
            num_bytes,
            lease.kind(),
            lease.id()
        );
        lease.transmit(&self.pixels);
        self.lease = Some(lease);
        Ok(())
    }

    /// Run a whole frame: wait, load `source`, and start sending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelExhausted`] if no worker could be acquired.
    pub fn show(&mut self, source: &mut impl PixelSource) -> Result<()> {
        self.on_before_show();
        self.load_pixel_data(source);
        self.try_end_show()
    }

    /// Wait for the previous frame asynchronously. The lease is kept until the next
    /// blocking call releases it.
    pub async fn wait_async(&self) {
        if let Some(lease) = &self.lease {
            lease.completion().await;
        }
    }

    fn wait_for_previous(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.wait();
            self.pool.release_worker(lease);
        }
    }
}

impl<D: ChannelDriver> Drop for StripController<'_, D> {
    fn drop(&mut self) {
        self.wait_for_previous();
    }
}
