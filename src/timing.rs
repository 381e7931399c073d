//! Chipset pulse timings and the per-chip channel table.
//!
//! A clockless chipset is described by three pulse widths. Every bit starts high and ends
//! low, and the whole bit lasts `T1 + T2 + T3`:
//!
//! ```text
//!  ZERO:  ‾‾‾‾|________________
//!          T1      T2 + T3
//!  ONE:   ‾‾‾‾‾‾‾‾‾‾|__________
//!          T1 + T2      T3
//! ```
//!
//! See [`Chipset`] for the known profiles and [`ChipVariant`] for how many channels each chip
//! provides.

use embassy_time::Duration;

// ============================================================================
// Chipset Timing
// ============================================================================

/// Pulse widths (nanoseconds) and latch time that define one chipset's wire protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChipsetTiming {
    /// High time shared by both bit values.
    pub t1_ns: u32,
    /// Extra high time for a ONE bit (low time for a ZERO bit).
    pub t2_ns: u32,
    /// Low time shared by both bit values.
    pub t3_ns: u32,
    /// Minimum low time after a frame before the strip latches.
    pub reset_us: u32,
}

impl ChipsetTiming {
    /// Create a timing from raw pulse widths.
    #[must_use]
    pub const fn new(t1_ns: u32, t2_ns: u32, t3_ns: u32, reset_us: u32) -> Self {
        Self {
            t1_ns,
            t2_ns,
            t3_ns,
            reset_us,
        }
    }

    /// Total length of one bit.
    #[must_use]
    pub const fn bit_period_ns(&self) -> u32 {
        self.t1_ns
            .saturating_add(self.t2_ns)
            .saturating_add(self.t3_ns)
    }

    /// Latch time as a [`Duration`].
    #[must_use]
    pub const fn reset(&self) -> Duration {
        Duration::from_micros(self.reset_us as u64)
    }
}

/// Known LED chipsets.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Chipset {
    /// WS2812 / WS2812B (800 kHz).
    Ws2812,
    /// WS2811 (800 kHz mode).
    Ws2811,
    /// WS2813, same bit timing as WS2811 with a longer latch.
    Ws2813,
    /// SK6812 (RGB and RGBW).
    Sk6812,
    /// TM1814 (RGBW, inverted-current driver).
    Tm1814,
    /// UCS1903 (400 kHz).
    Ucs1903,
}

impl Chipset {
    /// Timing profile for this chipset.
    #[must_use]
    pub const fn timing(self) -> ChipsetTiming {
        match self {
            Self::Ws2812 => ChipsetTiming::new(250, 625, 375, 280),
            Self::Ws2811 => ChipsetTiming::new(320, 320, 640, 280),
            Self::Ws2813 => ChipsetTiming::new(320, 320, 640, 300),
            Self::Sk6812 => ChipsetTiming::new(300, 600, 300, 80),
            Self::Tm1814 => ChipsetTiming::new(360, 600, 340, 200),
            Self::Ucs1903 => ChipsetTiming::new(500, 1500, 500, 50),
        }
    }
}

impl From<Chipset> for ChipsetTiming {
    fn from(chipset: Chipset) -> Self {
        chipset.timing()
    }
}

// ============================================================================
// Chip Variants
// ============================================================================

/// Memory blocks one double-buffer worker claims (one per half).
pub const MEMORY_BLOCKS_PER_WORKER: usize = 2;

/// Largest memory block across supported chips, in symbols.
pub const MAX_BLOCK_SYMBOLS: usize = 64;

/// Chip families with an RMT-style pulse peripheral.
///
/// The channel count is fixed per chip and known statically; it is never discovered at
/// runtime.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChipVariant {
    /// ESP32: 8 channels, 64-symbol blocks.
    Esp32,
    /// ESP32-S2: 4 channels, 64-symbol blocks.
    Esp32S2,
    /// ESP32-S3: 4 transmit channels, 48-symbol blocks.
    Esp32S3,
    /// ESP32-C3: 2 transmit channels, 48-symbol blocks.
    Esp32C3,
    /// ESP32-C6: 2 transmit channels, 48-symbol blocks.
    Esp32C6,
    /// ESP32-H2: 2 transmit channels, 48-symbol blocks.
    Esp32H2,
}

impl ChipVariant {
    /// Variant selected by cargo feature (`esp32` when none is selected).
    #[cfg(feature = "esp32s2")]
    pub const TARGET: Self = Self::Esp32S2;
    /// Variant selected by cargo feature (`esp32` when none is selected).
    #[cfg(feature = "esp32s3")]
    pub const TARGET: Self = Self::Esp32S3;
    /// Variant selected by cargo feature (`esp32` when none is selected).
    #[cfg(feature = "esp32c3")]
    pub const TARGET: Self = Self::Esp32C3;
    /// Variant selected by cargo feature (`esp32` when none is selected).
    #[cfg(feature = "esp32c6")]
    pub const TARGET: Self = Self::Esp32C6;
    /// Variant selected by cargo feature (`esp32` when none is selected).
    #[cfg(feature = "esp32h2")]
    pub const TARGET: Self = Self::Esp32H2;
    /// Variant selected by cargo feature (`esp32` when none is selected).
    #[cfg(not(any(
        feature = "esp32s2",
        feature = "esp32s3",
        feature = "esp32c3",
        feature = "esp32c6",
        feature = "esp32h2"
    )))]
    pub const TARGET: Self = Self::Esp32;

    /// Transmit channels on this chip. Each owns one memory block.
    #[must_use]
    pub const fn tx_channels(self) -> usize {
        match self {
            Self::Esp32 => 8,
            Self::Esp32S2 | Self::Esp32S3 => 4,
            Self::Esp32C3 | Self::Esp32C6 | Self::Esp32H2 => 2,
        }
    }

    /// Symbols per memory block.
    #[must_use]
    pub const fn block_symbols(self) -> usize {
        match self {
            Self::Esp32 | Self::Esp32S2 => 64,
            Self::Esp32S3 | Self::Esp32C3 | Self::Esp32C6 | Self::Esp32H2 => 48,
        }
    }

    /// Memory blocks available for transmission.
    #[must_use]
    pub const fn memory_blocks(self) -> usize {
        self.tx_channels()
    }

    /// Maximum double-buffer workers this chip can host.
    ///
    /// | Channels | Workers |
    /// |----------|---------|
    /// | 8        | 4       |
    /// | 4        | 2       |
    /// | 2        | 1       |
    #[must_use]
    pub const fn max_workers(self) -> usize {
        self.tx_channels() / MEMORY_BLOCKS_PER_WORKER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_workers_follows_channel_table() {
        assert_eq!(ChipVariant::Esp32.max_workers(), 4);
        assert_eq!(ChipVariant::Esp32S3.max_workers(), 2);
        assert_eq!(ChipVariant::Esp32C3.max_workers(), 1);
    }

    #[test]
    fn block_symbols_hold_whole_bytes() {
        for variant in [
            ChipVariant::Esp32,
            ChipVariant::Esp32S2,
            ChipVariant::Esp32S3,
            ChipVariant::Esp32C3,
            ChipVariant::Esp32C6,
            ChipVariant::Esp32H2,
        ] {
            assert_eq!(variant.block_symbols() % 8, 0);
            assert!(variant.block_symbols() <= MAX_BLOCK_SYMBOLS);
        }
    }

    #[test]
    fn chipset_converts_to_timing() {
        let timing: ChipsetTiming = Chipset::Ws2812.into();
        assert_eq!(timing.bit_period_ns(), 1250);
        assert_eq!(timing.reset(), Duration::from_micros(280));
    }
}
