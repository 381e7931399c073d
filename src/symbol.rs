//! Pixel bytes to hardware pulse symbols.
//!
//! The codec is pure and allocation-free. It is safe to call from interrupt context: the
//! double-buffer refill interrupt uses [`encode_byte`] directly.

use crate::timing::ChipsetTiming;

// ============================================================================
// Symbol
// ============================================================================

const DURATION_MASK: u32 = 0x7FFF;
const LEVEL0_BIT: u32 = 1 << 15;
const DURATION1_SHIFT: u32 = 16;
const LEVEL1_BIT: u32 = 1 << 31;

/// Largest duration a symbol half can hold, in ticks.
pub const MAX_DURATION_TICKS: u16 = 0x7FFF;

/// One pulse-channel memory word: a high phase followed by a low phase.
///
/// Layout (RMT): `duration0:15 | level0:1 | duration1:15 | level1:1`.
#[derive(Clone, Copy, Default, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct Symbol(u32);

impl Symbol {
    /// End-of-transmission marker. The channel stops at the first zero duration.
    pub const RESET: Self = Self(0);

    /// A high pulse of `high_ticks` followed by a low pulse of `low_ticks`.
    ///
    /// Durations saturate at [`MAX_DURATION_TICKS`].
    #[must_use]
    pub const fn new(high_ticks: u16, low_ticks: u16) -> Self {
        let high = saturate(high_ticks);
        let low = saturate(low_ticks);
        Self(high | LEVEL0_BIT | (low << DURATION1_SHIFT))
    }

    /// Raw memory word.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Duration of the high phase, in ticks.
    #[must_use]
    pub const fn high_ticks(self) -> u16 {
        (self.0 & DURATION_MASK) as u16
    }

    /// Duration of the low phase, in ticks.
    #[must_use]
    pub const fn low_ticks(self) -> u16 {
        ((self.0 >> DURATION1_SHIFT) & DURATION_MASK) as u16
    }

    /// Level driven during the first phase.
    #[must_use]
    pub const fn level0(self) -> bool {
        self.0 & LEVEL0_BIT != 0
    }

    /// Level driven during the second phase.
    #[must_use]
    pub const fn level1(self) -> bool {
        self.0 & LEVEL1_BIT != 0
    }

    /// Whether the channel stops when it reads this symbol.
    #[must_use]
    pub const fn is_end_marker(self) -> bool {
        self.high_ticks() == 0 || self.low_ticks() == 0
    }
}

const fn saturate(ticks: u16) -> u32 {
    if ticks > MAX_DURATION_TICKS {
        MAX_DURATION_TICKS as u32
    } else {
        ticks as u32
    }
}

impl core::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Symbol({}, {})", self.high_ticks(), self.low_ticks())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Symbol {
    fn format(&self, fmt: defmt::Formatter<'_>) {
        defmt::write!(fmt, "Symbol({}, {})", self.high_ticks(), self.low_ticks());
    }
}

// ============================================================================
// Templates
// ============================================================================

/// The two bit templates for one timing configuration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SymbolTemplates {
    /// Symbol for a 0 bit: high `T1`, low `T2 + T3`.
    pub zero: Symbol,
    /// Symbol for a 1 bit: high `T1 + T2`, low `T3`.
    pub one: Symbol,
}

impl SymbolTemplates {
    /// Compute templates for `timing` on a channel whose tick lasts `tick_period_ns`.
    ///
    /// Durations are rounded to the nearest tick. Zero-tick results are not rejected.
    #[must_use]
    pub const fn new(timing: &ChipsetTiming, tick_period_ns: u32) -> Self {
        let t1 = timing.t1_ns;
        let t2 = timing.t2_ns;
        let t3 = timing.t3_ns;
        Self {
            zero: Symbol::new(
                ns_to_ticks(t1, tick_period_ns),
                ns_to_ticks(t2.saturating_add(t3), tick_period_ns),
            ),
            one: Symbol::new(
                ns_to_ticks(t1.saturating_add(t2), tick_period_ns),
                ns_to_ticks(t3, tick_period_ns),
            ),
        }
    }

    /// Template for one bit value.
    #[inline(always)]
    #[must_use]
    pub const fn for_bit(&self, bit: bool) -> Symbol {
        if bit { self.one } else { self.zero }
    }
}

/// Round-to-nearest conversion: `(ns + tick / 2) / tick`, saturating at the symbol field.
#[must_use]
pub const fn ns_to_ticks(ns: u32, tick_period_ns: u32) -> u16 {
    if tick_period_ns == 0 {
        return MAX_DURATION_TICKS;
    }
    let ticks = (ns as u64 + (tick_period_ns / 2) as u64) / tick_period_ns as u64;
    if ticks > MAX_DURATION_TICKS as u64 {
        MAX_DURATION_TICKS
    } else {
        ticks as u16
    }
}

/// Tick length of a channel clocked at `resolution_hz`.
#[must_use]
pub const fn tick_period_ns(resolution_hz: u32) -> u32 {
    if resolution_hz == 0 {
        0
    } else {
        1_000_000_000 / resolution_hz
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Number of symbols [`encode_buffer`] writes for `byte_count` bytes.
#[must_use]
pub const fn encoded_len(byte_count: usize) -> usize {
    byte_count.saturating_mul(8).saturating_add(1)
}

/// Write the 8 symbols for `byte`, most significant bit first.
#[inline]
pub fn encode_byte(templates: &SymbolTemplates, byte: u8, out: &mut [Symbol; 8]) {
    for (bit_index, slot) in out.iter_mut().enumerate() {
        *slot = templates.for_bit(byte & (0x80 >> bit_index) != 0);
    }
}

/// Encode `bytes` into `out`, followed by a single [`Symbol::RESET`].
///
/// Returns the number of symbols written, always `bytes.len() * 8 + 1`.
///
/// # Panics
///
/// Panics if `out` is shorter than [`encoded_len`]`(bytes.len())`.
pub fn encode_buffer(templates: &SymbolTemplates, bytes: &[u8], out: &mut [Symbol]) -> usize {
    let total = encoded_len(bytes.len());
    assert!(
        out.len() >= total,
        "symbol buffer holds {} symbols, {} required",
        out.len(),
        total
    );
    let (data, tail) = out.split_at_mut(total - 1);
    for (byte, chunk) in bytes.iter().zip(data.chunks_exact_mut(8)) {
        let mut symbols = [Symbol::RESET; 8];
        encode_byte(templates, *byte, &mut symbols);
        chunk.copy_from_slice(&symbols);
    }
    if let Some(reset) = tail.first_mut() {
        *reset = Symbol::RESET;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMING_400_400_850: ChipsetTiming = ChipsetTiming::new(400, 400, 850, 50);

    fn templates() -> SymbolTemplates {
        SymbolTemplates::new(&TIMING_400_400_850, 100)
    }

    #[test]
    fn templates_round_to_nearest_tick() {
        let templates = templates();
        assert_eq!(
            (templates.zero.high_ticks(), templates.zero.low_ticks()),
            (4, 13)
        );
        assert_eq!(
            (templates.one.high_ticks(), templates.one.low_ticks()),
            (8, 9)
        );
        assert!(templates.one.level0() && !templates.one.level1());
    }

    #[test]
    fn encode_byte_is_msb_first() {
        let templates = templates();
        let mut out = [Symbol::RESET; 8];
        encode_byte(&templates, 0b1000_0000, &mut out);
        assert_eq!(out[0], templates.one);
        assert!(out[1..].iter().all(|symbol| *symbol == templates.zero));
    }

    #[test]
    fn encode_byte_matches_every_bit_of_every_byte() {
        let templates = templates();
        let mut out = [Symbol::RESET; 8];
        for byte in 0..=u8::MAX {
            encode_byte(&templates, byte, &mut out);
            for (bit_index, symbol) in out.iter().enumerate() {
                let bit = (byte >> (7 - bit_index)) & 1 == 1;
                assert_eq!(*symbol, templates.for_bit(bit), "byte {byte:#04x} bit {bit_index}");
            }
        }
    }

    #[test]
    fn encode_buffer_appends_reset() {
        let templates = templates();
        let bytes = [0xFF, 0x00, 0xA5];
        let mut out = [Symbol::new(1, 1); 32];
        let written = encode_buffer(&templates, &bytes, &mut out);
        assert_eq!(written, 25);
        assert_eq!(out[24], Symbol::RESET);
        assert!(out[..8].iter().all(|symbol| *symbol == templates.one));
        assert!(out[8..16].iter().all(|symbol| *symbol == templates.zero));
    }

    #[test]
    fn encode_buffer_of_nothing_is_a_single_reset() {
        let mut out = [Symbol::new(1, 1); 1];
        assert_eq!(encode_buffer(&templates(), &[], &mut out), 1);
        assert_eq!(out[0], Symbol::RESET);
        assert_eq!(encoded_len(0), 1);
    }

    #[test]
    fn zero_tick_timing_is_accepted() {
        let templates = SymbolTemplates::new(&ChipsetTiming::new(10, 10, 10, 0), 100);
        assert_eq!(templates.zero.high_ticks(), 0);
        assert!(templates.zero.is_end_marker());
    }

    #[test]
    fn durations_saturate() {
        let symbol = Symbol::new(u16::MAX, 3);
        assert_eq!(symbol.high_ticks(), MAX_DURATION_TICKS);
        assert_eq!(symbol.low_ticks(), 3);
        assert_eq!(ns_to_ticks(u32::MAX, 1), MAX_DURATION_TICKS);
        assert_eq!(tick_period_ns(40_000_000), 25);
    }
}
