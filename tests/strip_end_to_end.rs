#![allow(missing_docs)]
use clockless_kit::channel::Pin;
use clockless_kit::channel::host::SimulatedDriver;
use clockless_kit::controller::{ColorOrder, ScaledPixels, StripController};
use clockless_kit::pool::{PoolConfig, PoolLayout, WorkerPool};
use clockless_kit::symbol::Symbol;
use clockless_kit::timing::{ChipVariant, ChipsetTiming};
use clockless_kit::worker::WorkerKind;
use smart_leds::RGB8;

// 400/400/850 ns on a 10 MHz channel: ZERO = (4, 13), ONE = (8, 9).
const TIMING: ChipsetTiming = ChipsetTiming::new(400, 400, 850, 50);
const RESOLUTION_HZ: u32 = 10_000_000;

fn pool(config: PoolConfig) -> WorkerPool<SimulatedDriver> {
    WorkerPool::new(
        SimulatedDriver::new(ChipVariant::Esp32),
        ChipVariant::Esp32,
        config.with_resolution_hz(RESOLUTION_HZ),
    )
    .expect("default layout")
}

fn pixels() -> [RGB8; 8] {
    [
        RGB8::new(0xFF, 0x00, 0x00),
        RGB8::new(0x00, 0xFF, 0x00),
        RGB8::new(0x00, 0x00, 0xFF),
        RGB8::new(0x80, 0x01, 0x7E),
        RGB8::new(0x00, 0x00, 0x00),
        RGB8::new(0xFF, 0xFF, 0xFF),
        RGB8::new(0xAA, 0x55, 0x0F),
        RGB8::new(0x10, 0x20, 0x30),
    ]
}

/// Expected wire symbols, built bit by bit without the codec.
fn expected_symbols(pixels: &[RGB8]) -> Vec<Symbol> {
    let zero = Symbol::new(4, 13);
    let one = Symbol::new(8, 9);
    let mut symbols = Vec::new();
    for pixel in pixels {
        for byte in [pixel.r, pixel.g, pixel.b] {
            for bit in (0..8).rev() {
                symbols.push(if byte >> bit & 1 == 1 { one } else { zero });
            }
        }
    }
    symbols.push(Symbol::RESET);
    symbols
}

fn show_once(pool: &WorkerPool<SimulatedDriver>) -> WorkerKind {
    let mut strip = StripController::new(pool, Pin(5), TIMING);
    let pixels = pixels();
    strip
        .show(&mut ScaledPixels::new(&pixels).with_color_order(ColorOrder::Rgb))
        .expect("worker available");
    let kind = if pool.available_count_of(WorkerKind::OneShot) < pool.one_shot_count() {
        WorkerKind::OneShot
    } else {
        WorkerKind::DoubleBuffer
    };
    while pool.on_interrupt() {}
    kind
}

#[test]
fn eight_pixels_one_shot_matches_bit_for_bit() {
    let pool = pool(PoolConfig::new());
    assert_eq!(show_once(&pool), WorkerKind::OneShot);

    let transmissions = pool.driver().transmissions();
    assert_eq!(transmissions.len(), 1);
    assert_eq!(transmissions[0].pin, Pin(5));
    assert_eq!(transmissions[0].symbols.len(), 193);
    assert_eq!(transmissions[0].symbols, expected_symbols(&pixels()));
}

#[test]
fn eight_pixels_double_buffer_matches_bit_for_bit() {
    let pool = pool(PoolConfig::new().with_one_shot_threshold_leds(0));
    assert_eq!(show_once(&pool), WorkerKind::DoubleBuffer);

    let transmissions = pool.driver().transmissions();
    assert_eq!(transmissions.len(), 1);
    assert_eq!(transmissions[0].symbols.len(), 193);
    assert_eq!(transmissions[0].symbols, expected_symbols(&pixels()));
}

#[test]
fn strips_on_a_single_worker_take_turns() {
    let pool = WorkerPool::with_layout(
        SimulatedDriver::new(ChipVariant::Esp32C3),
        ChipVariant::Esp32C3,
        PoolConfig::new().with_resolution_hz(RESOLUTION_HZ),
        PoolLayout::new(1, 0),
    )
    .expect("one double-buffer worker fits");
    let first_pixels = pixels();
    let second_pixels = [RGB8::new(0x01, 0x02, 0x03); 2];

    let mut first = StripController::new(&pool, Pin(1), TIMING);
    let mut second = StripController::new(&pool, Pin(2), TIMING);
    for _ in 0..3 {
        first
            .show(&mut ScaledPixels::new(&first_pixels).with_color_order(ColorOrder::Rgb))
            .expect("the only worker is free");
        while pool.on_interrupt() {}
        second
            .show(&mut ScaledPixels::new(&second_pixels).with_color_order(ColorOrder::Rgb))
            .expect("released by the completion interrupt");
        while pool.on_interrupt() {}
    }
    drop(first);
    drop(second);

    let transmissions = pool.driver().transmissions();
    assert_eq!(transmissions.len(), 6);
    assert_eq!(pool.driver().channels_created(), 1, "one channel, rebound per strip");
    for pair in transmissions.chunks(2) {
        assert_eq!(pair[0].pin, Pin(1));
        assert_eq!(pair[0].symbols, expected_symbols(&first_pixels));
        assert_eq!(pair[1].pin, Pin(2));
        assert_eq!(pair[1].symbols, expected_symbols(&second_pixels));
    }
}

#[test]
fn rgbw_strip_sends_four_bytes_per_pixel() {
    let pool = pool(PoolConfig::new());
    let pixels = [RGB8::new(30, 20, 10); 4];
    let mut strip = StripController::new(&pool, Pin(8), TIMING);
    strip
        .show(
            &mut ScaledPixels::new(&pixels)
                .with_color_order(ColorOrder::Rgb)
                .with_rgbw(true),
        )
        .expect("worker available");
    while pool.on_interrupt() {}
    drop(strip);

    let transmissions = pool.driver().transmissions();
    let symbols = &transmissions[0].symbols;
    assert_eq!(symbols.len(), 4 * 32 + 1);
    // First pixel: r=20, g=10, b=0, w=10.
    let expected_first: Vec<Symbol> = expected_symbols(&[RGB8::new(20, 10, 0)])
        .into_iter()
        .take(24)
        .chain(expected_symbols(&[RGB8::new(10, 0, 0)]).into_iter().take(8))
        .collect();
    assert_eq!(symbols[..32], expected_first[..]);
}
