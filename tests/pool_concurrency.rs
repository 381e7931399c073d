#![allow(missing_docs)]
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use clockless_kit::channel::Pin;
use clockless_kit::channel::host::SimulatedDriver;
use clockless_kit::controller::{ScaledPixels, StripController};
use clockless_kit::pool::{PoolConfig, WorkerPool};
use clockless_kit::symbol::{Symbol, SymbolTemplates, encode_buffer, encoded_len, tick_period_ns};
use clockless_kit::timing::{ChipVariant, Chipset};
use clockless_kit::worker::DEFAULT_RESOLUTION_HZ;
use embassy_time::Duration;
use smart_leds::RGB8;

fn esp32_pool() -> WorkerPool<SimulatedDriver> {
    let config = PoolConfig::new()
        .with_poll_interval(Duration::from_micros(5))
        .with_retry_limit(2_000_000);
    WorkerPool::new(
        SimulatedDriver::new(ChipVariant::Esp32),
        ChipVariant::Esp32,
        config,
    )
    .expect("default layout")
}

/// Stand-in for the peripheral interrupt: service the pool until told to stop.
fn run_hardware(pool: &WorkerPool<SimulatedDriver>, running: &AtomicBool) {
    while running.load(Ordering::Acquire) {
        if !pool.on_interrupt() {
            thread::yield_now();
        }
    }
}

#[test]
fn concurrent_borrowers_never_share_a_worker() {
    let pool = esp32_pool();
    let in_use: [AtomicBool; 8] = Default::default();
    let borrowed = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    thread::scope(|scope| {
        for strip in 0..8u8 {
            let (pool, in_use, borrowed, peak) = (&pool, &in_use, &borrowed, &peak);
            scope.spawn(move || {
                for frame in 0..50usize {
                    let num_bytes = if (frame + usize::from(strip)) % 2 == 0 { 30 } else { 900 };
                    let lease = pool
                        .acquire_worker(num_bytes, Pin(strip), Chipset::Ws2812.timing())
                        .expect("a worker frees up");
                    let slot = &in_use[usize::from(lease.id().0)];
                    assert!(
                        !slot.swap(true, Ordering::AcqRel),
                        "worker {} handed out twice",
                        lease.id()
                    );
                    let now = borrowed.fetch_add(1, Ordering::AcqRel) + 1;
                    peak.fetch_max(now, Ordering::AcqRel);
                    thread::yield_now();
                    borrowed.fetch_sub(1, Ordering::AcqRel);
                    slot.store(false, Ordering::Release);
                    pool.release_worker(lease);
                }
            });
        }
    });

    assert!(peak.load(Ordering::Acquire) <= pool.worker_count());
    assert_eq!(pool.available_count(), pool.worker_count());
}

#[test]
fn strips_share_workers_while_transmitting() {
    let pool = esp32_pool();
    let running = AtomicBool::new(true);
    let lengths = [4usize, 8, 60, 150, 250, 400, 12];

    thread::scope(|scope| {
        scope.spawn(|| run_hardware(&pool, &running));

        let strips: Vec<_> = lengths
            .iter()
            .enumerate()
            .map(|(index, &length)| {
                let pool = &pool;
                scope.spawn(move || {
                    let pin = Pin(u8::try_from(index).expect("few strips"));
                    let pixels = vec![RGB8::new(0x12, 0x34, 0x56); length];
                    let mut strip = StripController::new(pool, pin, Chipset::Ws2812);
                    for _ in 0..8 {
                        strip
                            .show(&mut ScaledPixels::new(&pixels))
                            .expect("a worker frees up");
                    }
                })
            })
            .collect();
        for strip in strips {
            strip.join().expect("strip thread");
        }
        pool.wait_idle();
        running.store(false, Ordering::Release);
    });

    let templates = SymbolTemplates::new(
        &Chipset::Ws2812.timing(),
        tick_period_ns(DEFAULT_RESOLUTION_HZ),
    );
    let transmissions = pool.driver().transmissions();
    assert_eq!(transmissions.len(), lengths.len() * 8);
    for transmission in &transmissions {
        let length = lengths[usize::from(transmission.pin.0)];
        let bytes: Vec<u8> = [0x34, 0x12, 0x56].repeat(length);
        let mut expected = vec![Symbol::RESET; encoded_len(bytes.len())];
        encode_buffer(&templates, &bytes, &mut expected);
        assert_eq!(transmission.symbols, expected, "strip on {}", transmission.pin);
    }
    assert_eq!(pool.available_count(), pool.worker_count());
}

#[test]
fn async_completion_follows_the_interrupt() {
    let pool = esp32_pool();
    let running = AtomicBool::new(true);
    let pixels = [RGB8::new(1, 2, 3); 300];

    thread::scope(|scope| {
        scope.spawn(|| run_hardware(&pool, &running));
        let mut strip = StripController::new(&pool, Pin(9), Chipset::Ws2813);
        strip
            .show(&mut ScaledPixels::new(&pixels))
            .expect("worker available");
        embassy_futures::block_on(strip.wait_async());
        assert!(!strip.is_transmitting());
        drop(strip);
        running.store(false, Ordering::Release);
    });

    assert_eq!(pool.driver().transmissions()[0].symbols.len(), 300 * 24 + 1);
}
