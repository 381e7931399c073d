//! Simulated pulse peripheral for host testing and bring-up.
//!
//! [`SimulatedDriver`] hands out [`SimulatedChannel`]s from a fixed budget of channels and
//! memory blocks, the way the chip does. A channel makes progress only when its interrupt
//! status is read ([`PulseChannel::take_event`]). So the "hardware" advances exactly as fast
//! as the code calling [`WorkerPool::on_interrupt`](crate::pool::WorkerPool::on_interrupt)
//! lets it, and the interrupt handler always keeps up.
//!
//! Every finished transmission, end marker included, is recorded as a [`Transmission`] so
//! tests can compare the wire output bit for bit.

use alloc::collections::BTreeSet;
use alloc::sync::Arc;
use alloc::vec::Vec;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::channel::{ChannelConfig, ChannelDriver, ChannelEvent, ChannelMode, Pin, PulseChannel};
use crate::symbol::Symbol;
use crate::timing::ChipVariant;
use crate::{Error, Result};

/// One completed transmission as it appeared on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transmission {
    /// Index of the channel that sent it (creation order).
    pub channel: usize,
    /// Pin it was sent on.
    pub pin: Pin,
    /// Mode the channel was created in.
    pub mode: ChannelMode,
    /// Symbols sent, ending with the end marker.
    pub symbols: Vec<Symbol>,
}

#[derive(Debug)]
struct Peripheral {
    free_channels: usize,
    free_blocks: usize,
    channels_created: usize,
    failing_creates: usize,
    reserved_pins: BTreeSet<Pin>,
    transmissions: Vec<Transmission>,
}

/// A channel driver backed by a simulated RMT peripheral.
#[derive(Clone, Debug)]
pub struct SimulatedDriver {
    variant: ChipVariant,
    peripheral: Arc<Mutex<Peripheral>>,
}

impl SimulatedDriver {
    /// A peripheral with the channels and memory blocks of `variant`.
    #[must_use]
    pub fn new(variant: ChipVariant) -> Self {
        Self::with_memory_blocks(variant, variant.memory_blocks())
    }

    /// A peripheral with fewer memory blocks than the chip has. Use this to model blocks
    /// taken by other users of the peripheral.
    #[must_use]
    pub fn with_memory_blocks(variant: ChipVariant, memory_blocks: usize) -> Self {
        Self {
            variant,
            peripheral: Arc::new(Mutex::new(Peripheral {
                free_channels: variant.tx_channels(),
                free_blocks: memory_blocks,
                channels_created: 0,
                failing_creates: 0,
                reserved_pins: BTreeSet::new(),
                transmissions: Vec::new(),
            })),
        }
    }

    fn peripheral(&self) -> MutexGuard<'_, Peripheral> {
        lock(&self.peripheral)
    }

    /// Chip this peripheral models.
    #[must_use]
    pub const fn variant(&self) -> ChipVariant {
        self.variant
    }

    /// Make the next `count` channel creations fail.
    pub fn fail_next_creates(&self, count: usize) {
        self.peripheral().failing_creates = count;
    }

    /// Make creating or rebinding a channel on `pin` fail.
    pub fn reserve_pin(&self, pin: Pin) {
        self.peripheral().reserved_pins.insert(pin);
    }

    /// Channels created so far.
    #[must_use]
    pub fn channels_created(&self) -> usize {
        self.peripheral().channels_created
    }

    /// Memory blocks not claimed by any live channel.
    #[must_use]
    pub fn free_memory_blocks(&self) -> usize {
        self.peripheral().free_blocks
    }

    /// Completed transmissions, oldest first.
    #[must_use]
    pub fn transmissions(&self) -> Vec<Transmission> {
        self.peripheral().transmissions.clone()
    }

    /// Completed transmissions, oldest first, clearing the log.
    #[must_use]
    pub fn take_transmissions(&self) -> Vec<Transmission> {
        core::mem::take(&mut self.peripheral().transmissions)
    }
}

impl ChannelDriver for SimulatedDriver {
    type Channel = SimulatedChannel;

    fn create(&self, config: &ChannelConfig) -> Result<SimulatedChannel> {
        let mut peripheral = self.peripheral();
        if peripheral.failing_creates > 0 {
            peripheral.failing_creates -= 1;
            return Err(Error::ChannelCreate { pin: config.pin });
        }
        if peripheral.reserved_pins.contains(&config.pin)
            || peripheral.free_channels == 0
            || peripheral.free_blocks < config.memory_blocks
        {
            return Err(Error::ChannelCreate { pin: config.pin });
        }
        peripheral.free_channels -= 1;
        peripheral.free_blocks -= config.memory_blocks;
        let index = peripheral.channels_created;
        peripheral.channels_created += 1;

        let memory_len = config.memory_blocks * self.variant.block_symbols();
        Ok(SimulatedChannel {
            index,
            pin: config.pin,
            mode: config.mode,
            memory_blocks: config.memory_blocks,
            enabled: false,
            memory: vec![Symbol::RESET; memory_len],
            state: ChannelState::Idle,
            sent: Vec::new(),
            peripheral: Arc::clone(&self.peripheral),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ChannelState {
    Idle,
    Streaming {
        position: usize,
        since_threshold: usize,
        threshold: usize,
        thresholds_enabled: bool,
    },
    Sent,
}

/// One simulated channel. Returns its resources to the peripheral on drop.
#[derive(Debug)]
pub struct SimulatedChannel {
    index: usize,
    pin: Pin,
    mode: ChannelMode,
    memory_blocks: usize,
    enabled: bool,
    memory: Vec<Symbol>,
    state: ChannelState,
    sent: Vec<Symbol>,
    peripheral: Arc<Mutex<Peripheral>>,
}

impl SimulatedChannel {
    /// Pin the channel currently drives.
    #[must_use]
    pub const fn pin(&self) -> Pin {
        self.pin
    }

    /// Whether the output is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn finish(&mut self) -> ChannelEvent {
        self.state = ChannelState::Idle;
        let transmission = Transmission {
            channel: self.index,
            pin: self.pin,
            mode: self.mode,
            symbols: core::mem::take(&mut self.sent),
        };
        lock(&self.peripheral).transmissions.push(transmission);
        ChannelEvent::Done
    }

    fn advance_stream(
        &mut self,
        mut position: usize,
        mut since_threshold: usize,
        threshold: usize,
        thresholds_enabled: bool,
    ) -> ChannelEvent {
        let memory_len = self.memory.len().max(1);
        let mut steps = 0;
        loop {
            let symbol = self.memory.get(position).copied().unwrap_or(Symbol::RESET);
            self.sent.push(symbol);
            if symbol.is_end_marker() {
                return self.finish();
            }
            position = (position + 1) % memory_len;
            since_threshold += 1;
            steps += 1;
            if thresholds_enabled && since_threshold >= threshold {
                self.state = ChannelState::Streaming {
                    position,
                    since_threshold: 0,
                    threshold,
                    thresholds_enabled,
                };
                return ChannelEvent::Threshold;
            }
            // Nobody is refilling and there is no marker: real hardware would loop on
            // stale memory forever.
            if steps > memory_len {
                return self.finish();
            }
        }
    }
}

impl PulseChannel for SimulatedChannel {
    fn memory_len(&self) -> usize {
        self.memory.len()
    }

    fn rebind(&mut self, pin: Pin) -> Result<()> {
        if lock(&self.peripheral).reserved_pins.contains(&pin) {
            return Err(Error::PinRebind { pin });
        }
        self.pin = pin;
        Ok(())
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn write_memory(&mut self, offset: usize, symbols: &[Symbol]) {
        for (slot, symbol) in self.memory.iter_mut().skip(offset).zip(symbols) {
            *slot = *symbol;
        }
    }

    fn start_stream(&mut self, threshold: usize) {
        self.sent.clear();
        self.state = ChannelState::Streaming {
            position: 0,
            since_threshold: 0,
            threshold: threshold.max(1),
            thresholds_enabled: true,
        };
    }

    fn finish_stream(&mut self) {
        if let ChannelState::Streaming {
            thresholds_enabled, ..
        } = &mut self.state
        {
            *thresholds_enabled = false;
        }
    }

    fn transmit(&mut self, symbols: &[Symbol]) {
        self.sent.clear();
        for symbol in symbols {
            self.sent.push(*symbol);
            if symbol.is_end_marker() {
                break;
            }
        }
        self.state = ChannelState::Sent;
    }

    fn take_event(&mut self) -> Option<ChannelEvent> {
        match self.state {
            ChannelState::Idle => None,
            ChannelState::Sent => Some(self.finish()),
            ChannelState::Streaming {
                position,
                since_threshold,
                threshold,
                thresholds_enabled,
            } => Some(self.advance_stream(
                position,
                since_threshold,
                threshold,
                thresholds_enabled,
            )),
        }
    }
}

impl Drop for SimulatedChannel {
    fn drop(&mut self) {
        let mut peripheral = lock(&self.peripheral);
        peripheral.free_channels += 1;
        peripheral.free_blocks += self.memory_blocks;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{SymbolTemplates, encode_buffer, encoded_len};
    use crate::timing::ChipsetTiming;

    fn config(pin: u8, memory_blocks: usize, mode: ChannelMode) -> ChannelConfig {
        ChannelConfig {
            pin: Pin(pin),
            resolution_hz: 10_000_000,
            memory_blocks,
            mode,
        }
    }

    #[test]
    fn creation_respects_memory_blocks() {
        let driver = SimulatedDriver::with_memory_blocks(ChipVariant::Esp32C3, 2);
        let first = driver
            .create(&config(1, 2, ChannelMode::Streaming))
            .expect("two blocks are free");
        assert_eq!(first.memory_len(), 96);
        assert_eq!(
            driver.create(&config(2, 1, ChannelMode::OneShot)),
            Err(Error::ChannelCreate { pin: Pin(2) })
        );
        drop(first);
        assert_eq!(driver.free_memory_blocks(), 2);
    }

    #[test]
    fn one_shot_transfer_is_recorded_through_the_marker() {
        let driver = SimulatedDriver::new(ChipVariant::Esp32);
        let mut channel = driver
            .create(&config(4, 1, ChannelMode::OneShot))
            .expect("channel available");
        let templates = SymbolTemplates::new(&ChipsetTiming::new(400, 400, 850, 50), 100);
        let mut symbols = vec![Symbol::RESET; encoded_len(2)];
        encode_buffer(&templates, &[0xF0, 0x0F], &mut symbols);

        channel.transmit(&symbols);
        assert_eq!(channel.take_event(), Some(ChannelEvent::Done));
        assert_eq!(channel.take_event(), None);

        let transmissions = driver.transmissions();
        assert_eq!(transmissions.len(), 1);
        assert_eq!(transmissions[0].symbols, symbols);
        assert_eq!(transmissions[0].pin, Pin(4));
    }

    #[test]
    fn stream_raises_thresholds_until_the_marker() {
        let driver = SimulatedDriver::new(ChipVariant::Esp32);
        let mut channel = driver
            .create(&config(5, 2, ChannelMode::Streaming))
            .expect("channel available");
        let data = [Symbol::new(2, 3); 128];
        channel.write_memory(0, &data);
        channel.start_stream(64);
        assert_eq!(channel.take_event(), Some(ChannelEvent::Threshold));
        channel.write_memory(0, &[Symbol::RESET]);
        channel.finish_stream();
        assert_eq!(channel.take_event(), Some(ChannelEvent::Done));

        let transmissions = driver.take_transmissions();
        assert_eq!(transmissions[0].symbols.len(), 129);
        assert_eq!(transmissions[0].symbols.last(), Some(&Symbol::RESET));
        assert!(driver.transmissions().is_empty());
    }

    #[test]
    fn reserved_pins_cannot_be_bound() {
        let driver = SimulatedDriver::new(ChipVariant::Esp32);
        driver.reserve_pin(Pin(9));
        let mut channel = driver
            .create(&config(1, 1, ChannelMode::OneShot))
            .expect("channel available");
        assert_eq!(channel.rebind(Pin(9)), Err(Error::PinRebind { pin: Pin(9) }));
        assert_eq!(channel.pin(), Pin(1));
    }
}
