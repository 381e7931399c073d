//! One-shot worker: encode the whole frame, send it in one transfer.
//!
//! The channel claims a single memory block and only raises a completion interrupt. The
//! symbol buffer is owned by the worker and grows to the exact size of the largest frame
//! seen, 32 times the frame's byte count plus one.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use super::flags::WorkerFlags;
use super::{SharedFrame, Worker, WorkerId, WorkerKind, WorkerSettings, WorkerState};
use crate::buffer::{GrowableBuffer, GrowthPolicy};
use crate::channel::{ChannelConfig, ChannelDriver, ChannelEvent, ChannelMode, Pin, PulseChannel};
use crate::log::{info, trace, warn};
use crate::symbol::{Symbol, SymbolTemplates, encode_buffer, encoded_len, tick_period_ns};
use crate::timing::{ChipVariant, ChipsetTiming};
use crate::{Error, Result};

struct Inner<C> {
    channel: Option<C>,
    pin: Option<Pin>,
    timing: Option<ChipsetTiming>,
    templates: SymbolTemplates,
    state: WorkerState,
    symbols: GrowableBuffer<Symbol>,
}

/// A worker that pre-encodes the whole frame and hands it to the channel at once.
pub struct OneShotWorker<C> {
    id: WorkerId,
    variant: ChipVariant,
    settings: WorkerSettings,
    flags: WorkerFlags,
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner<C>>>,
}

impl<C: PulseChannel> OneShotWorker<C> {
    /// An unconfigured worker. No hardware or symbol memory is claimed yet.
    #[must_use]
    pub const fn new(id: WorkerId, variant: ChipVariant) -> Self {
        Self::with_settings(id, variant, WorkerSettings::DEFAULT)
    }

    /// An unconfigured worker with explicit settings.
    #[must_use]
    pub const fn with_settings(id: WorkerId, variant: ChipVariant, settings: WorkerSettings) -> Self {
        Self {
            id,
            variant,
            settings,
            flags: WorkerFlags::new(),
            inner: Mutex::new(RefCell::new(Inner {
                channel: None,
                pin: None,
                timing: None,
                templates: SymbolTemplates {
                    zero: Symbol::RESET,
                    one: Symbol::RESET,
                },
                state: WorkerState::Idle,
                symbols: GrowableBuffer::with_limit(
                    GrowthPolicy::Exact,
                    settings.max_one_shot_symbols,
                ),
            })),
        }
    }

    /// Chip this worker was built for.
    #[must_use]
    pub const fn variant(&self) -> ChipVariant {
        self.variant
    }

    /// Symbols the encode buffer holds without growing.
    #[must_use]
    pub fn symbol_capacity(&self) -> usize {
        self.inner.lock(|inner| inner.borrow().symbols.capacity())
    }

    /// Put the encode buffer back, then start the transfer if `encoded` is set.
    fn start(&self, symbols: GrowableBuffer<Symbol>, encoded: bool) -> bool {
        self.inner.lock(|inner| {
            let mut guard = inner.borrow_mut();
            let inner = &mut *guard;
            inner.symbols = symbols;
            let Some(channel) = inner.channel.as_mut() else {
                return false;
            };
            if !encoded {
                return false;
            }
            self.flags.begin_transmit();
            inner.state = WorkerState::Transmitting;
            channel.transmit(inner.symbols.as_slice());
            true
        })
    }
}

impl<D: ChannelDriver> Worker<D> for OneShotWorker<D::Channel> {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::OneShot
    }

    fn flags(&self) -> &WorkerFlags {
        &self.flags
    }

    fn state(&self) -> WorkerState {
        self.inner.lock(|inner| inner.borrow().state)
    }

    fn pin(&self) -> Option<Pin> {
        self.inner.lock(|inner| inner.borrow().pin)
    }

    fn configure(&self, driver: &D, pin: Pin, timing: ChipsetTiming) -> Result<()> {
        let (has_channel, unchanged) = self.inner.lock(|inner| {
            let inner = inner.borrow();
            (
                inner.channel.is_some(),
                inner.pin == Some(pin) && inner.timing == Some(timing),
            )
        });
        if has_channel && unchanged {
            return Ok(());
        }
        <Self as Worker<D>>::wait_for_completion(self);

        if !has_channel {
            self.inner
                .lock(|inner| inner.borrow_mut().state = WorkerState::Configuring);
            let created = driver.create(&ChannelConfig {
                pin,
                resolution_hz: self.settings.resolution_hz,
                memory_blocks: 1,
                mode: ChannelMode::OneShot,
            });
            let channel = match created {
                Ok(channel) => channel,
                Err(error) => {
                    self.inner
                        .lock(|inner| inner.borrow_mut().state = WorkerState::Idle);
                    return Err(error);
                }
            };
            info!("one-shot worker {} created channel on {}", self.id, pin);
            self.inner.lock(|inner| {
                let mut inner = inner.borrow_mut();
                inner.channel = Some(channel);
                inner.pin = Some(pin);
            });
        }

        let tick_period = tick_period_ns(self.settings.resolution_hz);
        self.inner.lock(|inner| {
            let mut guard = inner.borrow_mut();
            let inner = &mut *guard;
            let Some(channel) = inner.channel.as_mut() else {
                return Err(Error::ChannelCreate { pin });
            };
            inner.state = WorkerState::Configuring;
            if inner.pin != Some(pin) {
                if let Err(error) = channel.rebind(pin) {
                    inner.state = WorkerState::Ready;
                    return Err(error);
                }
                inner.pin = Some(pin);
            }
            inner.templates = SymbolTemplates::new(&timing, tick_period);
            inner.timing = Some(timing);
            channel.enable();
            inner.state = WorkerState::Ready;
            Ok(())
        })
    }

    fn transmit(&self, frame: &SharedFrame) {
        assert!(
            !self.flags.is_transmitting(),
            "worker {} is already transmitting",
            self.id
        );

        // Encoding runs outside the critical section, so the buffer is taken out while we
        // work on it.
        let (templates, timing, mut symbols) = self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let symbols =
                core::mem::replace(&mut inner.symbols, GrowableBuffer::new(GrowthPolicy::Exact));
            (inner.templates, inner.timing, symbols)
        });

        let bytes = frame.as_slice();
        let encoded = match symbols.resize(encoded_len(bytes.len())) {
            Ok(()) => {
                encode_buffer(&templates, bytes, symbols.as_mut_slice());
                true
            }
            Err(error) => {
                warn!(
                    "one-shot worker {}: {}; dropping {} byte frame",
                    self.id,
                    error,
                    bytes.len()
                );
                false
            }
        };

        if let Some(timing) = timing {
            self.flags.wait_for_latch(timing.reset());
        }
        if !self.start(symbols, encoded) {
            if encoded {
                warn!("one-shot worker {} has no channel; frame dropped", self.id);
            }
            self.flags.abandon();
        }
    }

    fn service_interrupt(&self) -> bool {
        if !self.flags.is_transmitting() {
            return false;
        }
        let event = self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let event = inner.channel.as_mut().and_then(PulseChannel::take_event)?;
            if event == ChannelEvent::Done {
                inner.state = WorkerState::Ready;
            }
            Some(event)
        });
        match event {
            Some(ChannelEvent::Done) => {
                trace!("one-shot worker {} done", self.id);
                self.flags.complete();
                true
            }
            Some(ChannelEvent::Threshold) => true,
            None => false,
        }
    }

    fn wait_for_completion(&self) {
        self.flags
            .wait_while_transmitting(self.settings.wait_poll_interval);
    }
}
