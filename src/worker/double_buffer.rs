//! Double-buffer worker: a two-half ring refilled from the interrupt.
//!
//! The channel claims two memory blocks and reads them as a ring. Both halves are filled
//! before the stream starts. Each threshold interrupt means one half has been sent, and
//! that half is refilled with the next chunk of encoded bytes while the other half plays.
//! When the bytes run out, the end marker goes in and threshold interrupts are switched off,
//! so the hardware stops on its own at the marker.
//!
//! Channel memory stays at two blocks whatever the strip length. The cost is one interrupt
//! per half for the whole frame.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use portable_atomic_util::Arc;

use super::flags::WorkerFlags;
use super::{SharedFrame, Worker, WorkerId, WorkerKind, WorkerSettings, WorkerState};
use crate::Result;
use crate::buffer::GrowableBuffer;
use crate::channel::{ChannelConfig, ChannelDriver, ChannelEvent, ChannelMode, Pin, PulseChannel};
use crate::log::{info, trace, warn};
use crate::symbol::{Symbol, SymbolTemplates, encode_byte, tick_period_ns};
use crate::timing::{ChipVariant, ChipsetTiming, MAX_BLOCK_SYMBOLS, MEMORY_BLOCKS_PER_WORKER};

struct Inner<C> {
    channel: Option<C>,
    pin: Option<Pin>,
    timing: Option<ChipsetTiming>,
    templates: SymbolTemplates,
    state: WorkerState,
    frame: Option<SharedFrame>,
    half: usize,
    cursor: usize,
    next_half: usize,
    finished: bool,
    refills: u32,
}

/// A worker that streams a frame through two interrupt-refilled memory halves.
pub struct DoubleBufferWorker<C> {
    id: WorkerId,
    variant: ChipVariant,
    settings: WorkerSettings,
    flags: WorkerFlags,
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner<C>>>,
}

impl<C: PulseChannel> DoubleBufferWorker<C> {
    /// An unconfigured worker. No hardware is touched until [`Worker::configure`].
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
                frame: None,
                half: 0,
                cursor: 0,
                next_half: 0,
                finished: false,
                refills: 0,
            })),
        }
    }

    /// Chip this worker sizes its memory for.
    #[must_use]
    pub const fn variant(&self) -> ChipVariant {
        self.variant
    }

    /// Threshold refills performed during the last (or current) frame.
    #[must_use]
    pub fn refills(&self) -> u32 {
        self.inner.lock(|inner| inner.borrow().refills)
    }

    fn handle_threshold(inner: &mut Inner<C>) {
        if inner.finished {
            return;
        }
        let Some(channel) = inner.channel.as_mut() else {
            return;
        };
        let half = inner.half;
        let bytes = inner.frame.as_deref().map(GrowableBuffer::as_slice).unwrap_or_default();
        fill_half(
            channel,
            &inner.templates,
            bytes,
            &mut inner.cursor,
            &mut inner.finished,
            inner.next_half * half,
            half,
        );
        inner.next_half ^= 1;
        inner.refills = inner.refills.saturating_add(1);
        if inner.finished {
            channel.finish_stream();
        }
    }
}

/// Symbols per ring half for a channel with `memory_len` symbols of memory.
///
/// A half must hold whole bytes and fit the refill window, or frames would be cut short.
const fn stream_half(memory_len: usize) -> Option<usize> {
    let half = memory_len / 2;
    if half == 0 || half % 8 != 0 || half > MAX_BLOCK_SYMBOLS {
        None
    } else {
        Some(half)
    }
}

/// Encode the next chunk of `bytes` into one memory half.
///
/// When the bytes run out the end marker is written and the rest of the half is zeroed.
fn fill_half<C: PulseChannel>(
    channel: &mut C,
    templates: &SymbolTemplates,
    bytes: &[u8],
    cursor: &mut usize,
    finished: &mut bool,
    offset: usize,
    half: usize,
) {
    let mut symbols = [Symbol::RESET; MAX_BLOCK_SYMBOLS];
    let Some(window) = symbols.get_mut(..half) else {
        return;
    };
    let mut written = 0;
    for chunk in window.chunks_exact_mut(8) {
        let Some(byte) = bytes.get(*cursor) else {
            break;
        };
        if let Ok(chunk) = <&mut [Symbol; 8]>::try_from(chunk) {
            encode_byte(templates, *byte, chunk);
        }
        *cursor += 1;
        written += 8;
    }
    // Unused slots are already RESET.
    if written < half {
        *finished = true;
    }
    channel.write_memory(offset, symbols.get(..half).unwrap_or_default());
}

impl<D: ChannelDriver> Worker<D> for DoubleBufferWorker<D::Channel> {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::DoubleBuffer
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

        // Channel creation stays outside the critical section.
        if !has_channel {
            self.inner
                .lock(|inner| inner.borrow_mut().state = WorkerState::Configuring);
            let channel = driver.create(&ChannelConfig {
                pin,
                resolution_hz: self.settings.resolution_hz,
                memory_blocks: MEMORY_BLOCKS_PER_WORKER,
                mode: ChannelMode::Streaming,
            });
            let channel = match channel {
                Ok(channel) => channel,
                Err(error) => {
                    self.inner
                        .lock(|inner| inner.borrow_mut().state = WorkerState::Idle);
                    return Err(error);
                }
            };
            let Some(half) = stream_half(channel.memory_len()) else {
                warn!(
                    "double-buffer worker {} cannot stream through {} symbols of memory",
                    self.id,
                    channel.memory_len()
                );
                drop(channel);
                self.inner
                    .lock(|inner| inner.borrow_mut().state = WorkerState::Idle);
                return Err(crate::Error::ChannelCreate { pin });
            };
            info!(
                "double-buffer worker {} created channel on {} ({} symbols)",
                self.id,
                pin,
                channel.memory_len()
            );
            self.inner.lock(|inner| {
                let mut inner = inner.borrow_mut();
                inner.channel = Some(channel);
                inner.pin = Some(pin);
                inner.half = half;
            });
        }

        let tick_period = tick_period_ns(self.settings.resolution_hz);
        self.inner.lock(|inner| {
            let mut guard = inner.borrow_mut();
            let inner = &mut *guard;
            let Some(channel) = inner.channel.as_mut() else {
                return Err(crate::Error::ChannelCreate { pin });
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
        if let Some(timing) = self.inner.lock(|inner| inner.borrow().timing) {
            self.flags.wait_for_latch(timing.reset());
        }

        let started = self.inner.lock(|inner| {
            let mut guard = inner.borrow_mut();
            let inner = &mut *guard;
            let Some(channel) = inner.channel.as_mut() else {
                return false;
            };
            let half = inner.half;
            inner.frame = Some(Arc::clone(frame));
            inner.cursor = 0;
            inner.finished = false;
            inner.next_half = 0;
            inner.refills = 0;

            let bytes = frame.as_slice();
            for index in 0..2 {
                if !inner.finished {
                    fill_half(
                        channel,
                        &inner.templates,
                        bytes,
                        &mut inner.cursor,
                        &mut inner.finished,
                        index * half,
                        half,
                    );
                }
            }

            self.flags.begin_transmit();
            inner.state = WorkerState::Transmitting;
            channel.start_stream(half);
            if inner.finished {
                channel.finish_stream();
            }
            true
        });

        if !started {
            warn!("double-buffer worker {} has no channel; frame dropped", self.id);
            self.flags.abandon();
        }
    }

    fn service_interrupt(&self) -> bool {
        if !self.flags.is_transmitting() {
            return false;
        }
        let event = self.inner.lock(|inner| {
            let mut guard = inner.borrow_mut();
            let inner = &mut *guard;
            let event = inner.channel.as_mut().and_then(PulseChannel::take_event)?;
            match event {
                ChannelEvent::Threshold => Self::handle_threshold(inner),
                ChannelEvent::Done => {
                    inner.frame = None;
                    inner.state = WorkerState::Ready;
                }
            }
            Some(event)
        });
        match event {
            Some(ChannelEvent::Done) => {
                trace!("double-buffer worker {} done", self.id);
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
