//! The LED driver: owns a frame buffer, one DMA channel and, once
//! initialized, one shift peripheral unit.
//!
//! # Life cycle
//!
//! A driver is created unpinned with [`PixelDriver::new`], which only checks
//! that the storage fits the configuration. It has to be pinned before
//! [`PixelDriver::initialize`] because the interrupt path keeps a pointer to
//! it; from then on it stays put until dropped, and dropping it releases the
//! hardware again.
//!
//! ```rust,ignore
//! use core::pin::pin;
//! use ws28xx_fanout::{
//!     compute_buffer_words, rgb, BufferMode, ColorCapacity, Config, FlexPins,
//!     PeripheralUnit, PixelDriver,
//! };
//!
//! const LEDS: usize = 60;
//! const WORDS: usize = compute_buffer_words(LEDS, ColorCapacity::Tricolor, BufferMode::Double);
//!
//! let config = Config::new(LEDS, ColorCapacity::Tricolor, BufferMode::Double);
//! let driver = pin!(PixelDriver::<_, WORDS>::new(&board, board.dma_channel(0), config)?);
//! driver.as_ref().initialize(PeripheralUnit::Unit1, FlexPins::default())?;
//!
//! loop {
//!     for strip in 0..32 {
//!         driver.set_inactive_color(strip, 0, rgb(255, 0, 0));
//!     }
//!     driver.flip_buffers();
//! }
//! ```
//!
//! # Buffer swap
//!
//! In [`BufferMode::Double`] the chain keeps streaming the active half while
//! the caller fills the inactive one. [`PixelDriver::flip_buffers`] only
//! toggles which half is active and arms the completion interrupt of the
//! close-gate record. The interrupt therefore fires at the start of the frame
//! gap, after the last data word of the current frame has been moved, and
//! retargets the data records before the next frame starts. A frame in flight
//! always finishes from the half it started with.
//!
//! The interrupt context only reads the front flag and the chain layout, and
//! writes channel registers. It never reads or writes buffer contents.

use core::cell::{Cell, UnsafeCell};
use core::hint::spin_loop;
use core::marker::PhantomPinned;
use core::pin::Pin;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use embedded_dma::ReadBuffer;

use crate::chain::{ChainLayout, DescriptorChain, PRIME_SLOT};
use crate::color::{ChannelType, Color, ColorCapacity};
use crate::error::Error;
use crate::framebuffer::{
    compute_buffer_words, compute_half_words, read_color, write_color, BufferMode, PixelBuffer,
};
use crate::hal::{FlexPins, Platform, ShiftPeripheral, TransferChannel};
use crate::timing::{self, EngineConfig, PllSettings, TimingPlan, SHIFTER_DATA};
use crate::{PeripheralUnit, LANES};

/// Fixed per-driver settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// LEDs on the longest strip.
    pub leds_per_strip: usize,
    /// Storage reserved per LED.
    pub capacity: ColorCapacity,
    /// Refresh strategy.
    pub mode: BufferMode,
}

impl Config {
    /// Bundle the settings.
    #[must_use]
    pub const fn new(leds_per_strip: usize, capacity: ColorCapacity, mode: BufferMode) -> Self {
        Self {
            leds_per_strip,
            capacity,
            mode,
        }
    }

    /// Words per buffer half.
    #[must_use]
    pub const fn half_words(&self) -> usize {
        compute_half_words(self.leds_per_strip, self.capacity)
    }

    /// Words of storage needed for every half.
    #[must_use]
    pub const fn buffer_words(&self) -> usize {
        compute_buffer_words(self.leds_per_strip, self.capacity, self.mode)
    }
}

/// Driver for up to 32 LED strips behind one shift peripheral unit.
///
/// `WORDS` must equal [`Config::buffer_words`]; use
/// [`compute_buffer_words`](crate::compute_buffer_words) to get it at
/// compile time.
pub struct PixelDriver<'a, P: Platform, const WORDS: usize> {
    platform: &'a P,
    channel: P::Channel,
    config: Config,
    layout: ChainLayout,
    buffer: UnsafeCell<PixelBuffer<WORDS>>,
    channel_types: [Cell<ChannelType>; LANES],
    /// `true` when the second half is the one being streamed.
    front: AtomicBool,
    unit: Cell<Option<PeripheralUnit>>,
    pins: Cell<Option<FlexPins>>,
    _pinned: PhantomPinned,
}

impl<'a, P: Platform, const WORDS: usize> PixelDriver<'a, P, WORDS> {
    /// Create an idle driver that owns `channel`.
    ///
    /// # Errors
    ///
    /// - [`Error::BufferSizeMismatch`] if `WORDS` is not what `config` needs.
    /// - [`Error::BufferTooLarge`] if one half needs more data records than
    ///   the chain or the channel can hold.
    pub fn new(platform: &'a P, channel: P::Channel, config: Config) -> Result<Self, Error> {
        if config.buffer_words() != WORDS {
            warn!(
                "buffer holds {} words, configuration needs {}",
                WORDS,
                config.buffer_words()
            );
            return Err(Error::BufferSizeMismatch);
        }
        let layout = ChainLayout::new(config.half_words(), <P::Channel as TransferChannel>::MAX_ITERATIONS)?;
        if layout.len() > <P::Channel as TransferChannel>::SLOTS {
            return Err(Error::BufferTooLarge);
        }
        Ok(Self {
            platform,
            channel,
            config,
            layout,
            buffer: UnsafeCell::new(PixelBuffer::new()),
            channel_types: core::array::from_fn(|_| Cell::new(ChannelType::default())),
            front: AtomicBool::new(false),
            unit: Cell::new(None),
            pins: Cell::new(None),
            _pinned: PhantomPinned,
        })
    }

    /// Claim `unit` and start the hardware.
    ///
    /// Checks run in order and the first failure is returned with nothing
    /// changed: LED count, unit present, driver not yet initialized, unit free,
    /// clock generator idle (first driver only), pins routable, clocks
    /// derivable. On success both halves are cleared and, except in
    /// [`BufferMode::SingleBlocking`], the strips start refreshing right away.
    ///
    /// The first driver to initialize programs and starts the PLL and busy
    /// waits for it to lock.
    ///
    /// # Errors
    ///
    /// One [`Error`] variant per failed check.
    pub fn initialize(self: Pin<&Self>, unit: PeripheralUnit, pins: FlexPins) -> Result<(), Error> {
        let this = self.get_ref();
        let platform = this.platform;

        if this.config.leds_per_strip == 0 {
            return Err(Error::NoLeds);
        }
        let Some(shifter) = platform.shifter(unit) else {
            return Err(Error::UnitUnavailable);
        };
        if this.unit.get().is_some() {
            return Err(Error::AlreadyInitialized);
        }
        let registry = platform.registry();
        if registry.is_claimed(unit) {
            return Err(Error::UnitClaimed);
        }
        if registry.active_count() == 0 && !platform.clock_is_idle() {
            warn!("clock generator busy");
            return Err(Error::ClockBusy);
        }
        if pins.as_array().iter().any(|pin| shifter.flex_pin(*pin).is_none()) {
            return Err(Error::InvalidPin);
        }
        let source = platform.clock_source();
        let (pll, clock) = PllSettings::derive(&source).ok_or(Error::ClockUnreachable)?;
        let plan = TimingPlan::derive(clock.hz).ok_or(Error::ClockUnreachable)?;
        let engine = EngineConfig::build(shifter, pins, clock, &plan).ok_or(Error::InvalidPin)?;
        debug!(
            "pll x{} -> {} Hz, peripheral {} Hz, t0h {} ns, t1h {} ns",
            pll.loop_divider,
            pll.output_hz,
            clock.hz,
            plan.t0h_ns(),
            plan.t1h_ns()
        );

        let context = NonNull::from(this).cast::<()>();
        // SAFETY: `self` is pinned, so the pointer stays valid until `drop`,
        // which releases the claim first.
        let claimed = unsafe {
            registry.claim(unit, context, service_erased::<P, WORDS>, || {
                platform.clock_is_idle()
            })
        };
        let first = claimed.map_err(|taken| {
            if taken {
                Error::UnitClaimed
            } else {
                Error::ClockBusy
            }
        })?;
        this.unit.set(Some(unit));
        this.pins.set(Some(pins));

        // SAFETY: the channel is not running yet, nothing else looks at the storage.
        let (words, len) = unsafe {
            let buffer = &mut *this.buffer.get();
            buffer.clear();
            buffer.read_buffer()
        };
        platform.flush_cache(words.cast(), len * core::mem::size_of::<u32>());

        platform.configure_pins(&pins, true);

        if first {
            platform.clock_start(&pll);
            while !platform.clock_is_locked() {
                spin_loop();
            }
            platform.clock_release_bypass();
        }

        timing::apply(shifter, Some(&engine));
        this.start_chain(shifter, unit);

        debug!("unit {} running, {} data segments", unit.index(), this.layout.segments());
        Ok(())
    }

    fn start_chain(&self, shifter: &P::Shifter, unit: PeripheralUnit) {
        let mode = self.config.mode;
        let chain = DescriptorChain::build(
            &self.layout,
            shifter,
            self.half_ptr(self.active_half()),
            mode.is_free_running(),
        );

        self.channel.disable();
        for (slot, record) in chain.records().iter().enumerate() {
            self.channel.write_descriptor(slot, record);
        }
        self.channel.load(PRIME_SLOT);
        self.channel.trigger_on(shifter.dma_request_source(SHIFTER_DATA));

        if mode.is_free_running() {
            if mode == BufferMode::Double {
                self.channel.attach_interrupt(unit);
            }
            self.channel.enable();
        }
    }

    /// Set the colour order of one strip.
    ///
    /// Ignored for `channel >= 32` and for [`ChannelType::Grbw`] on a
    /// [`ColorCapacity::Tricolor`] driver.
    pub fn set_channel_type(&self, channel: u8, channel_type: ChannelType) {
        if !channel_type.fits(self.config.capacity) {
            return;
        }
        if let Some(slot) = self.channel_types.get(usize::from(channel)) {
            slot.set(channel_type);
        }
    }

    /// Colour order of one strip, `None` for `channel >= 32`.
    #[must_use]
    pub fn channel_type(&self, channel: u8) -> Option<ChannelType> {
        self.channel_types.get(usize::from(channel)).map(Cell::get)
    }

    /// Write LED `index` of strip `channel` in the half being streamed.
    /// Out-of-range requests are ignored.
    pub fn set_active_color(&self, channel: u8, index: usize, color: Color) {
        self.write(self.active_half(), channel, index, color);
    }

    /// Write LED `index` of strip `channel` in the half the next
    /// [`flip_buffers`](Self::flip_buffers) makes active. Same as
    /// [`set_active_color`](Self::set_active_color) outside
    /// [`BufferMode::Double`].
    pub fn set_inactive_color(&self, channel: u8, index: usize, color: Color) {
        self.write(self.inactive_half(), channel, index, color);
    }

    /// Read back LED `index` of strip `channel` from the half being streamed.
    /// Black for out-of-range requests.
    #[must_use]
    pub fn active_color(&self, channel: u8, index: usize) -> Color {
        self.read(self.active_half(), channel, index)
    }

    /// Read back LED `index` of strip `channel` from the inactive half.
    #[must_use]
    pub fn inactive_color(&self, channel: u8, index: usize) -> Color {
        self.read(self.inactive_half(), channel, index)
    }

    /// Alias for [`set_active_color`](Self::set_active_color).
    pub fn set_color(&self, channel: u8, index: usize, color: Color) {
        self.set_active_color(channel, index, color);
    }

    /// Alias for [`active_color`](Self::active_color).
    #[must_use]
    pub fn color(&self, channel: u8, index: usize) -> Color {
        self.active_color(channel, index)
    }

    /// Hand the buffer to the hardware.
    ///
    /// - [`BufferMode::SingleBlocking`]: wait for the previous frame to end,
    ///   then send one frame.
    /// - [`BufferMode::SingleContinuous`]: make the writes visible to DMA.
    /// - [`BufferMode::Double`]: make the inactive half active. The hardware
    ///   switches over at the next frame gap.
    ///
    /// Before [`initialize`](Self::initialize) only the double-buffer front
    /// flag changes.
    pub fn flip_buffers(&self) {
        let initialized = self.unit.get().is_some();
        match self.config.mode {
            BufferMode::SingleBlocking if initialized => {
                while self.channel.is_enabled() {
                    spin_loop();
                }
                self.channel.load(PRIME_SLOT);
                self.flush_half(0);
                self.channel.enable();
            }
            BufferMode::SingleContinuous if initialized => self.flush_half(0),
            BufferMode::Double => {
                self.front.fetch_xor(true, Ordering::AcqRel);
                if initialized {
                    self.flush_half(self.active_half());
                    self.channel
                        .set_interrupt_on_completion(self.layout.close_slot(), true);
                }
            }
            BufferMode::SingleBlocking | BufferMode::SingleContinuous => {}
        }
    }

    /// Alias for [`flip_buffers`](Self::flip_buffers).
    pub fn flush_buffer(&self) {
        self.flip_buffers();
    }

    /// Whether the buffer may be written without disturbing a frame.
    ///
    /// Only [`BufferMode::SingleBlocking`] ever reports `false`, while its
    /// single frame is in flight.
    #[must_use]
    pub fn buffer_ready(&self) -> bool {
        match self.config.mode {
            BufferMode::SingleBlocking => !self.channel.is_enabled(),
            BufferMode::SingleContinuous | BufferMode::Double => true,
        }
    }

    /// Settings the driver was built with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Number of data records per frame.
    #[must_use]
    pub const fn segment_count(&self) -> usize {
        self.layout.segments()
    }

    /// Unit held by this driver.
    #[must_use]
    pub fn unit(&self) -> Option<PeripheralUnit> {
        self.unit.get()
    }

    /// Pins in use.
    #[must_use]
    pub fn pins(&self) -> Option<FlexPins> {
        self.pins.get()
    }

    /// The DMA channel the driver owns.
    #[must_use]
    pub const fn transfer_channel(&self) -> &P::Channel {
        &self.channel
    }

    /// Buffer half being streamed, 0 or 1.
    #[must_use]
    pub fn active_half(&self) -> usize {
        match self.config.mode {
            BufferMode::Double => usize::from(self.front.load(Ordering::Acquire)),
            BufferMode::SingleBlocking | BufferMode::SingleContinuous => 0,
        }
    }

    fn inactive_half(&self) -> usize {
        match self.config.mode {
            BufferMode::Double => 1 - self.active_half(),
            BufferMode::SingleBlocking | BufferMode::SingleContinuous => 0,
        }
    }

    fn half_ptr(&self, half: usize) -> *mut u32 {
        // PixelBuffer is repr(C) with the word array as its only field
        self.buffer
            .get()
            .cast::<u32>()
            .wrapping_add(half * self.layout.half_words())
    }

    fn write(&self, half: usize, channel: u8, index: usize, color: Color) {
        let Some(channel_type) = self.channel_type(channel) else {
            return;
        };
        // SAFETY: the half lies inside the buffer; only this (non-Sync) driver
        // creates references into it and never more than one at a time.
        let plane = unsafe {
            core::slice::from_raw_parts_mut(self.half_ptr(half), self.layout.half_words())
        };
        write_color(
            plane,
            self.config.leds_per_strip,
            channel,
            index,
            color,
            channel_type,
        );
    }

    fn read(&self, half: usize, channel: u8, index: usize) -> Color {
        let Some(channel_type) = self.channel_type(channel) else {
            return Color::BLACK;
        };
        // SAFETY: see `write`.
        let plane =
            unsafe { core::slice::from_raw_parts(self.half_ptr(half), self.layout.half_words()) };
        read_color(
            plane,
            self.config.leds_per_strip,
            channel,
            index,
            channel_type,
        )
    }

    fn flush_half(&self, half: usize) {
        self.platform.flush_cache(
            self.half_ptr(half).cast_const().cast(),
            self.layout.half_words() * core::mem::size_of::<u32>(),
        );
    }

    /// Completion interrupt of the close-gate record.
    fn service(&self) {
        let close = self.layout.close_slot();
        self.channel.set_interrupt_on_completion(close, false);

        let base = self.half_ptr(self.active_half()).cast_const();
        for (i, (source, _)) in self.layout.data_sources(base).enumerate() {
            self.channel
                .set_source(self.layout.first_data_slot() + i, source);
        }
        self.channel.clear_interrupt();
        trace!("swapped to half {}", self.active_half());
    }
}

unsafe fn service_erased<P: Platform, const WORDS: usize>(context: NonNull<()>) {
    // SAFETY: registered by `initialize` with a pointer to a pinned driver of
    // exactly this type, released in `drop`.
    let driver: &PixelDriver<'_, P, WORDS> = unsafe { context.cast().as_ref() };
    driver.service();
}

impl<P: Platform, const WORDS: usize> Drop for PixelDriver<'_, P, WORDS> {
    fn drop(&mut self) {
        let Some(unit) = self.unit.get() else {
            return;
        };
        self.channel.disable();
        self.channel.detach_interrupt();

        if let Some(shifter) = self.platform.shifter(unit) {
            timing::apply(shifter, None);
        }
        if let Some(pins) = self.pins.get() {
            self.platform.configure_pins(&pins, false);
        }

        if self.platform.registry().release(unit) {
            self.platform.clock_power_down();
        }
        self.unit.set(None);
        debug!("unit {} released", unit.index());
    }
}
