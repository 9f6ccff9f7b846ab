//! Clock derivation and shift peripheral configuration.
//!
//! # Waveform
//!
//! Every protocol bit period is split into three equal latch slots. The shift
//! peripheral pushes 96 bits per period through the external latch chain, one
//! 32-bit word per slot, and pulses the latch clock after each word:
//!
//! ```text
//!            |  slot 0   |  slot 1   |  slot 2   |
//! gate       | all ones  |           |           |   shifter 0
//! data       |           | lane bits |           |   shifter 1
//! tail       |           |           | all zeros |   shifter 2
//!
//! bit = 0    ‾‾‾‾‾‾‾‾‾‾‾‾|_______________________|   T0H = 1 slot
//! bit = 1    ‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾|___________|   T1H = 2 slots
//! ```
//!
//! With a 1250 ns bit period the slot is 416.7 ns, so a `0` is high for
//! ≈417 ns and a `1` for ≈833 ns, inside the WS2812 tolerances. The shift clock
//! runs 32 times faster than the latch clock.
//!
//! The gate shifter is loaded with ones only while pixel data is streamed; the
//! descriptor chain writes zeros into it for the frame gap so the lines stay
//! low for the reset interval.
//!
//! # Clock tree
//!
//! The PLL multiplies the reference clock, the unit's clock dividers bring it
//! down to the peripheral clock, and the two timers divide that into the shift
//! and latch clocks. All of it is derived from [`ClockSource`] rather than
//! hard coded: with a 24 MHz reference the result is 768 MHz / 5 = 153.6 MHz,
//! a shift clock divider of 2 (76.8 MHz) and a latch divider of 64 (2.4 MHz).

use bitfield::bitfield;

use crate::hal::{FlexPins, ShiftPeripheral};
use crate::LANES;

/// Protocol bit period.
pub const BIT_PERIOD_NS: u32 = 1250;

/// Latch slots per protocol bit: high, data, low.
pub const SLOTS_PER_BIT: u32 = 3;

/// Bit periods spent low between frames. Some parts want close to 300 µs of
/// reset, 240 × 1.25 µs covers them.
pub const FRAME_GAP_BITS: u16 = 240;

/// Latch clock rate.
pub const SLOT_RATE_HZ: u32 = SLOTS_PER_BIT * 1_000_000_000 / BIT_PERIOD_NS;

/// Shift clock rate.
pub const SHIFT_RATE_HZ: u32 = SLOT_RATE_HZ * LANES as u32;

/// Bits pushed through the latch chain per protocol bit.
pub const BITS_PER_PERIOD: u32 = SLOTS_PER_BIT * LANES as u32;

/// Shifter holding the all-ones gate word.
pub const SHIFTER_GATE: usize = 0;
/// Shifter fed with per-lane data by DMA.
pub const SHIFTER_DATA: usize = 1;
/// Shifter holding the all-zeros tail word.
pub const SHIFTER_TAIL: usize = 2;
/// Timer producing the shift clock.
pub const TIMER_SHIFT: usize = 0;
/// Timer producing the latch clock.
pub const TIMER_LATCH: usize = 1;

/// Clock root select value for the video PLL.
const CLOCK_SELECT_PLL: u8 = 2;
/// Pin configuration: output.
const PINCFG_OUTPUT: u8 = 3;
/// Shifter mode: transmit.
const SMOD_TRANSMIT: u8 = 2;
/// Timer mode: dual 8-bit counters baud/bit.
const TIMOD_DUAL_BAUD: u8 = 1;
/// Timer mode: single 16-bit counter.
const TIMOD_SINGLE_16: u8 = 3;
/// Timer enable: on trigger high.
const TIMENA_TRIGGER_HIGH: u8 = 2;
/// Trigger select: shifter 0 status flag.
const TRGSEL_SHIFTER0_STATUS: u8 = 1;
/// Pattern left in the data shifter so a missed DMA write is visible on a scope.
pub const DATA_SENTINEL: u32 = 0xAAAA_AAAA;

bitfield! {
    /// Module control register.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct FlexControl(u32);
    impl Debug;
    /// Keep running in doze mode.
    pub doze_enable, set_doze_enable: 31;
    /// Keep running when the core is halted.
    pub debug_enable, set_debug_enable: 30;
    /// Fast register access.
    pub fast_access, set_fast_access: 2;
    /// Hold shifters and timers in reset.
    pub software_reset, set_software_reset: 1;
    /// Module enable.
    pub enable, set_enable: 0;
}

bitfield! {
    /// Shifter control register.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct ShifterControl(u32);
    impl Debug;
    /// Timer clocking the shifter.
    pub u8, timer_select, set_timer_select: 26, 24;
    /// Shift on the falling timer edge.
    pub timer_polarity, set_timer_polarity: 23;
    /// Pin direction, 3 is output.
    pub u8, pin_config, set_pin_config: 17, 16;
    /// Internal pin index.
    pub u8, pin_select, set_pin_select: 12, 8;
    /// Invert the pin.
    pub pin_polarity, set_pin_polarity: 7;
    /// Shifter mode, 2 is transmit.
    pub u8, mode, set_mode: 2, 0;
}

bitfield! {
    /// Shifter configuration register.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct ShifterConfig(u32);
    impl Debug;
    /// Parallel shift width.
    pub u8, parallel_width, set_parallel_width: 20, 16;
    /// Shift in from the next shifter instead of a pin.
    pub input_source, set_input_source: 8;
    /// Stop bit.
    pub u8, stop_bit, set_stop_bit: 5, 4;
    /// Start bit.
    pub u8, start_bit, set_start_bit: 1, 0;
}

bitfield! {
    /// Timer control register.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct TimerControl(u32);
    impl Debug;
    /// Trigger source index.
    pub u8, trigger_select, set_trigger_select: 29, 24;
    /// Trigger active low.
    pub trigger_polarity, set_trigger_polarity: 23;
    /// Internal trigger.
    pub trigger_source, set_trigger_source: 22;
    /// Pin direction, 3 is output.
    pub u8, pin_config, set_pin_config: 17, 16;
    /// Internal pin index.
    pub u8, pin_select, set_pin_select: 12, 8;
    /// Invert the pin.
    pub pin_polarity, set_pin_polarity: 7;
    /// Timer mode.
    pub u8, mode, set_mode: 1, 0;
}

bitfield! {
    /// Timer configuration register.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct TimerConfig(u32);
    impl Debug;
    /// Output level on enable and reset.
    pub u8, output, set_output: 25, 24;
    /// Counter decrement source.
    pub u8, decrement, set_decrement: 21, 20;
    /// Counter reset condition.
    pub u8, reset, set_reset: 18, 16;
    /// Disable condition.
    pub u8, disable, set_disable: 14, 12;
    /// Enable condition, 2 is trigger high.
    pub u8, enable, set_enable: 10, 8;
    /// Stop bit.
    pub u8, stop_bit, set_stop_bit: 5, 4;
    /// Start bit.
    pub start_bit, set_start_bit: 1;
}

impl FlexControl {
    /// Value that holds the unit in software reset.
    #[must_use]
    pub fn reset() -> Self {
        let mut c = Self(0);
        c.set_software_reset(true);
        c
    }

    /// Value that releases reset and disables the unit.
    #[must_use]
    pub const fn idle() -> Self {
        Self(0)
    }

    /// Value that enables the unit.
    #[must_use]
    pub fn enabled() -> Self {
        let mut c = Self(0);
        c.set_enable(true);
        c
    }

    /// Raw register value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// What the clock tree is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockSource {
    /// PLL reference oscillator.
    pub reference_hz: u32,
    /// Fastest clock the shift peripheral accepts.
    pub peripheral_max_hz: u32,
}

impl ClockSource {
    /// Describe a clock source.
    #[must_use]
    pub const fn new(reference_hz: u32, peripheral_max_hz: u32) -> Self {
        Self {
            reference_hz,
            peripheral_max_hz,
        }
    }
}

impl Default for ClockSource {
    /// 24 MHz crystal, shift peripheral clocked up to 160 MHz.
    fn default() -> Self {
        Self::new(24_000_000, 160_000_000)
    }
}

/// PLL programming: `output = reference × (loop_divider + numerator / denominator)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllSettings {
    /// Integer loop divider, 27..=54.
    pub loop_divider: u8,
    /// Fractional numerator, always 0 here.
    pub numerator: u32,
    /// Fractional denominator.
    pub denominator: u32,
    /// Post divider field value (2 selects divide by one).
    pub post_divider_select: u8,
    /// Resulting PLL output.
    pub output_hz: u32,
}

/// Legal PLL loop dividers.
pub const PLL_LOOP_DIVIDERS: core::ops::RangeInclusive<u8> = 27..=54;

impl PllSettings {
    /// Post divider field value that divides by one.
    pub const POST_DIVIDE_BY_ONE: u8 = 2;

    /// Smallest integer loop divider that leads to a usable peripheral clock.
    #[must_use]
    pub fn derive(source: &ClockSource) -> Option<(Self, PeripheralClock)> {
        let mut dividers = PLL_LOOP_DIVIDERS;
        dividers.find_map(|loop_divider| {
            let output_hz = source.reference_hz.checked_mul(u32::from(loop_divider))?;
            let clock = PeripheralClock::derive(output_hz, source.peripheral_max_hz)?;
            Some((
                Self {
                    loop_divider,
                    numerator: 0,
                    denominator: 1,
                    post_divider_select: Self::POST_DIVIDE_BY_ONE,
                    output_hz,
                },
                clock,
            ))
        })
    }
}

/// The shift peripheral's own clock dividers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeripheralClock {
    /// Pre divider, 1..=8.
    pub pre_divider: u8,
    /// Post divider, 1..=8.
    pub post_divider: u8,
    /// Resulting peripheral clock.
    pub hz: u32,
}

impl PeripheralClock {
    /// Fastest clock at or below `max_hz` that divides exactly from
    /// `source_hz` and is an even multiple of the shift clock.
    #[must_use]
    pub fn derive(source_hz: u32, max_hz: u32) -> Option<Self> {
        (1..=64u32).find_map(|total| {
            if source_hz % total != 0 {
                return None;
            }
            let hz = source_hz / total;
            if hz > max_hz || hz % (2 * SHIFT_RATE_HZ) != 0 {
                return None;
            }
            (1..=8u32)
                .find(|post| total % post == 0 && total / post <= 8)
                .map(|post| Self {
                    pre_divider: (total / post) as u8,
                    post_divider: post as u8,
                    hz,
                })
        })
    }

    /// Pre divider register field.
    #[must_use]
    pub const fn pre_field(&self) -> u8 {
        self.pre_divider - 1
    }

    /// Post divider register field.
    #[must_use]
    pub const fn post_field(&self) -> u8 {
        self.post_divider - 1
    }
}

/// Timer dividers for a given peripheral clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingPlan {
    peripheral_hz: u32,
    shift_divider: u32,
    latch_divider: u32,
}

impl TimingPlan {
    /// Plan for `peripheral_hz`, `None` unless the shift clock divides out
    /// exactly with an even divider that fits the 8-bit baud counter.
    #[must_use]
    pub fn derive(peripheral_hz: u32) -> Option<Self> {
        if peripheral_hz == 0 || peripheral_hz % SHIFT_RATE_HZ != 0 {
            return None;
        }
        let shift_divider = peripheral_hz / SHIFT_RATE_HZ;
        if shift_divider % 2 != 0 || shift_divider > 512 {
            return None;
        }
        let latch_divider = shift_divider * LANES as u32;
        if latch_divider / 2 > 0x1_0000 {
            return None;
        }
        Some(Self {
            peripheral_hz,
            shift_divider,
            latch_divider,
        })
    }

    /// Peripheral clock the plan was made for.
    #[must_use]
    pub const fn peripheral_hz(&self) -> u32 {
        self.peripheral_hz
    }

    /// Shift clock rate.
    #[must_use]
    pub const fn shift_hz(&self) -> u32 {
        self.peripheral_hz / self.shift_divider
    }

    /// Latch clock rate.
    #[must_use]
    pub const fn latch_hz(&self) -> u32 {
        self.peripheral_hz / self.latch_divider
    }

    /// Compare value for the shift timer in dual 8-bit baud mode: the low
    /// byte sets the baud divider, the high byte the bits per period.
    #[must_use]
    pub const fn shift_compare(&self) -> u32 {
        ((BITS_PER_PERIOD * 2 - 1) << 8) | (self.shift_divider / 2 - 1)
    }

    /// Compare value for the latch timer in 16-bit mode.
    #[must_use]
    pub const fn latch_compare(&self) -> u32 {
        self.latch_divider / 2 - 1
    }

    const fn slots_ns(&self, slots: u32) -> u32 {
        let ns = 1_000_000_000u64 * slots as u64 * self.latch_divider as u64;
        ((ns + self.peripheral_hz as u64 / 2) / self.peripheral_hz as u64) as u32
    }

    /// High time of a `0` bit.
    #[must_use]
    pub const fn t0h_ns(&self) -> u32 {
        self.slots_ns(1)
    }

    /// High time of a `1` bit.
    #[must_use]
    pub const fn t1h_ns(&self) -> u32 {
        self.slots_ns(2)
    }

    /// Whole bit period.
    #[must_use]
    pub const fn bit_ns(&self) -> u32 {
        self.slots_ns(SLOTS_PER_BIT)
    }

    /// Length of the frame gap.
    #[must_use]
    pub const fn frame_gap_us(&self) -> u32 {
        self.slots_ns(SLOTS_PER_BIT * FRAME_GAP_BITS as u32) / 1000
    }
}

/// Complete register image for one shift peripheral unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pins: FlexPins,
    clock: PeripheralClock,
    shifters: [(ShifterControl, ShifterConfig); 3],
    timers: [(TimerControl, TimerConfig, u32); 2],
}

impl EngineConfig {
    /// Build the register image, `None` if a pin cannot be routed to `peripheral`.
    pub fn build<S: ShiftPeripheral>(
        peripheral: &S,
        pins: FlexPins,
        clock: PeripheralClock,
        plan: &TimingPlan,
    ) -> Option<Self> {
        let data_pin = peripheral.flex_pin(pins.data)?;
        let shift_pin = peripheral.flex_pin(pins.shift_clock)?;
        let latch_pin = peripheral.flex_pin(pins.latch_clock)?;

        // all three shifters run off the shift timer and chain into each other
        let mut chained = ShifterControl(0);
        chained.set_timer_select(TIMER_SHIFT as u8);
        chained.set_timer_polarity(true);
        chained.set_mode(SMOD_TRANSMIT);

        let mut output = chained;
        output.set_pin_config(PINCFG_OUTPUT);
        output.set_pin_select(data_pin);

        let mut from_next = ShifterConfig(0);
        from_next.set_input_source(true);

        let mut on_trigger = TimerConfig(0);
        on_trigger.set_enable(TIMENA_TRIGGER_HIGH);

        let mut triggered = TimerControl(0);
        triggered.set_trigger_select(TRGSEL_SHIFTER0_STATUS);
        triggered.set_trigger_polarity(true);
        triggered.set_trigger_source(true);
        triggered.set_pin_config(PINCFG_OUTPUT);

        let mut shift_timer = triggered;
        shift_timer.set_pin_select(shift_pin);
        shift_timer.set_mode(TIMOD_DUAL_BAUD);

        let mut latch_timer = triggered;
        latch_timer.set_pin_select(latch_pin);
        latch_timer.set_mode(TIMOD_SINGLE_16);

        Some(Self {
            pins,
            clock,
            shifters: [(output, from_next), (chained, from_next), (chained, from_next)],
            timers: [
                (shift_timer, on_trigger, plan.shift_compare()),
                (latch_timer, on_trigger, plan.latch_compare()),
            ],
        })
    }

    /// Shifter register pair.
    #[must_use]
    pub fn shifter(&self, index: usize) -> Option<(ShifterControl, ShifterConfig)> {
        self.shifters.get(index).copied()
    }

    /// Timer control, configuration and compare values.
    #[must_use]
    pub fn timer(&self, index: usize) -> Option<(TimerControl, TimerConfig, u32)> {
        self.timers.get(index).copied()
    }

    /// Peripheral clock dividers.
    #[must_use]
    pub const fn clock(&self) -> &PeripheralClock {
        &self.clock
    }

    /// Pins the image routes.
    #[must_use]
    pub const fn pins(&self) -> &FlexPins {
        &self.pins
    }
}

/// Reset the unit and, with a configuration, program and start it.
///
/// Safe to call repeatedly: every call starts from a software reset.
pub fn apply<S: ShiftPeripheral>(peripheral: &S, config: Option<&EngineConfig>) {
    peripheral.write_control(FlexControl::reset());
    peripheral.write_control(FlexControl::idle());

    let Some(config) = config else {
        return;
    };

    peripheral.set_clock(
        CLOCK_SELECT_PLL,
        config.clock.pre_field(),
        config.clock.post_field(),
    );

    for pin in config.pins.as_array() {
        peripheral.route_pin(pin);
    }

    for (index, (control, cfg)) in config.shifters.iter().enumerate() {
        peripheral.write_shifter(index, *control, *cfg);
    }
    for (index, (control, cfg, compare)) in config.timers.iter().enumerate() {
        peripheral.write_timer(index, *control, *cfg, *compare);
    }

    // values reloaded into the chain at the start of every bit period
    peripheral.write_shift_buffer(SHIFTER_GATE, !0);
    peripheral.write_shift_buffer_bis(SHIFTER_DATA, DATA_SENTINEL);
    peripheral.write_shift_buffer(SHIFTER_TAIL, 0);

    peripheral.enable_dma_requests(1 << SHIFTER_DATA);
    peripheral.write_control(FlexControl::enabled());
}
