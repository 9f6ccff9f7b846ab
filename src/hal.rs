//! Hardware the driver relies on but does not own.
//!
//! The driver never touches registers directly. A board crate implements
//! these traits on top of its peripheral access crate:
//!
//! - [`Platform`]: pads, the shared PLL, cache maintenance and the shift
//!   peripheral units that exist on the chip.
//! - [`ShiftPeripheral`]: register access to one FlexIO-style unit.
//! - [`TransferChannel`]: one eDMA-style channel with descriptor memory.
//!
//! All methods take `&self`: they model volatile register writes, which is
//! also what lets the interrupt path reach the channel while the caller holds
//! the driver.

use crate::chain::Descriptor;
use crate::registry::{InstanceRegistry, INSTANCES};
use crate::timing::{
    ClockSource, FlexControl, PllSettings, ShifterConfig, ShifterControl, TimerConfig,
    TimerControl,
};
use crate::PeripheralUnit;

/// Pins wired to the external serial-to-parallel latch chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlexPins {
    /// Shift register clock.
    pub shift_clock: u8,
    /// Storage register (latch) clock.
    pub latch_clock: u8,
    /// Serial data.
    pub data: u8,
}

impl FlexPins {
    /// Group three pin numbers.
    #[must_use]
    pub const fn new(shift_clock: u8, latch_clock: u8, data: u8) -> Self {
        Self {
            shift_clock,
            latch_clock,
            data,
        }
    }

    /// The pins in `shift_clock, latch_clock, data` order.
    #[must_use]
    pub const fn as_array(&self) -> [u8; 3] {
        [self.shift_clock, self.latch_clock, self.data]
    }
}

impl Default for FlexPins {
    fn default() -> Self {
        Self::new(2, 3, 4)
    }
}

/// Board level services shared by every driver instance.
pub trait Platform {
    /// Register access to one shift peripheral unit.
    type Shifter: ShiftPeripheral;
    /// A DMA channel handed to each driver.
    type Channel: TransferChannel;

    /// The shift peripheral for `unit`, if this chip has one with DMA support.
    fn shifter(&self, unit: PeripheralUnit) -> Option<&Self::Shifter>;

    /// Table used for claiming units and routing interrupts.
    fn registry(&self) -> &InstanceRegistry {
        &INSTANCES
    }

    /// Reference clock and peripheral clock limit used for clock derivation.
    fn clock_source(&self) -> ClockSource {
        ClockSource::default()
    }

    /// Whether the PLL is powered down, i.e. nobody else is using it.
    fn clock_is_idle(&self) -> bool;

    /// Bypass and power the PLL down.
    fn clock_power_down(&self);

    /// Bypass the PLL, program `settings` and power it up. Must not wait for lock.
    fn clock_start(&self, settings: &PllSettings);

    /// Whether the PLL reports lock.
    fn clock_is_locked(&self) -> bool;

    /// Switch the PLL output from bypass to the locked loop.
    fn clock_release_bypass(&self);

    /// Configure the pads as fast, strong outputs (`enable`) or back to
    /// inputs with keepers.
    fn configure_pins(&self, pins: &FlexPins, enable: bool);

    /// Write back data cache lines covering `len` bytes at `address`.
    fn flush_cache(&self, address: *const u8, len: usize);
}

/// Register level access to one FlexIO-style unit.
pub trait ShiftPeripheral {
    /// Internal pin index of a board pin, `None` when it cannot be routed here.
    fn flex_pin(&self, pin: u8) -> Option<u8>;

    /// Switch a board pin's mux to this unit.
    fn route_pin(&self, pin: u8);

    /// Select the unit's clock root and program its dividers (register field
    /// values, i.e. divider minus one).
    fn set_clock(&self, select: u8, pre_divider: u8, post_divider: u8);

    /// Write the module control register.
    fn write_control(&self, control: FlexControl);

    /// Program one shifter.
    fn write_shifter(&self, index: usize, control: ShifterControl, config: ShifterConfig);

    /// Program one timer.
    fn write_timer(&self, index: usize, control: TimerControl, config: TimerConfig, compare: u32);

    /// Write a shifter buffer.
    fn write_shift_buffer(&self, index: usize, value: u32);

    /// Write a bit-swapped shifter buffer.
    fn write_shift_buffer_bis(&self, index: usize, value: u32);

    /// Set bits in the shifter DMA request enable register.
    fn enable_dma_requests(&self, mask: u32);

    /// Bus address of a shifter buffer, used as a DMA destination.
    fn shift_buffer_address(&self, index: usize) -> *mut u32;

    /// Bus address of a bit-swapped shifter buffer.
    fn shift_buffer_bis_address(&self, index: usize) -> *mut u32;

    /// DMA mux request source raised by a shifter.
    fn dma_request_source(&self, shifter: usize) -> u32;
}

/// One DMA channel together with the descriptor memory it links through.
pub trait TransferChannel {
    /// Largest major loop count a single descriptor supports.
    const MAX_ITERATIONS: u16 = 0x7FFF;

    /// Number of descriptor slots available.
    const SLOTS: usize = crate::chain::MAX_DESCRIPTORS;

    /// Stop servicing requests.
    fn disable(&self);

    /// Start servicing requests.
    fn enable(&self);

    /// Whether the channel is servicing requests.
    fn is_enabled(&self) -> bool;

    /// Store a descriptor record in `slot`.
    fn write_descriptor(&self, slot: usize, descriptor: &Descriptor);

    /// Replace only the source address of the record in `slot`.
    fn set_source(&self, slot: usize, source: *const u32);

    /// Set or clear the interrupt-on-major-loop flag of the record in `slot`.
    fn set_interrupt_on_completion(&self, slot: usize, enable: bool);

    /// Load the record in `slot` into the channel as the next to run.
    fn load(&self, slot: usize);

    /// Route a peripheral request source to this channel.
    fn trigger_on(&self, request: u32);

    /// Route this channel's interrupt to [`on_interrupt`](crate::on_interrupt)
    /// for `unit`.
    fn attach_interrupt(&self, unit: PeripheralUnit);

    /// Stop routing this channel's interrupt.
    fn detach_interrupt(&self);

    /// Acknowledge a pending interrupt.
    fn clear_interrupt(&self);
}
