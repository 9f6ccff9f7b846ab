//! DMA driven WS28xx LED driver for up to 32 strips on one FlexIO-style shift
//! peripheral.
//!
//! ## How WS28xx LEDs Work
//!
//! WS2811/WS2812/SK6812 LEDs are chained on a single data line. Each LED takes
//! the first 24 (or 32 for RGBW parts) bits it sees, then passes everything
//! after that on to the next LED. A low period of a few hundred microseconds
//! tells every LED the frame is over and the latched colours are shown.
//!
//! Bits are encoded in pulse width. Every bit period (1.25 µs) starts high:
//! - a `0` stays high for roughly a third of the period (T0H),
//! - a `1` stays high for roughly two thirds (T1H),
//! - the rest of the period is low.
//!
//! ## Driving 32 Strips at Once
//!
//! The three pins of the shift peripheral feed an external chain of
//! serial-to-parallel latches (for example four 74HC595): a shift clock, a
//! latch clock and serial data. Every bit period is split into three latch
//! slots. Slot 0 latches all ones, slot 1 latches one data bit for each of the
//! 32 strips and slot 2 latches all zeros:
//!
//! ```text
//! slot       |     0     |     1     |     2     |
//! bit = 0    ‾‾‾‾‾‾‾‾‾‾‾‾|_______________________|
//! bit = 1    ‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾|___________|
//! ```
//!
//! The data words come from a bit-plane frame buffer (see [`framebuffer`])
//! moved by a ring of chained DMA transfer records (see [`chain`]), so the CPU
//! does no work per bit.
//!
//! ## Buffer Modes
//!
//! - [`BufferMode::SingleBlocking`]: one frame per
//!   [`PixelDriver::flush_buffer`] call, poll [`PixelDriver::buffer_ready`]
//!   before writing again.
//! - [`BufferMode::SingleContinuous`]: the buffer is streamed over and over.
//!   Cheap, but a frame may show half-written data.
//! - [`BufferMode::Double`]: two halves; write the inactive one and call
//!   [`PixelDriver::flip_buffers`]. The switch happens at the frame gap, so no
//!   frame ever mixes the two.
//!
//! ## Sizing
//!
//! The buffer lives inside the driver and its length is a const generic.
//! [`compute_buffer_words`] gives it from the LED count, the per-LED
//! [`ColorCapacity`] and the [`BufferMode`]:
//!
//! ```rust
//! use ws28xx_fanout::{compute_buffer_words, BufferMode, ColorCapacity};
//!
//! const WORDS: usize = compute_buffer_words(120, ColorCapacity::Quadcolor, BufferMode::Double);
//! assert_eq!(WORDS, 120 * 32 * 2);
//! ```
//!
//! ## Hardware Access
//!
//! The driver does not touch registers itself. A board crate implements the
//! traits in [`hal`] for its chip; the driver computes every register value
//! and descriptor record and hands them over through those traits. Each
//! unit's DMA interrupt must call [`on_interrupt`] (or use the matching entry
//! of [`INTERRUPT_HANDLERS`]) for [`BufferMode::Double`] to work.
//!
//! ## Available Feature Flags
//!
//! ### `defmt` Feature
//! Implements `defmt::Format` for the public types and routes the driver's
//! internal log messages to `defmt`. No functional changes.
#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

#[macro_use]
mod fmt;

pub mod chain;
pub mod color;
pub mod driver;
pub mod error;
pub mod framebuffer;
pub mod hal;
pub mod registry;
pub mod timing;

#[cfg(test)]
mod mock;

pub use color::{grb, grbw, rgb, ChannelType, Color, ColorCapacity};
pub use driver::{Config, PixelDriver};
pub use error::Error;
pub use framebuffer::{compute_buffer_words, compute_half_words, BufferMode, PixelBuffer};
pub use hal::{FlexPins, Platform, ShiftPeripheral, TransferChannel};
pub use registry::{on_interrupt, InstanceRegistry, INSTANCES, INTERRUPT_HANDLERS};

/// Output lines per peripheral unit.
pub const LANES: usize = 32;

/// Shift peripheral units with DMA support, and so the most drivers that can
/// run at once.
pub const UNIT_COUNT: usize = 2;

/// A shift peripheral unit a driver can claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeripheralUnit {
    /// First DMA capable unit.
    Unit0,
    /// Second DMA capable unit.
    Unit1,
}

impl PeripheralUnit {
    /// Every unit, in index order.
    pub const ALL: [Self; UNIT_COUNT] = [Self::Unit0, Self::Unit1];

    /// Position of the unit, `0..UNIT_COUNT`.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Unit0 => 0,
            Self::Unit1 => 1,
        }
    }
}

impl TryFrom<u8> for PeripheralUnit {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .ok_or(Error::InvalidUnit)
    }
}
