//! Driver error types

use core::fmt;

/// Why a driver could not be built or brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// `leds_per_strip` is zero.
    NoLeds,
    /// Peripheral unit index out of range.
    InvalidUnit,
    /// The chip has no DMA capable shift peripheral for this unit.
    UnitUnavailable,
    /// This driver already owns a unit.
    AlreadyInitialized,
    /// Another driver owns the unit.
    UnitClaimed,
    /// The shared PLL is in use by something other than these drivers.
    ClockBusy,
    /// A pin cannot be routed to the unit.
    InvalidPin,
    /// No divider combination gives the protocol clocks.
    ClockUnreachable,
    /// Storage length does not match the configuration.
    BufferSizeMismatch,
    /// A buffer half needs more data descriptors than the chain supports.
    BufferTooLarge,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoLeds => write!(f, "No LEDs per strip configured"),
            Self::InvalidUnit => write!(f, "Invalid peripheral unit"),
            Self::UnitUnavailable => write!(f, "Peripheral unit not available"),
            Self::AlreadyInitialized => write!(f, "Driver already initialized"),
            Self::UnitClaimed => write!(f, "Peripheral unit already claimed"),
            Self::ClockBusy => write!(f, "Clock generator in use"),
            Self::InvalidPin => write!(f, "Pin cannot be routed to peripheral unit"),
            Self::ClockUnreachable => write!(f, "Protocol clocks cannot be derived"),
            Self::BufferSizeMismatch => write!(f, "Buffer size does not match configuration"),
            Self::BufferTooLarge => write!(f, "Buffer too large for descriptor chain"),
        }
    }
}

impl core::error::Error for Error {}
