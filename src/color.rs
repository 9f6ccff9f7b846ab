//! Packed LED colours and per-channel colour ordering.
//!
//! A [`Color`] is a single 32-bit word. The same bits are read differently
//! depending on the [`ChannelType`] of the output line they are written to:
//!
//! | byte | `Rgb`   | `Grb`   | `Grbw`  |
//! |------|---------|---------|---------|
//! | 3    | red     | green   | green   |
//! | 2    | green   | red     | red     |
//! | 1    | blue    | blue    | blue    |
//! | 0    | padding | padding | white   |
//!
//! The most significant byte is transmitted first. Three-channel types only
//! transmit the upper 24 bits, which is why the padding byte sits at the bottom.

use bitfield::bitfield;

bitfield! {
    /// 32-bit packed colour value.
    ///
    /// Build one with [`rgb`], [`grb`] or [`grbw`] (or the matching associated
    /// functions) and decode it with the accessors taking a [`ChannelType`].
    /// The raw value is never altered by the driver: a colour written with a
    /// 32-bit channel type reads back bit-for-bit, a colour written with a
    /// 24-bit type reads back with the padding byte cleared.
    #[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
    #[repr(transparent)]
    pub struct Color(u32);
    impl Debug;
    /// Low byte: white for `Grbw`, unused otherwise.
    pub u8, white, set_white: 7, 0;
    /// Blue in every channel order.
    pub u8, blue, set_blue: 15, 8;
    /// Green for `Rgb`, red for `Grb`/`Grbw`.
    pub u8, byte2, set_byte2: 23, 16;
    /// Red for `Rgb`, green for `Grb`/`Grbw`.
    pub u8, byte3, set_byte3: 31, 24;
}

impl Color {
    /// Colour with every bit cleared.
    pub const BLACK: Self = Self(0);

    /// Wrap a raw 32-bit value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw 32-bit value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Red/green/blue colour for [`ChannelType::Rgb`] lines.
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self((r as u32) << 24 | (g as u32) << 16 | (b as u32) << 8)
    }

    /// Green/red/blue colour for [`ChannelType::Grb`] lines.
    #[must_use]
    pub const fn grb(g: u8, r: u8, b: u8) -> Self {
        Self((g as u32) << 24 | (r as u32) << 16 | (b as u32) << 8)
    }

    /// Green/red/blue/white colour for [`ChannelType::Grbw`] lines.
    #[must_use]
    pub const fn grbw(g: u8, r: u8, b: u8, w: u8) -> Self {
        Self((g as u32) << 24 | (r as u32) << 16 | (b as u32) << 8 | w as u32)
    }

    /// Red component as seen by a line of the given type.
    #[must_use]
    pub fn red(self, channel_type: ChannelType) -> u8 {
        match channel_type {
            ChannelType::Rgb => self.byte3(),
            ChannelType::Grb | ChannelType::Grbw => self.byte2(),
        }
    }

    /// Green component as seen by a line of the given type.
    #[must_use]
    pub fn green(self, channel_type: ChannelType) -> u8 {
        match channel_type {
            ChannelType::Rgb => self.byte2(),
            ChannelType::Grb | ChannelType::Grbw => self.byte3(),
        }
    }

    /// White component, present only on [`ChannelType::Grbw`] lines.
    #[must_use]
    pub fn white_for(self, channel_type: ChannelType) -> Option<u8> {
        match channel_type {
            ChannelType::Grbw => Some(self.white()),
            ChannelType::Rgb | ChannelType::Grb => None,
        }
    }

    /// The bits that a line of the given type actually transmits, right
    /// aligned (24 bits for three-channel types, 32 bits otherwise).
    #[must_use]
    pub const fn wire_bits(self, channel_type: ChannelType) -> u32 {
        match channel_type {
            ChannelType::Grbw => self.0,
            ChannelType::Rgb | ChannelType::Grb => self.0 >> 8,
        }
    }
}

impl From<u32> for Color {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<Color> for u32 {
    fn from(color: Color) -> Self {
        color.0
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Color {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Color({=u32:#010x})", self.0);
    }
}

/// Shorthand for [`Color::rgb`].
#[must_use]
pub const fn rgb(r: u8, g: u8, b: u8) -> Color {
    Color::rgb(r, g, b)
}

/// Shorthand for [`Color::grb`].
#[must_use]
pub const fn grb(g: u8, r: u8, b: u8) -> Color {
    Color::grb(g, r, b)
}

/// Shorthand for [`Color::grbw`].
#[must_use]
pub const fn grbw(g: u8, r: u8, b: u8, w: u8) -> Color {
    Color::grbw(g, r, b, w)
}

/// Colour order and width of one output line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelType {
    /// Red, green, blue (24 bits).
    #[default]
    Rgb,
    /// Green, red, blue (24 bits), the native WS2812 order.
    Grb,
    /// Green, red, blue, white (32 bits), SK6812 RGBW parts.
    Grbw,
}

impl ChannelType {
    /// Number of protocol bits sent per LED.
    #[must_use]
    pub const fn bit_depth(self) -> usize {
        match self {
            Self::Rgb | Self::Grb => 24,
            Self::Grbw => 32,
        }
    }

    /// Whether a driver with the given capacity can carry this type.
    #[must_use]
    pub const fn fits(self, capacity: ColorCapacity) -> bool {
        self.bit_depth() <= capacity.bits_per_led()
    }
}

/// Per-LED storage reserved by a driver. Fixed at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ColorCapacity {
    /// Room for three colour channels (24 buffer words per LED).
    #[default]
    Tricolor,
    /// Room for four colour channels (32 buffer words per LED).
    Quadcolor,
}

impl ColorCapacity {
    /// Buffer words reserved per LED.
    #[must_use]
    pub const fn bits_per_led(self) -> usize {
        match self {
            Self::Tricolor => 24,
            Self::Quadcolor => 32,
        }
    }
}
