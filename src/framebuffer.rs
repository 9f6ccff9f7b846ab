//! Bit-plane frame buffer for 32 parallel output lines.
//!
//! The protocol sends one bit per LED per bit period on every line at the same
//! time, so the buffer is stored transposed: one `u32` word per bit period,
//! where bit `n` of the word is the level of output line `n`. A whole LED
//! occupies `bit_depth` consecutive words (24 or 32), most significant colour
//! bit first:
//!
//! ```text
//! word  index*depth + 0        -> colour bit depth-1 of every line
//! word  index*depth + 1        -> colour bit depth-2 of every line
//! ...
//! word  index*depth + depth-1  -> colour bit 0 of every line
//! ```
//!
//! A single DMA stream of these words into the shift peripheral drives all
//! 32 lines with no per-bit CPU work.
//!
//! The functions here are plain slice manipulation and never touch hardware.

use core::fmt;
use core::ops::Range;

use embedded_dma::ReadBuffer;

use crate::color::{ChannelType, Color, ColorCapacity};
use crate::LANES;

/// How the driver refreshes the LEDs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferMode {
    /// One buffer, one frame per [`flush_buffer`](crate::PixelDriver::flush_buffer)
    /// call. The caller waits for [`buffer_ready`](crate::PixelDriver::buffer_ready)
    /// before touching the buffer again.
    #[default]
    SingleBlocking,
    /// One buffer streamed continuously. Writes may show up mid-frame.
    SingleContinuous,
    /// Two buffers streamed continuously, swapped at the frame gap by
    /// [`flip_buffers`](crate::PixelDriver::flip_buffers).
    Double,
}

impl BufferMode {
    /// Number of buffer halves this mode needs.
    #[must_use]
    pub const fn halves(self) -> usize {
        match self {
            Self::SingleBlocking | Self::SingleContinuous => 1,
            Self::Double => 2,
        }
    }

    /// Whether the descriptor chain loops on its own after the first frame.
    #[must_use]
    pub const fn is_free_running(self) -> bool {
        !matches!(self, Self::SingleBlocking)
    }
}

/// Words needed for one buffer half.
#[must_use]
pub const fn compute_half_words(leds_per_strip: usize, capacity: ColorCapacity) -> usize {
    leds_per_strip * capacity.bits_per_led()
}

/// Total words of storage a driver needs, both halves included.
///
/// Use it to size the `WORDS` parameter of [`PixelDriver`](crate::PixelDriver):
///
/// ```rust
/// use ws28xx_fanout::{compute_buffer_words, BufferMode, ColorCapacity};
///
/// const LEDS: usize = 100;
/// const WORDS: usize = compute_buffer_words(LEDS, ColorCapacity::Tricolor, BufferMode::Double);
/// assert_eq!(WORDS, 100 * 24 * 2);
/// ```
#[must_use]
pub const fn compute_buffer_words(
    leds_per_strip: usize,
    capacity: ColorCapacity,
    mode: BufferMode,
) -> usize {
    compute_half_words(leds_per_strip, capacity) * mode.halves()
}

/// Word range of LED `index`, `None` when it does not fit in `usize`.
fn led_words(index: usize, depth: usize) -> Option<Range<usize>> {
    let start = index.checked_mul(depth)?;
    Some(start..start.checked_add(depth)?)
}

/// Write `color` for `channel`/`index` into a bit-plane buffer half.
///
/// Only bit `channel` of the `bit_depth` words belonging to LED `index` is
/// changed. Out-of-range channels, indices and short slices are ignored.
pub fn write_color(
    plane: &mut [u32],
    leds: usize,
    channel: u8,
    index: usize,
    color: Color,
    channel_type: ChannelType,
) {
    if usize::from(channel) >= LANES || index >= leds {
        return;
    }
    let depth = channel_type.bit_depth();
    let Some(words) = led_words(index, depth).and_then(|range| plane.get_mut(range)) else {
        return;
    };

    let lane = 1u32 << channel;
    let value = color.wire_bits(channel_type);
    let mut bit = 1u32 << (depth - 1);
    for word in words.iter_mut() {
        if value & bit != 0 {
            *word |= lane;
        } else {
            *word &= !lane;
        }
        bit >>= 1;
    }
}

/// Read back the colour of `channel`/`index` from a bit-plane buffer half.
///
/// Returns [`Color::BLACK`] for out-of-range requests. Colours of 24-bit
/// channel types come back with the padding byte cleared.
#[must_use]
pub fn read_color(
    plane: &[u32],
    leds: usize,
    channel: u8,
    index: usize,
    channel_type: ChannelType,
) -> Color {
    if usize::from(channel) >= LANES || index >= leds {
        return Color::BLACK;
    }
    let depth = channel_type.bit_depth();
    let Some(words) = led_words(index, depth).and_then(|range| plane.get(range)) else {
        return Color::BLACK;
    };

    let lane = 1u32 << channel;
    let value = words
        .iter()
        .fold(0u32, |acc, word| (acc << 1) | u32::from(word & lane != 0));
    match channel_type {
        ChannelType::Grbw => Color::from_raw(value),
        ChannelType::Rgb | ChannelType::Grb => Color::from_raw(value << 8),
    }
}

/// DMA-visible storage for the bit-plane words.
///
/// Aligned to a cache line so that flushing one buffer half never touches
/// unrelated memory at its edges.
#[derive(Clone, Copy)]
#[repr(C)]
#[repr(align(32))]
pub struct PixelBuffer<const WORDS: usize> {
    words: [u32; WORDS],
}

impl<const WORDS: usize> Default for PixelBuffer<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const WORDS: usize> PixelBuffer<WORDS> {
    /// Zeroed storage.
    #[must_use]
    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Number of words held.
    #[must_use]
    pub const fn len(&self) -> usize {
        WORDS
    }

    /// Whether the storage is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        WORDS == 0
    }

    /// All words, both halves.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// All words, mutably.
    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    /// Clear every word.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }
}

unsafe impl<const WORDS: usize> ReadBuffer for PixelBuffer<WORDS> {
    type Word = u32;

    unsafe fn read_buffer(&self) -> (*const u32, usize) {
        (self.words.as_ptr(), WORDS)
    }
}

impl<const WORDS: usize> fmt::Debug for PixelBuffer<WORDS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("words", &WORDS)
            .field("bytes", &core::mem::size_of_val(&self.words))
            .finish()
    }
}

#[cfg(feature = "defmt")]
impl<const WORDS: usize> defmt::Format for PixelBuffer<WORDS> {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "PixelBuffer<{}>", WORDS);
    }
}
