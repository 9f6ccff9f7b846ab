//! Transfer descriptor ring that streams one buffer half into the shift
//! peripheral.
//!
//! The ring is made of linked transfer records, one per stage:
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   ▼                                                                  │
//! PrimeGate ─► OpenGate ─► DataStream(0) ─► … ─► DataStream(n-1) ─► CloseGate ─► FrameGap
//!                                                                                  │
//!                                              SingleBlocking: stop ◄──────────────┘
//! ```
//!
//! - `PrimeGate` puts a zero word into the data shifter so the first request
//!   of the frame has something to shift out.
//! - `OpenGate` loads ones into the gate shifter: every bit period now starts
//!   high.
//! - `DataStream` segments move the buffer half, one word per data shifter
//!   request. A single record is limited to the channel's major loop count.
//! - `CloseGate` loads zeros into the gate shifter so the lines stay low. It
//!   is the record that raises the buffer swap interrupt.
//! - `FrameGap` writes zeros from a fixed address for 240 bit periods.

use heapless::Vec;

use crate::error::Error;
use crate::hal::ShiftPeripheral;
use crate::timing::{FRAME_GAP_BITS, SHIFTER_DATA, SHIFTER_GATE};

/// Upper limit on data segments per chain.
pub const MAX_SEGMENTS: usize = 4;

/// Records in the longest possible chain.
pub const MAX_DESCRIPTORS: usize = MAX_SEGMENTS + 4;

/// Slot of the first record of every frame.
pub const PRIME_SLOT: usize = 0;

/// Source word for zero writes. Never written.
pub static ZEROS: u32 = 0;

/// Source word for all-ones writes. Never written.
pub static ONES: u32 = !0;

/// Role of one record in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    /// Zero into the data shifter before the frame.
    PrimeGate,
    /// Ones into the gate shifter.
    OpenGate,
    /// One segment of pixel data.
    DataStream(u8),
    /// Zeros into the gate shifter after the frame.
    CloseGate,
    /// Reset interval between frames.
    FrameGap,
}

/// What the channel does once a record finishes its major loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Completion {
    /// Load the record in this slot and keep going.
    Link(usize),
    /// Stop servicing requests.
    Disable,
}

/// One transfer record, independent of the channel's memory layout.
///
/// Each request moves a single 32-bit word from `source` to `destination`;
/// `source` advances by one word per request when `advance_source` is set and
/// is restored at the end of the major loop otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Role in the ring.
    pub stage: Stage,
    /// First source word.
    pub source: *const u32,
    /// Whether the source advances per request.
    pub advance_source: bool,
    /// Peripheral register written by every request.
    pub destination: *mut u32,
    /// Requests in the major loop.
    pub iterations: u16,
    /// Next record or stop.
    pub completion: Completion,
    /// Raise an interrupt when the major loop completes.
    pub interrupt: bool,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Descriptor {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "Descriptor(stage={}, source={=usize:#x}, destination={=usize:#x}, iterations={}, completion={}, interrupt={})",
            self.stage,
            self.source as usize,
            self.destination as usize,
            self.iterations,
            self.completion,
            self.interrupt,
        );
    }
}

/// Slot assignment for a chain over `half_words` words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChainLayout {
    half_words: usize,
    max_iterations: usize,
    segments: usize,
}

impl ChainLayout {
    /// Plan the ring, failing when the buffer half needs more than
    /// [`MAX_SEGMENTS`] data records.
    ///
    /// # Errors
    ///
    /// [`Error::BufferTooLarge`] when the segment count exceeds the limit.
    pub fn new(half_words: usize, max_iterations: u16) -> Result<Self, Error> {
        let max_iterations = usize::from(max_iterations.max(1));
        let segments = half_words.div_ceil(max_iterations).max(1);
        if segments > MAX_SEGMENTS {
            return Err(Error::BufferTooLarge);
        }
        Ok(Self {
            half_words,
            max_iterations,
            segments,
        })
    }

    /// Number of data records.
    #[must_use]
    pub const fn segments(&self) -> usize {
        self.segments
    }

    /// Number of records in the ring.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.segments + 4
    }

    /// Never empty: gate and gap records are always present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Words per buffer half.
    #[must_use]
    pub const fn half_words(&self) -> usize {
        self.half_words
    }

    /// Slot holding `stage`, `None` for a data segment past the end.
    #[must_use]
    pub fn slot(&self, stage: Stage) -> Option<usize> {
        match stage {
            Stage::PrimeGate => Some(PRIME_SLOT),
            Stage::OpenGate => Some(1),
            Stage::DataStream(i) if usize::from(i) < self.segments => Some(2 + usize::from(i)),
            Stage::DataStream(_) => None,
            Stage::CloseGate => Some(2 + self.segments),
            Stage::FrameGap => Some(3 + self.segments),
        }
    }

    /// Slot of the record that raises the swap interrupt.
    #[must_use]
    pub const fn close_slot(&self) -> usize {
        2 + self.segments
    }

    /// Slot of the first data record.
    #[must_use]
    pub const fn first_data_slot(&self) -> usize {
        2
    }

    /// Start address and word count of every data segment for a buffer half
    /// starting at `base`.
    pub fn data_sources(
        &self,
        base: *const u32,
    ) -> impl Iterator<Item = (*const u32, usize)> + '_ {
        (0..self.segments).map(move |i| {
            let offset = i * self.max_iterations;
            let words = (self.half_words - offset).min(self.max_iterations);
            (base.wrapping_add(offset), words)
        })
    }
}

/// Fully built ring of records.
#[derive(Debug, Clone)]
pub struct DescriptorChain {
    records: Vec<Descriptor, MAX_DESCRIPTORS>,
}

impl DescriptorChain {
    /// Build the records for `layout`, streaming from `base` into `peripheral`.
    ///
    /// `free_running` links the frame gap back to the first record, otherwise
    /// the channel stops after one frame.
    pub fn build<S: ShiftPeripheral>(
        layout: &ChainLayout,
        peripheral: &S,
        base: *const u32,
        free_running: bool,
    ) -> Self {
        let data = peripheral.shift_buffer_bis_address(SHIFTER_DATA);
        let gate = peripheral.shift_buffer_address(SHIFTER_GATE);
        let gap = peripheral.shift_buffer_address(SHIFTER_DATA);
        let zeros: *const u32 = &ZEROS;
        let ones: *const u32 = &ONES;

        let single = |stage, source, destination, next| Descriptor {
            stage,
            source,
            advance_source: false,
            destination,
            iterations: 1,
            completion: Completion::Link(next),
            interrupt: false,
        };

        let mut records = Vec::new();
        let mut push = |record: Descriptor| {
            let pushed = records.push(record);
            debug_assert!(pushed.is_ok(), "layout allows at most {MAX_DESCRIPTORS} records");
        };

        push(single(Stage::PrimeGate, zeros, data, 1));
        push(single(Stage::OpenGate, ones, gate, layout.first_data_slot()));
        for (i, (source, words)) in layout.data_sources(base).enumerate() {
            push(Descriptor {
                stage: Stage::DataStream(i as u8),
                source,
                advance_source: true,
                destination: data,
                iterations: words as u16,
                completion: Completion::Link(layout.first_data_slot() + i + 1),
                interrupt: false,
            });
        }
        let gap_slot = layout.close_slot() + 1;
        push(single(Stage::CloseGate, zeros, gate, gap_slot));
        push(Descriptor {
            stage: Stage::FrameGap,
            source: zeros,
            advance_source: false,
            destination: gap,
            iterations: FRAME_GAP_BITS,
            completion: if free_running {
                Completion::Link(PRIME_SLOT)
            } else {
                Completion::Disable
            },
            interrupt: false,
        });

        Self { records }
    }

    /// The records in slot order.
    #[must_use]
    pub fn records(&self) -> &[Descriptor] {
        &self.records
    }

    /// Record in `slot`.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&Descriptor> {
        self.records.get(slot)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::mock::MockShifter;

    fn build(
        shifter: &MockShifter,
        half_words: usize,
        max: u16,
        free_running: bool,
    ) -> (ChainLayout, DescriptorChain) {
        let layout = ChainLayout::new(half_words, max).unwrap();
        let base = 0x2000_0000 as *const u32;
        let chain = DescriptorChain::build(&layout, shifter, base, free_running);
        (layout, chain)
    }

    fn shifter() -> MockShifter {
        MockShifter::new(&[2, 3, 4])
    }

    #[test]
    fn test_segment_count() {
        assert_eq!(ChainLayout::new(72, 0x7FFF).unwrap().segments(), 1);
        assert_eq!(ChainLayout::new(0x7FFF, 0x7FFF).unwrap().segments(), 1);
        assert_eq!(ChainLayout::new(0x8000, 0x7FFF).unwrap().segments(), 2);
        assert_eq!(ChainLayout::new(4 * 0x7FFF, 0x7FFF).unwrap().segments(), 4);
        assert_eq!(
            ChainLayout::new(4 * 0x7FFF + 1, 0x7FFF),
            Err(Error::BufferTooLarge)
        );
        assert_eq!(ChainLayout::new(100, 10), Err(Error::BufferTooLarge));
        assert_eq!(ChainLayout::new(40, 10).unwrap().segments(), 4);
    }

    #[test]
    fn test_slot_order() {
        let layout = ChainLayout::new(25, 10).unwrap();
        assert_eq!(layout.len(), 7);
        assert_eq!(layout.slot(Stage::PrimeGate), Some(0));
        assert_eq!(layout.slot(Stage::OpenGate), Some(1));
        assert_eq!(layout.slot(Stage::DataStream(0)), Some(2));
        assert_eq!(layout.slot(Stage::DataStream(2)), Some(4));
        assert_eq!(layout.slot(Stage::DataStream(3)), None);
        assert_eq!(layout.slot(Stage::CloseGate), Some(5));
        assert_eq!(layout.slot(Stage::FrameGap), Some(6));
        assert_eq!(layout.close_slot(), 5);
    }

    #[test]
    fn test_data_sources_split() {
        let layout = ChainLayout::new(25, 10).unwrap();
        let base = 0x1000 as *const u32;
        let sources: std::vec::Vec<_> = layout.data_sources(base).collect();
        assert_eq!(
            sources,
            std::vec![
                (0x1000 as *const u32, 10),
                (0x1028 as *const u32, 10),
                (0x1050 as *const u32, 5),
            ]
        );

        // an exact multiple keeps the full count in the last segment
        let layout = ChainLayout::new(20, 10).unwrap();
        let last = layout.data_sources(base).last().unwrap();
        assert_eq!(last.1, 10);
    }

    #[test]
    fn test_ring_links_blocking() {
        let (layout, chain) = build(&shifter(), 72, 0x7FFF, false);
        let records = chain.records();
        assert_eq!(records.len(), layout.len());

        let stages: std::vec::Vec<_> = records.iter().map(|r| r.stage).collect();
        assert_eq!(
            stages,
            std::vec![
                Stage::PrimeGate,
                Stage::OpenGate,
                Stage::DataStream(0),
                Stage::CloseGate,
                Stage::FrameGap,
            ]
        );
        for (slot, record) in records.iter().enumerate().take(records.len() - 1) {
            assert_eq!(record.completion, Completion::Link(slot + 1));
        }
        assert_eq!(records[4].completion, Completion::Disable);
        assert!(records.iter().all(|r| !r.interrupt));
    }

    #[test]
    fn test_ring_links_free_running() {
        let (_, chain) = build(&shifter(), 72, 0x7FFF, true);
        let gap = chain.records().last().unwrap();
        assert_eq!(gap.stage, Stage::FrameGap);
        assert_eq!(gap.completion, Completion::Link(PRIME_SLOT));
    }

    #[test]
    fn test_record_contents() {
        let shifter = shifter();
        let (_, chain) = build(&shifter, 72, 0x7FFF, true);
        let zeros: *const u32 = &ZEROS;
        let ones: *const u32 = &ONES;

        let prime = chain.get(0).unwrap();
        assert_eq!(prime.source, zeros);
        assert_eq!(prime.destination, shifter.shift_buffer_bis_address(1));
        assert_eq!(prime.iterations, 1);

        let open = chain.get(1).unwrap();
        assert_eq!(open.source, ones);
        assert_eq!(open.destination, shifter.shift_buffer_address(0));

        let data = chain.get(2).unwrap();
        assert_eq!(data.source, 0x2000_0000 as *const u32);
        assert!(data.advance_source);
        assert_eq!(data.iterations, 72);
        assert_eq!(data.destination, shifter.shift_buffer_bis_address(1));

        let close = chain.get(3).unwrap();
        assert_eq!(close.source, zeros);
        assert_eq!(close.destination, shifter.shift_buffer_address(0));

        let gap = chain.get(4).unwrap();
        assert_eq!(gap.source, zeros);
        assert!(!gap.advance_source);
        assert_eq!(gap.iterations, 240);
        assert_eq!(gap.destination, shifter.shift_buffer_address(1));

        assert!(chain.get(5).is_none());
    }

    #[test]
    fn test_multi_segment_chain() {
        let (layout, chain) = build(&shifter(), 35, 10, true);
        assert_eq!(layout.segments(), 4);
        assert_eq!(chain.records().len(), MAX_DESCRIPTORS);
        let counts: std::vec::Vec<_> = chain.records()[2..6].iter().map(|r| r.iterations).collect();
        assert_eq!(counts, std::vec![10, 10, 10, 5]);
        assert_eq!(chain.get(5).unwrap().completion, Completion::Link(6));
        assert_eq!(chain.get(6).unwrap().stage, Stage::CloseGate);
        // the longest ring still fits every record, frame gap last
        let gap = chain.records().last().unwrap();
        assert_eq!(gap.stage, Stage::FrameGap);
        assert_eq!(gap.completion, Completion::Link(PRIME_SLOT));
    }
}
