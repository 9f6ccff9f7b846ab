//! Recording stand-ins for the hardware traits, used by the unit tests.

extern crate std;

use core::cell::{Cell, RefCell};
use std::vec::Vec;

use crate::chain::{Completion, Descriptor, Stage, MAX_DESCRIPTORS, PRIME_SLOT};
use crate::hal::{FlexPins, Platform, ShiftPeripheral, TransferChannel};
use crate::registry::InstanceRegistry;
use crate::timing::{
    ClockSource, FlexControl, PllSettings, ShifterConfig, ShifterControl, TimerConfig,
    TimerControl,
};
use crate::{PeripheralUnit, UNIT_COUNT};

/// One register access on a [`MockShifter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShifterWrite {
    Control(FlexControl),
    Clock(u8, u8, u8),
    Route(u8),
    Shifter(usize, ShifterControl, ShifterConfig),
    Timer(usize, TimerControl, TimerConfig, u32),
    Buffer(usize, u32),
    BufferBis(usize, u32),
    DmaRequests(u32),
}

pub struct MockShifter {
    routable: Vec<u8>,
    log: RefCell<Vec<ShifterWrite>>,
    buffers: [Cell<u32>; 4],
    buffers_bis: [Cell<u32>; 4],
}

impl MockShifter {
    pub fn new(routable: &[u8]) -> Self {
        Self {
            routable: routable.to_vec(),
            log: RefCell::new(Vec::new()),
            buffers: Default::default(),
            buffers_bis: Default::default(),
        }
    }

    pub fn take_log(&self) -> Vec<ShifterWrite> {
        self.log.take()
    }

    fn record(&self, write: ShifterWrite) {
        self.log.borrow_mut().push(write);
    }
}

impl ShiftPeripheral for MockShifter {
    fn flex_pin(&self, pin: u8) -> Option<u8> {
        self.routable
            .iter()
            .position(|p| *p == pin)
            .map(|i| i as u8 + 4)
    }

    fn route_pin(&self, pin: u8) {
        self.record(ShifterWrite::Route(pin));
    }

    fn set_clock(&self, select: u8, pre_divider: u8, post_divider: u8) {
        self.record(ShifterWrite::Clock(select, pre_divider, post_divider));
    }

    fn write_control(&self, control: FlexControl) {
        self.record(ShifterWrite::Control(control));
    }

    fn write_shifter(&self, index: usize, control: ShifterControl, config: ShifterConfig) {
        self.record(ShifterWrite::Shifter(index, control, config));
    }

    fn write_timer(&self, index: usize, control: TimerControl, config: TimerConfig, compare: u32) {
        self.record(ShifterWrite::Timer(index, control, config, compare));
    }

    fn write_shift_buffer(&self, index: usize, value: u32) {
        self.buffers[index].set(value);
        self.record(ShifterWrite::Buffer(index, value));
    }

    fn write_shift_buffer_bis(&self, index: usize, value: u32) {
        self.buffers_bis[index].set(value);
        self.record(ShifterWrite::BufferBis(index, value));
    }

    fn enable_dma_requests(&self, mask: u32) {
        self.record(ShifterWrite::DmaRequests(mask));
    }

    fn shift_buffer_address(&self, index: usize) -> *mut u32 {
        self.buffers[index].as_ptr()
    }

    fn shift_buffer_bis_address(&self, index: usize) -> *mut u32 {
        self.buffers_bis[index].as_ptr()
    }

    fn dma_request_source(&self, shifter: usize) -> u32 {
        0x40 + shifter as u32
    }
}

/// Transfer channel that keeps its records in memory and runs them on demand.
pub struct MockChannel {
    records: RefCell<[Option<Descriptor>; MAX_DESCRIPTORS]>,
    current: Cell<usize>,
    enabled: Cell<bool>,
    trigger: Cell<Option<u32>>,
    attached: Cell<Option<PeripheralUnit>>,
    pending: Cell<bool>,
    cleared: Cell<usize>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            records: RefCell::new([None; MAX_DESCRIPTORS]),
            current: Cell::new(PRIME_SLOT),
            enabled: Cell::new(false),
            trigger: Cell::new(None),
            attached: Cell::new(None),
            pending: Cell::new(false),
            cleared: Cell::new(0),
        }
    }

    pub fn attached(&self) -> Option<PeripheralUnit> {
        self.attached.get()
    }

    pub fn trigger(&self) -> Option<u32> {
        self.trigger.get()
    }

    pub fn interrupts_cleared(&self) -> usize {
        self.cleared.get()
    }

    pub fn record(&self, slot: usize) -> Option<Descriptor> {
        self.records.borrow()[slot]
    }

    /// Run records from the loaded one until the ring stops or wraps to the
    /// first record, returning the words each record moved.
    pub fn run_frame(&self) -> Vec<(Stage, Vec<u32>)> {
        let mut frame = Vec::new();
        if !self.enabled.get() {
            return frame;
        }
        let mut slot = self.current.get();
        for _ in 0..2 * MAX_DESCRIPTORS {
            let Some(record) = self.records.borrow()[slot] else {
                break;
            };
            let words = (0..usize::from(record.iterations))
                .map(|i| {
                    let source = if record.advance_source {
                        record.source.wrapping_add(i)
                    } else {
                        record.source
                    };
                    unsafe { source.read_volatile() }
                })
                .collect();
            frame.push((record.stage, words));
            if record.interrupt {
                self.pending.set(true);
            }
            match record.completion {
                Completion::Disable => {
                    self.enabled.set(false);
                    break;
                }
                Completion::Link(next) => {
                    slot = next;
                    self.current.set(next);
                    if next == PRIME_SLOT {
                        break;
                    }
                }
            }
        }
        frame
    }
}

impl TransferChannel for MockChannel {
    const MAX_ITERATIONS: u16 = 100;

    fn disable(&self) {
        self.enabled.set(false);
    }

    fn enable(&self) {
        self.enabled.set(true);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn write_descriptor(&self, slot: usize, descriptor: &Descriptor) {
        self.records.borrow_mut()[slot] = Some(*descriptor);
    }

    fn set_source(&self, slot: usize, source: *const u32) {
        if let Some(record) = self.records.borrow_mut()[slot].as_mut() {
            record.source = source;
        }
    }

    fn set_interrupt_on_completion(&self, slot: usize, enable: bool) {
        if let Some(record) = self.records.borrow_mut()[slot].as_mut() {
            record.interrupt = enable;
        }
    }

    fn load(&self, slot: usize) {
        self.current.set(slot);
    }

    fn trigger_on(&self, request: u32) {
        self.trigger.set(Some(request));
    }

    fn attach_interrupt(&self, unit: PeripheralUnit) {
        self.attached.set(Some(unit));
    }

    fn detach_interrupt(&self) {
        self.attached.set(None);
    }

    fn clear_interrupt(&self) {
        self.cleared.set(self.cleared.get() + 1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Off,
    Locking,
    Locked,
    Running,
}

/// Board with two shift peripheral units and a private registry.
pub struct MockPlatform {
    shifters: [MockShifter; UNIT_COUNT],
    available: [bool; UNIT_COUNT],
    registry: InstanceRegistry,
    source: ClockSource,
    clock: Cell<ClockState>,
    lock_polls: Cell<usize>,
    starts: Cell<usize>,
    foreign_clock_user: Cell<bool>,
    pins: RefCell<Vec<(FlexPins, bool)>>,
    flushes: RefCell<Vec<usize>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::with_clock_source(ClockSource::default())
    }

    pub fn with_clock_source(source: ClockSource) -> Self {
        let routable = [2, 3, 4, 6, 7, 8];
        Self {
            shifters: [MockShifter::new(&routable), MockShifter::new(&routable)],
            available: [true; UNIT_COUNT],
            registry: InstanceRegistry::new(),
            source,
            clock: Cell::new(ClockState::Off),
            lock_polls: Cell::new(0),
            starts: Cell::new(0),
            foreign_clock_user: Cell::new(false),
            pins: RefCell::new(Vec::new()),
            flushes: RefCell::new(Vec::new()),
        }
    }

    pub fn without_unit(mut self, unit: PeripheralUnit) -> Self {
        self.available[unit.index()] = false;
        self
    }

    pub fn set_foreign_clock_user(&self, busy: bool) {
        self.foreign_clock_user.set(busy);
    }

    pub fn clock_state(&self) -> ClockState {
        self.clock.get()
    }

    pub fn clock_starts(&self) -> usize {
        self.starts.get()
    }

    pub fn pin_log(&self) -> Vec<(FlexPins, bool)> {
        self.pins.borrow().clone()
    }

    pub fn flushed_bytes(&self) -> Vec<usize> {
        self.flushes.borrow().clone()
    }

    /// Run one frame on `channel` and, if it raised its interrupt, deliver it
    /// through this platform's registry.
    pub fn complete_frame(&self, channel: &MockChannel) -> (Vec<(Stage, Vec<u32>)>, bool) {
        let frame = channel.run_frame();
        let fired = channel.pending.replace(false);
        if fired {
            if let Some(unit) = channel.attached() {
                self.registry.dispatch(unit);
            }
        }
        (frame, fired)
    }
}

impl Platform for MockPlatform {
    type Shifter = MockShifter;
    type Channel = MockChannel;

    fn shifter(&self, unit: PeripheralUnit) -> Option<&MockShifter> {
        self.available[unit.index()].then(|| &self.shifters[unit.index()])
    }

    fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    fn clock_source(&self) -> ClockSource {
        self.source
    }

    fn clock_is_idle(&self) -> bool {
        !self.foreign_clock_user.get() && self.clock.get() == ClockState::Off
    }

    fn clock_power_down(&self) {
        self.clock.set(ClockState::Off);
    }

    fn clock_start(&self, settings: &PllSettings) {
        assert!(crate::timing::PLL_LOOP_DIVIDERS.contains(&settings.loop_divider));
        self.starts.set(self.starts.get() + 1);
        self.lock_polls.set(3);
        self.clock.set(ClockState::Locking);
    }

    fn clock_is_locked(&self) -> bool {
        let polls = self.lock_polls.get();
        if polls == 0 {
            self.clock.set(ClockState::Locked);
            return true;
        }
        self.lock_polls.set(polls - 1);
        false
    }

    fn clock_release_bypass(&self) {
        assert_eq!(self.clock.get(), ClockState::Locked);
        self.clock.set(ClockState::Running);
    }

    fn configure_pins(&self, pins: &FlexPins, enable: bool) {
        self.pins.borrow_mut().push((*pins, enable));
    }

    fn flush_cache(&self, _address: *const u8, len: usize) {
        self.flushes.borrow_mut().push(len);
    }
}
