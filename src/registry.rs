//! Table of live drivers, one slot per peripheral unit.
//!
//! The transfer-complete interrupt has no context argument, so each unit's
//! vector calls [`on_interrupt`] (or one of [`INTERRUPT_HANDLERS`]) and the
//! table routes it to the driver that claimed the unit. Entries are type
//! erased: a pointer to the pinned driver plus the monomorphised function that
//! knows how to service it.

use core::cell::RefCell;
use core::ptr::NonNull;

use critical_section::Mutex;

use crate::{PeripheralUnit, UNIT_COUNT};

/// Back reference to a registered driver.
#[derive(Clone, Copy)]
struct Slot {
    context: NonNull<()>,
    service: unsafe fn(NonNull<()>),
}

// SAFETY: the pointer is only dereferenced through `service`, which the
// registering driver guarantees stays valid until it releases the slot.
unsafe impl Send for Slot {}

/// Claims on the peripheral units and their interrupt targets.
pub struct InstanceRegistry {
    slots: Mutex<RefCell<[Option<Slot>; UNIT_COUNT]>>,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceRegistry {
    /// Empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(RefCell::new([None; UNIT_COUNT])),
        }
    }

    /// Whether a driver holds `unit`.
    #[must_use]
    pub fn is_claimed(&self, unit: PeripheralUnit) -> bool {
        critical_section::with(|cs| self.slots.borrow_ref(cs)[unit.index()].is_some())
    }

    /// Number of units currently held.
    #[must_use]
    pub fn active_count(&self) -> usize {
        critical_section::with(|cs| self.slots.borrow_ref(cs).iter().flatten().count())
    }

    /// Take `unit` for the driver at `context`.
    ///
    /// `first_allowed` is consulted inside the same critical section when no
    /// other unit is held, so a check on shared resources and the claim happen
    /// atomically. Returns `Ok(true)` when no other unit was held, `Err(true)`
    /// when the unit was already taken and `Err(false)` when `first_allowed`
    /// refused.
    ///
    /// # Safety
    ///
    /// `context` must stay valid for `service` until [`release`](Self::release)
    /// is called for `unit`.
    pub unsafe fn claim(
        &self,
        unit: PeripheralUnit,
        context: NonNull<()>,
        service: unsafe fn(NonNull<()>),
        first_allowed: impl FnOnce() -> bool,
    ) -> Result<bool, bool> {
        critical_section::with(|cs| {
            let mut slots = self.slots.borrow_ref_mut(cs);
            if slots[unit.index()].is_some() {
                return Err(true);
            }
            let first = slots.iter().all(Option::is_none);
            if first && !first_allowed() {
                return Err(false);
            }
            slots[unit.index()] = Some(Slot { context, service });
            Ok(first)
        })
    }

    /// Give `unit` back. Nothing happens when it is not held.
    ///
    /// Returns `true` when this emptied the table.
    pub fn release(&self, unit: PeripheralUnit) -> bool {
        critical_section::with(|cs| {
            let mut slots = self.slots.borrow_ref_mut(cs);
            slots[unit.index()].take().is_some() && slots.iter().all(Option::is_none)
        })
    }

    /// Run the service routine of the driver holding `unit`, if any.
    ///
    /// The routine runs outside the critical section.
    pub fn dispatch(&self, unit: PeripheralUnit) {
        let slot = critical_section::with(|cs| self.slots.borrow_ref(cs)[unit.index()]);
        if let Some(slot) = slot {
            // SAFETY: the claim contract keeps `context` valid while the slot exists.
            unsafe { (slot.service)(slot.context) }
        }
    }
}

/// Process wide table used by default.
pub static INSTANCES: InstanceRegistry = InstanceRegistry::new();

/// Route a transfer-complete interrupt of `unit` to its driver.
pub fn on_interrupt(unit: PeripheralUnit) {
    INSTANCES.dispatch(unit);
}

fn on_interrupt_unit0() {
    on_interrupt(PeripheralUnit::Unit0);
}

fn on_interrupt_unit1() {
    on_interrupt(PeripheralUnit::Unit1);
}

/// Plain handlers per unit for interrupt tables that take `fn()`.
pub static INTERRUPT_HANDLERS: [fn(); UNIT_COUNT] = [on_interrupt_unit0, on_interrupt_unit1];

#[cfg(test)]
mod tests {
    extern crate std;

    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    unsafe fn bump(context: NonNull<()>) {
        unsafe { context.cast::<AtomicUsize>().as_ref() }.fetch_add(1, Ordering::Relaxed);
    }

    fn context(counter: &AtomicUsize) -> NonNull<()> {
        NonNull::from(counter).cast()
    }

    #[test]
    fn test_claim_and_release() {
        let registry = InstanceRegistry::new();
        let counter = AtomicUsize::new(0);

        assert!(!registry.is_claimed(PeripheralUnit::Unit0));
        assert_eq!(registry.active_count(), 0);

        assert_eq!(
            unsafe { registry.claim(PeripheralUnit::Unit0, context(&counter), bump, || true) },
            Ok(true)
        );
        assert!(registry.is_claimed(PeripheralUnit::Unit0));
        assert!(!registry.is_claimed(PeripheralUnit::Unit1));
        assert_eq!(registry.active_count(), 1);

        assert!(registry.release(PeripheralUnit::Unit0));
        assert!(!registry.is_claimed(PeripheralUnit::Unit0));
        assert_eq!(registry.active_count(), 0);

        // releasing twice is harmless and does not count as the last one
        assert!(!registry.release(PeripheralUnit::Unit0));
    }

    #[test]
    fn test_claim_is_exclusive() {
        let registry = InstanceRegistry::new();
        let counter = AtomicUsize::new(0);
        assert_eq!(
            unsafe { registry.claim(PeripheralUnit::Unit1, context(&counter), bump, || true) },
            Ok(true)
        );
        assert_eq!(
            unsafe { registry.claim(PeripheralUnit::Unit1, context(&counter), bump, || true) },
            Err(true)
        );
    }

    #[test]
    fn test_first_and_last_are_reported_once() {
        let registry = InstanceRegistry::new();
        let counter = AtomicUsize::new(0);

        let claims = unsafe {
            (
                registry.claim(PeripheralUnit::Unit1, context(&counter), bump, || true),
                registry.claim(PeripheralUnit::Unit0, context(&counter), bump, || true),
            )
        };
        assert_eq!(claims, (Ok(true), Ok(false)));

        assert!(!registry.release(PeripheralUnit::Unit1));
        assert!(registry.release(PeripheralUnit::Unit0));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_first_check_only_for_first_claim() {
        let registry = InstanceRegistry::new();
        let counter = AtomicUsize::new(0);

        assert_eq!(
            unsafe { registry.claim(PeripheralUnit::Unit0, context(&counter), bump, || false) },
            Err(false)
        );
        assert_eq!(registry.active_count(), 0);

        assert_eq!(
            unsafe { registry.claim(PeripheralUnit::Unit0, context(&counter), bump, || true) },
            Ok(true)
        );
        // second unit shares the already running clock
        assert_eq!(
            unsafe { registry.claim(PeripheralUnit::Unit1, context(&counter), bump, || false) },
            Ok(false)
        );
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn test_dispatch_routes_by_unit() {
        let registry = InstanceRegistry::new();
        let zero = AtomicUsize::new(0);
        let one = AtomicUsize::new(0);

        registry.dispatch(PeripheralUnit::Unit0);

        let claims = unsafe {
            (
                registry.claim(PeripheralUnit::Unit0, context(&zero), bump, || true),
                registry.claim(PeripheralUnit::Unit1, context(&one), bump, || true),
            )
        };
        assert_eq!(claims, (Ok(true), Ok(false)));

        registry.dispatch(PeripheralUnit::Unit0);
        registry.dispatch(PeripheralUnit::Unit0);
        registry.dispatch(PeripheralUnit::Unit1);
        assert_eq!(zero.load(Ordering::Relaxed), 2);
        assert_eq!(one.load(Ordering::Relaxed), 1);

        assert!(!registry.release(PeripheralUnit::Unit0));
        registry.dispatch(PeripheralUnit::Unit0);
        assert_eq!(zero.load(Ordering::Relaxed), 2);
    }
}
