//! Event Instance Pool
//!
//! Generational arena of `EventInstance` slots. Slots are recycled to avoid
//! allocation churn; every `acquire` bumps the slot generation so a `Handle`
//! captured earlier compares unequal once the slot is reused.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::definition::{BankId, EventDefinition};
use crate::instance::{EmitterId, EventInstance};

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Generation-checked reference to a pooled `EventInstance`
///
/// Does not own the instance. Generation 0 is never issued, so
/// `Handle::INVALID` never validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    slot: u32,
    generation: u32,
}

impl Handle {
    /// Handle returned by failed or deferred play requests
    pub const INVALID: Handle = Handle {
        slot: u32::MAX,
        generation: 0,
    };

    pub const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    #[inline]
    pub fn slot(&self) -> u32 {
        self.slot
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// True for `Handle::INVALID` and anything else never issued
    #[inline]
    pub fn is_null(&self) -> bool {
        self.generation == 0
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SLOT TABLE (cross-thread mirror)
// ═══════════════════════════════════════════════════════════════════════════════

/// Read-mostly mirror of (generation, live) per slot
///
/// Written by the owner thread, read by `EngineHandle` on any thread.
#[derive(Debug, Default)]
pub struct SlotTable {
    slots: RwLock<Vec<AtomicU64>>,
}

#[inline]
fn pack(generation: u32, live: bool) -> u64 {
    ((generation as u64) << 1) | live as u64
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, slot: u32, generation: u32, live: bool) {
        let packed = pack(generation, live);
        {
            let slots = self.slots.read();
            if let Some(entry) = slots.get(slot as usize) {
                entry.store(packed, Ordering::Release);
                return;
            }
        }
        let mut slots = self.slots.write();
        while slots.len() <= slot as usize {
            slots.push(AtomicU64::new(0));
        }
        slots[slot as usize].store(packed, Ordering::Release);
    }

    /// Handle still refers to a live instance
    pub fn is_valid(&self, handle: Handle) -> bool {
        if handle.is_null() {
            return false;
        }
        self.slots
            .read()
            .get(handle.slot as usize)
            .is_some_and(|entry| entry.load(Ordering::Acquire) == pack(handle.generation, true))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POOL
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
struct Slot {
    instance: EventInstance,
    in_use: bool,
}

/// Owner-thread pool of event instances
#[derive(Debug)]
pub struct EventInstancePool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    table: Arc<SlotTable>,
}

impl EventInstancePool {
    pub fn new(capacity: usize) -> Self {
        Self::with_table(capacity, Arc::new(SlotTable::new()))
    }

    pub(crate) fn with_table(capacity: usize, table: Arc<SlotTable>) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
            table,
        }
    }

    /// Shared validity mirror
    pub fn table(&self) -> &Arc<SlotTable> {
        &self.table
    }

    /// Take a recycled (or new) instance and initialize it
    pub fn acquire(
        &mut self,
        definition: Arc<EventDefinition>,
        bank: Option<BankId>,
        emitter: EmitterId,
        now: f64,
    ) -> Handle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    instance: EventInstance::new(),
                    in_use: false,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        debug_assert!(!slot.in_use, "slot {} handed out twice", index);

        let mut generation = slot.instance.generation().wrapping_add(1);
        if generation == 0 {
            generation = 1;
        }
        slot.instance.set_generation(generation);
        slot.instance.begin(definition, bank, emitter, now);
        slot.in_use = true;

        self.table.publish(index, generation, true);
        Handle::new(index, generation)
    }

    /// Return an instance to the free-list
    ///
    /// Clears the instance but keeps its generation; the next `acquire`
    /// of the slot bumps it. Stale or repeated releases are ignored.
    pub fn release(&mut self, handle: Handle) -> bool {
        let Some(slot) = self.slots.get_mut(handle.slot as usize) else {
            return false;
        };
        if !slot.in_use || slot.instance.generation() != handle.generation {
            return false;
        }
        slot.instance.reset();
        slot.in_use = false;
        self.free.push(handle.slot);
        self.table.publish(handle.slot, handle.generation, false);
        true
    }

    /// Refresh the cross-thread mirror after a status change
    pub(crate) fn publish(&self, handle: Handle) {
        if let Some(instance) = self.get(handle) {
            self.table
                .publish(handle.slot, handle.generation, instance.status().is_live());
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&EventInstance> {
        self.slots
            .get(handle.slot as usize)
            .filter(|s| s.in_use && s.instance.generation() == handle.generation)
            .map(|s| &s.instance)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut EventInstance> {
        self.slots
            .get_mut(handle.slot as usize)
            .filter(|s| s.in_use && s.instance.generation() == handle.generation)
            .map(|s| &mut s.instance)
    }

    /// Generation matches and the instance has not stopped
    pub fn is_valid(&self, handle: Handle) -> bool {
        self.get(handle).is_some_and(|i| i.status().is_live())
    }

    /// Every in-use slot
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &EventInstance)> {
        self.slots.iter().enumerate().filter(|(_, s)| s.in_use).map(|(i, s)| {
            (Handle::new(i as u32, s.instance.generation()), &s.instance)
        })
    }

    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
