//! Revision floors and invalidation generations.
//!
//! The ledger remembers, per tenant, the highest revision the cache has ever
//! observed (the floor) and the generation of the last invalidation. Loads
//! capture the generation when they start and are discarded at install time
//! if it moved, or if the loaded revision sits below the floor.
//!
//! The ledger is bounded. A load pins its tenant's slot from the moment it
//! captures the generation until it installs, and pinned slots are never
//! dropped, so invalidating other tenants cannot move the generation a load
//! is checked against. Only unpinned slots are evicted; when every slot is
//! pinned the ledger grows and shrinks back as pins are released. A tenant
//! without a slot reads the generation of the last `invalidate_all`.

use lru::LruCache;
use std::num::NonZeroUsize;
use tenantry_core::{Revision, TenantId};

/// Monotonic invalidation counter value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub const fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
struct LedgerSlot {
    floor: Revision,
    generation: Generation,
    /// Loads in flight that captured `generation`.
    pins: u32,
}

/// Bounded per-tenant record of revision floors and invalidation generations.
#[derive(Debug)]
pub struct RevisionLedger {
    slots: LruCache<TenantId, LedgerSlot>,
    capacity: NonZeroUsize,
    next_generation: u64,
    forgotten: Generation,
}

impl RevisionLedger {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            slots: LruCache::new(capacity),
            capacity,
            next_generation: 1,
            forgotten: Generation::default(),
        }
    }

    /// Current invalidation generation for a tenant.
    pub fn generation(&self, tenant: &TenantId) -> Generation {
        self.slots
            .peek(tenant)
            .map(|slot| slot.generation)
            .unwrap_or(self.forgotten)
    }

    /// Highest revision recorded for a tenant outside the resident cache.
    pub fn floor(&self, tenant: &TenantId) -> Revision {
        self.slots
            .peek(tenant)
            .map(|slot| slot.floor)
            .unwrap_or(Revision::ZERO)
    }

    /// Raise the floor for a tenant. Never lowers it.
    pub fn raise_floor(&mut self, tenant: &TenantId, revision: Revision) {
        let slot = self.slot_mut(tenant);
        if revision > slot.floor {
            slot.floor = revision;
        }
    }

    /// Start a new invalidation generation for a tenant, optionally raising
    /// its floor at the same time. Returns the new generation.
    pub fn invalidate(&mut self, tenant: &TenantId, floor: Option<Revision>) -> Generation {
        let generation = Generation(self.next_generation);
        self.next_generation += 1;
        let slot = self.slot_mut(tenant);
        slot.generation = generation;
        if let Some(revision) = floor {
            if revision > slot.floor {
                slot.floor = revision;
            }
        }
        generation
    }

    /// Capture a tenant's generation for a load and keep its slot resident
    /// until [`unpin`](Self::unpin).
    pub fn pin(&mut self, tenant: &TenantId) -> Generation {
        let slot = self.slot_mut(tenant);
        slot.pins += 1;
        slot.generation
    }

    /// Release a pin taken by [`pin`](Self::pin).
    pub fn unpin(&mut self, tenant: &TenantId) {
        if let Some(slot) = self.slots.peek_mut(tenant) {
            slot.pins = slot.pins.saturating_sub(1);
        }
        if self.slots.cap() > self.capacity {
            self.shrink();
        }
    }

    /// Number of pins held on a tenant's slot.
    pub fn pins(&self, tenant: &TenantId) -> u32 {
        self.slots.peek(tenant).map(|slot| slot.pins).unwrap_or(0)
    }

    /// Start a new generation for every tenant at once.
    pub fn invalidate_all(&mut self) -> Generation {
        let generation = Generation(self.next_generation);
        self.next_generation += 1;
        for (_, slot) in self.slots.iter_mut() {
            slot.generation = generation;
        }
        self.forgotten = generation;
        generation
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn least_recent_unpinned(&self) -> Option<TenantId> {
        self.slots
            .iter()
            .rev()
            .find(|(_, slot)| slot.pins == 0)
            .map(|(key, _)| key.clone())
    }

    /// Drop unpinned slots until the ledger is back within its capacity.
    fn shrink(&mut self) {
        while self.slots.len() > self.capacity.get() {
            match self.least_recent_unpinned() {
                Some(key) => {
                    self.slots.pop(&key);
                }
                None => break,
            }
        }
        let target = NonZeroUsize::new(self.slots.len())
            .map_or(self.capacity, |len| len.max(self.capacity));
        if target < self.slots.cap() {
            self.slots.resize(target);
        }
    }

    fn slot_mut(&mut self, tenant: &TenantId) -> &mut LedgerSlot {
        if !self.slots.contains(tenant) && self.slots.len() >= self.slots.cap().get() {
            match self.least_recent_unpinned() {
                Some(key) => {
                    self.slots.pop(&key);
                }
                None => {
                    // Every slot backs a load in flight.
                    let grown = self.slots.cap().saturating_add(1);
                    self.slots.resize(grown);
                }
            }
        }
        let forgotten = self.forgotten;
        self.slots.get_or_insert_mut(tenant.clone(), || LedgerSlot {
            floor: Revision::ZERO,
            generation: forgotten,
            pins: 0,
        })
    }
}
