//! Object pool for render surfaces.
//!
//! The pool owns a dense arena of surfaces. Callers hold small
//! `(index, generation)` handles instead of references; releasing a key bumps
//! the slot's generation so stale handles stop resolving. The pool grows on
//! demand and never shrinks, and it never allocates while a free slot exists.

use std::{collections::HashMap, fmt, hash::Hash};

use replica_shared::{render::RenderSurface, snapshot::Snapshot};
use tracing::{debug, warn};

/// Opaque reference to a pooled surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

struct Slot<S> {
    surface: S,
    generation: u32,
    active: bool,
}

/// Pool counters. `active + free == allocated` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub active: usize,
    pub free: usize,
    pub allocated: usize,
}

/// Keyed pool of reusable surfaces.
pub struct ObjectPool<K, S> {
    slots: Vec<Slot<S>>,
    free: Vec<u32>,
    active: HashMap<K, Handle>,
    factory: Box<dyn FnMut() -> S + Send>,
}

impl<K, S> ObjectPool<K, S>
where
    K: Eq + Hash + Clone + fmt::Display,
    S: RenderSurface,
{
    pub fn new(factory: impl FnMut() -> S + Send + 'static) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            active: HashMap::new(),
            factory: Box::new(factory),
        }
    }

    /// Creates a pool with `count` hidden surfaces ready on the free list.
    pub fn with_prewarm(factory: impl FnMut() -> S + Send + 'static, count: usize) -> Self {
        let mut pool = Self::new(factory);
        pool.prewarm(count);
        pool
    }

    /// Allocates surfaces until at least `count` are free.
    pub fn prewarm(&mut self, count: usize) {
        while self.free.len() < count {
            let index = self.allocate();
            self.free.push(index);
        }
        debug!(free = self.free.len(), "Pool prewarmed");
    }

    fn allocate(&mut self) -> u32 {
        let mut surface = (self.factory)();
        surface.set_visible(false);
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            surface,
            generation: 0,
            active: false,
        });
        index
    }

    /// Binds a surface to `key`, initialized to `initial`.
    ///
    /// A key that is already active keeps its handle; it is re-initialized
    /// in place and no second surface is taken.
    pub fn acquire(&mut self, key: K, initial: &Snapshot) -> Handle {
        let handle = match self.active.get(&key).copied() {
            Some(existing) => {
                warn!(key = %key, "Acquire on active key; reusing its handle");
                existing
            }
            None => {
                let index = match self.free.pop() {
                    Some(index) => index,
                    None => self.allocate(),
                };
                let slot = &mut self.slots[index as usize];
                slot.active = true;
                let handle = Handle {
                    index,
                    generation: slot.generation,
                };
                self.active.insert(key, handle);
                handle
            }
        };

        let surface = &mut self.slots[handle.index as usize].surface;
        surface.set_transform(initial.position, initial.rotation);
        surface.set_scale(initial.scale);
        surface.set_effects_enabled(true);
        surface.set_visible(true);
        handle
    }

    /// Returns the surface bound to `key` to the free list and hides it.
    /// Releasing a key that is not active logs and does nothing.
    pub fn release(&mut self, key: &K) -> bool {
        let Some(handle) = self.active.remove(key) else {
            warn!(key = %key, "Release of inactive key ignored");
            return false;
        };
        let slot = &mut self.slots[handle.index as usize];
        slot.active = false;
        slot.generation = slot.generation.wrapping_add(1);
        slot.surface.set_visible(false);
        self.free.push(handle.index);
        true
    }

    pub fn get_active(&self, key: &K) -> Option<Handle> {
        self.active.get(key).copied()
    }

    /// Resolves a handle; stale handles resolve to `None`.
    pub fn surface(&self, handle: Handle) -> Option<&S> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.active && slot.generation == handle.generation)
            .map(|slot| &slot.surface)
    }

    pub fn surface_mut(&mut self, handle: Handle) -> Option<&mut S> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.active && slot.generation == handle.generation)
            .map(|slot| &mut slot.surface)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.active.len(),
            free: self.free.len(),
            allocated: self.slots.len(),
        }
    }

    pub fn count_active(&self) -> usize {
        self.active.len()
    }

    pub fn count_free(&self) -> usize {
        self.free.len()
    }

    pub fn count_allocated(&self) -> usize {
        self.slots.len()
    }
}
