//! Shared resource cache.
//!
//! Memoizes render-side resources that many pooled objects share (materials,
//! geometry, textures). The cache is an ordinary value passed by reference;
//! dependents hold `Arc`s and teardown only disposes entries nobody else
//! holds anymore.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use tracing::{debug, warn};

type Entry = Arc<dyn Any + Send + Sync>;

/// Keyed, typed cache of shared resources.
#[derive(Default)]
pub struct SharedResourceCache {
    by_type: HashMap<TypeId, HashMap<String, Entry>>,
    /// Insertion order, so teardown can dispose in reverse.
    order: Vec<(TypeId, String)>,
}

impl SharedResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached resource under `key`, creating it with `make` on first use.
    pub fn get_or_insert_with<T, F>(&mut self, key: &str, make: F) -> Arc<T>
    where
        T: 'static + Send + Sync,
        F: FnOnce() -> T,
    {
        let type_id = TypeId::of::<T>();
        if let Some(found) = self.get::<T>(key) {
            return found;
        }
        let value = Arc::new(make());
        self.by_type
            .entry(type_id)
            .or_default()
            .insert(key.to_string(), value.clone());
        self.order.push((type_id, key.to_string()));
        debug!(key, "Shared resource created");
        value
    }

    pub fn get<T: 'static + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|map| map.get(key))
            .and_then(|entry| entry.clone().downcast::<T>().ok())
    }

    /// Number of live dependents outside the cache.
    pub fn dependents<T: 'static + Send + Sync>(&self, key: &str) -> usize {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|map| map.get(key))
            .map_or(0, |entry| Arc::strong_count(entry) - 1)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Disposes every entry without dependents. Returns how many were dropped.
    pub fn purge_unused(&mut self) -> usize {
        let before = self.order.len();
        let by_type = &mut self.by_type;
        self.order.retain(|(type_id, key)| {
            let Some(map) = by_type.get_mut(type_id) else {
                return false;
            };
            let unused = map.get(key).map_or(true, |e| Arc::strong_count(e) == 1);
            if unused {
                map.remove(key);
            }
            !unused
        });
        before - self.order.len()
    }

    /// Disposes in reverse creation order. Entries still held by dependents are
    /// kept and their keys returned.
    pub fn teardown(&mut self) -> Vec<String> {
        let mut kept = Vec::new();
        while let Some((type_id, key)) = self.order.pop() {
            let Some(map) = self.by_type.get_mut(&type_id) else {
                continue;
            };
            match map.get(&key) {
                Some(entry) if Arc::strong_count(entry) > 1 => {
                    warn!(key = %key, dependents = Arc::strong_count(entry) - 1, "Resource still referenced at teardown");
                    kept.push((type_id, key));
                }
                _ => {
                    map.remove(&key);
                }
            }
        }
        let survivors = kept.iter().map(|(_, key)| key.clone()).collect();
        kept.reverse();
        self.order = kept;
        survivors
    }
}
