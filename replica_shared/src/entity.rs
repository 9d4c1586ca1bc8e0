//! Entity identity and per-entity policy.
//!
//! Ids are stable keys chosen by the server and are only unique within one
//! collection, so the client keys everything by `(CollectionId, EntityId)`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which instance of a tile slot an id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotVariant {
    /// Collectible tile lying on the floor.
    Available,
    /// Tile already placed into its frame slot.
    Placed,
}

/// Stable entity key, unique within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityId {
    /// Plain integer key (tile index, vehicle number).
    Index(u32),
    /// Player session id.
    Session(String),
    /// Derived key that keeps the available and placed copies of one slot apart.
    Slot { index: u32, variant: SlotVariant },
}

impl EntityId {
    pub fn session(id: impl Into<String>) -> Self {
        EntityId::Session(id.into())
    }

    pub fn available(index: u32) -> Self {
        EntityId::Slot {
            index,
            variant: SlotVariant::Available,
        }
    }

    pub fn placed(index: u32) -> Self {
        EntityId::Slot {
            index,
            variant: SlotVariant::Placed,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Index(i) => write!(f, "#{}", i),
            EntityId::Session(s) => write!(f, "{}", s),
            EntityId::Slot {
                index,
                variant: SlotVariant::Available,
            } => write!(f, "slot{}:available", index),
            EntityId::Slot {
                index,
                variant: SlotVariant::Placed,
            } => write!(f, "slot{}:placed", index),
        }
    }
}

/// Small handle for a subscribed collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionId(pub u16);

/// Full registry key for one live entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub collection: CollectionId,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(collection: CollectionId, id: EntityId) -> Self {
        Self { collection, id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection.0, self.id)
    }
}

/// Smoothing policy, fixed when the entity is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The viewer's own entity: rendered exactly at its target.
    LocalInstant,
    /// Everyone else: exponentially smoothed with bounded extrapolation.
    RemoteSmoothed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_variants_are_distinct_keys() {
        let c = CollectionId(0);
        let a = EntityKey::new(c, EntityId::available(3));
        let b = EntityKey::new(c, EntityId::placed(3));
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "0/slot3:available");
    }

    #[test]
    fn same_id_in_other_collection_is_distinct() {
        let a = EntityKey::new(CollectionId(0), EntityId::Index(1));
        let b = EntityKey::new(CollectionId(1), EntityId::Index(1));
        assert_ne!(a, b);
    }
}
