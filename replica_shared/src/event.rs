//! Event and messaging system.
//!
//! A small typed event bus used for one-shot facts that correlate to, but
//! are distinct from, continuous state: "tile reached slot 4", "animation
//! finished". Producers push during event handling or tick; the host drains
//! once per frame.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, EntityKey};

/// Best-effort message from the server. Delivery order is not guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OneShot {
    /// An entity reached frame slot `slot`.
    SlotReached { id: EntityId, slot: u32 },
    /// A collectible was picked up.
    Collected { id: EntityId },
}

/// A [`OneShot`] tagged with the collection it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionMessage {
    pub collection: String,
    pub message: OneShot,
}

/// Queued when a client-driven animation runs to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationCompleted {
    pub key: EntityKey,
}

/// Typed event bus.
#[derive(Default)]
pub struct EventBus {
    queues: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl EventBus {
    /// Pushes an event into the queue.
    pub fn push<E: 'static + Send + Sync>(&mut self, e: E) {
        let q = self
            .queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<E>::new()));
        if let Some(q) = q.downcast_mut::<Vec<E>>() {
            q.push(e);
        }
    }

    /// Drains all queued events of a type.
    pub fn drain<E: 'static + Send + Sync>(&mut self) -> Vec<E> {
        self.queues
            .remove(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast::<Vec<E>>().ok())
            .map(|boxed| *boxed)
            .unwrap_or_default()
    }

    /// Number of queued events of a type.
    pub fn pending<E: 'static + Send + Sync>(&self) -> usize {
        self.queues
            .get(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast_ref::<Vec<E>>())
            .map_or(0, Vec::len)
    }

    /// Drops every queued event.
    pub fn clear(&mut self) {
        self.queues.clear();
    }
}
