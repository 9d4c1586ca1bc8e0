//! Authoritative feed.
//!
//! Holds the authoritative snapshot of every replicated entity together with
//! the value last transmitted for it. Writes go through the significance
//! filter built from the same config the client uses, so a delta is sent
//! exactly when the client would consider it worth marking dirty.

use std::collections::HashMap;

use anyhow::{bail, Context};
use bytes::Bytes;
use replica_shared::{
    config::ReplicaConfig,
    entity::EntityId,
    event::OneShot,
    net::{encode_event, NetEvent},
    significance::Significance,
    snapshot::{Field, FieldValue, Snapshot},
};
use tracing::{debug, trace};

struct Tracked {
    authoritative: Snapshot,
    sent: Snapshot,
}

/// Server-side table of replicated entities and their pending outbound events.
pub struct AuthoritativeFeed {
    significance: Significance,
    entities: HashMap<(String, EntityId), Tracked>,
    outbox: Vec<NetEvent>,
    suppressed: u64,
}

impl AuthoritativeFeed {
    pub fn new(cfg: &ReplicaConfig) -> Self {
        Self {
            significance: Significance::from_config(cfg),
            entities: HashMap::new(),
            outbox: Vec::new(),
            suppressed: 0,
        }
    }

    /// Registers an entity and queues its add.
    pub fn spawn(&mut self, collection: &str, id: EntityId, snapshot: Snapshot) -> anyhow::Result<()> {
        let snapshot = snapshot
            .validate()
            .with_context(|| format!("spawn {}/{}", collection, id))?;
        let key = (collection.to_string(), id.clone());
        if self.entities.contains_key(&key) {
            bail!("{}/{} already spawned", collection, id);
        }
        self.outbox.push(NetEvent::add(collection, id.clone(), &snapshot));
        self.entities.insert(
            key,
            Tracked {
                authoritative: snapshot,
                sent: snapshot,
            },
        );
        debug!(collection, id = %id, "Spawned");
        Ok(())
    }

    /// Writes one field. Returns whether a change was queued for transmission.
    pub fn set_field(
        &mut self,
        collection: &str,
        id: &EntityId,
        field: Field,
        value: FieldValue,
    ) -> anyhow::Result<bool> {
        let Some(tracked) = self.entities.get_mut(&(collection.to_string(), id.clone())) else {
            bail!("{}/{} is not spawned", collection, id);
        };
        tracked
            .authoritative
            .set(field, value)
            .with_context(|| format!("set {} on {}/{}", field.name(), collection, id))?;

        // Compare against what the client last received, not the last write,
        // so slow drift still goes out once it adds up.
        let current = tracked.authoritative.get(field);
        let Some(current) = current else {
            return Ok(false);
        };
        if !self.significance.field_changed(tracked.sent.get(field), current) {
            self.suppressed += 1;
            trace!(collection, id = %id, field = field.name(), "Delta below threshold");
            return Ok(false);
        }
        tracked.sent.set(field, current)?;
        self.outbox
            .push(NetEvent::change(collection, id.clone(), field, current));
        Ok(true)
    }

    /// Drops an entity and queues its remove. Unknown ids are a no-op.
    pub fn despawn(&mut self, collection: &str, id: &EntityId) -> bool {
        if self
            .entities
            .remove(&(collection.to_string(), id.clone()))
            .is_none()
        {
            return false;
        }
        self.outbox.push(NetEvent::remove(collection, id.clone()));
        debug!(collection, id = %id, "Despawned");
        true
    }

    /// Queues a best-effort one-shot message.
    pub fn announce(&mut self, collection: &str, message: OneShot) {
        self.outbox.push(NetEvent::Message {
            collection: collection.to_string(),
            message,
        });
    }

    pub fn get(&self, collection: &str, id: &EntityId) -> Option<&Snapshot> {
        self.entities
            .get(&(collection.to_string(), id.clone()))
            .map(|t| &t.authoritative)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Writes that stayed below the significance threshold.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn drain_outbox(&mut self) -> Vec<NetEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Drains the outbox as encoded frames.
    pub fn encode_outbox(&mut self) -> anyhow::Result<Vec<Bytes>> {
        self.drain_outbox().iter().map(encode_event).collect()
    }
}
