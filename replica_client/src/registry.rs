//! Entity registry.
//!
//! Owns the target/current state of every live entity, applies lifecycle
//! events from the replication channel, and drives the per-frame tick.
//!
//! Threading model: network handlers (`on_add`, `on_field_change`,
//! `on_remove`) and `tick` are called from the same loop and never overlap.
//! Handlers only write `target`/`dirty`; only `tick` writes `current`.
//! Hosts that receive on another thread feed events through
//! [`crate::mailbox`].

use std::collections::HashMap;

use anyhow::Context;
use replica_shared::{
    config::ReplicaConfig,
    entity::{CollectionId, EntityId, EntityKey, Role},
    event::{AnimationCompleted, CollectionMessage, EventBus, OneShot},
    math::Vec3,
    net::{NetEvent, ReplicaEvent},
    render::{FieldSink, RenderSurface},
    significance::Significance,
    snapshot::{DirtyFields, Field, FieldValue, ScalarField, Snapshot},
};
use tracing::{debug, info, trace, warn};

use crate::{
    culling::{Diagnostics, EffectCuller},
    interp::{self, Animation, CompletionCallback, Extrapolator, Policy},
    pool::{Handle, ObjectPool, PoolStats},
};

/// Per-entity reconciliation state.
#[derive(Debug)]
pub struct EntityState {
    role: Role,
    target: Snapshot,
    current: Snapshot,
    dirty: DirtyFields,
    motion: Extrapolator,
    animation: Option<Animation>,
    effects_enabled: bool,
    handle: Handle,
}

impl EntityState {
    fn new(role: Role, snapshot: Snapshot, now: f64, handle: Handle) -> Self {
        Self {
            role,
            target: snapshot,
            current: snapshot,
            dirty: DirtyFields::empty(),
            motion: Extrapolator::new(snapshot.position, now),
            animation: None,
            effects_enabled: true,
            handle,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Latest authoritative snapshot.
    pub fn target(&self) -> &Snapshot {
        &self.target
    }

    /// Last rendered snapshot.
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    pub fn dirty(&self) -> DirtyFields {
        self.dirty
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn inferred_velocity(&self) -> Vec3 {
        self.motion.velocity()
    }

    /// Extrapolation offset applied on the most recent tick.
    pub fn extrapolated_lead(&self) -> Vec3 {
        self.motion.lead()
    }

    pub fn last_update_time(&self) -> f64 {
        self.motion.last_update()
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    pub fn effects_enabled(&self) -> bool {
        self.effects_enabled
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }
}

/// Result of feeding one event to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Applied,
    /// Duplicate add folded into the existing entity.
    Reused,
    /// Protocol race (unknown id or collection); nothing changed.
    Ignored,
    /// Malformed data; previous state retained.
    Rejected,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickStats {
    /// Entities advanced by smoothing or instant apply.
    pub ticked: usize,
    /// Entities skipped by the static fast path.
    pub skipped: usize,
    pub animating: usize,
    /// Remote entities that settled onto their target this tick.
    pub converged: usize,
    pub animations_completed: usize,
    pub scalars_delivered: usize,
}

struct Collection {
    name: String,
    role: Role,
    local_id: Option<EntityId>,
    sink: Option<Box<dyn FieldSink>>,
    /// Scalar updates waiting for a sink, coalesced per (id, field).
    pending: Vec<(EntityId, ScalarField, FieldValue)>,
}

impl Collection {
    fn deliver(&mut self, id: &EntityId, field: ScalarField, value: FieldValue) {
        if let Some(sink) = self.sink.as_mut() {
            sink.on_field(id, field, value);
            return;
        }
        match self
            .pending
            .iter_mut()
            .find(|(pid, pfield, _)| pid == id && *pfield == field)
        {
            Some(entry) => entry.2 = value,
            None => self.pending.push((id.clone(), field, value)),
        }
    }
}

/// Client-side registry of replicated entities.
pub struct EntityRegistry<S> {
    cfg: ReplicaConfig,
    significance: Significance,
    collections: Vec<Collection>,
    by_name: HashMap<String, CollectionId>,
    entities: HashMap<EntityKey, EntityState>,
    pool: ObjectPool<EntityKey, S>,
    now: f64,
    events: EventBus,
    completed: Vec<EntityKey>,
    diagnostics: Diagnostics,
}

impl<S: RenderSurface> EntityRegistry<S> {
    /// Creates a registry whose pool builds surfaces with `factory`.
    pub fn new(
        cfg: ReplicaConfig,
        factory: impl FnMut() -> S + Send + 'static,
    ) -> anyhow::Result<Self> {
        cfg.validate().context("invalid replica config")?;
        let pool = ObjectPool::with_prewarm(factory, cfg.pool_prewarm_count);
        Ok(Self {
            significance: Significance::from_config(&cfg),
            cfg,
            collections: Vec::new(),
            by_name: HashMap::new(),
            entities: HashMap::new(),
            pool,
            now: 0.0,
            events: EventBus::default(),
            completed: Vec::new(),
            diagnostics: Diagnostics::default(),
        })
    }

    /// Registers a collection. Subscribing an existing name returns its id
    /// and keeps the original role.
    pub fn subscribe(&mut self, name: &str, role: Role) -> CollectionId {
        if let Some(&id) = self.by_name.get(name) {
            let existing = self.collections[id.0 as usize].role;
            if existing != role {
                warn!(collection = name, ?existing, requested = ?role, "Resubscribe with different role ignored");
            }
            return id;
        }
        let id = CollectionId(self.collections.len() as u16);
        self.collections.push(Collection {
            name: name.to_string(),
            role,
            local_id: None,
            sink: None,
            pending: Vec::new(),
        });
        self.by_name.insert(name.to_string(), id);
        info!(collection = name, ?role, "Subscribed");
        id
    }

    pub fn collection(&self, name: &str) -> Option<CollectionId> {
        self.by_name.get(name).copied()
    }

    pub fn collection_name(&self, collection: CollectionId) -> Option<&str> {
        self.collections
            .get(collection.0 as usize)
            .map(|c| c.name.as_str())
    }

    /// Marks `id` as the viewer's own entity. Applies to adds from now on;
    /// an already live entity keeps its role.
    pub fn set_local_entity(&mut self, collection: CollectionId, id: EntityId) {
        let Some(c) = self.collections.get_mut(collection.0 as usize) else {
            warn!(collection = collection.0, "Local entity for unknown collection");
            return;
        };
        if self
            .entities
            .contains_key(&EntityKey::new(collection, id.clone()))
        {
            warn!(id = %id, "Local entity already live; role stays as created");
        }
        c.local_id = Some(id);
    }

    pub fn on_add(&mut self, collection: CollectionId, id: EntityId, snapshot: Snapshot) -> EventOutcome {
        let Some(c) = self.collections.get_mut(collection.0 as usize) else {
            warn!(collection = collection.0, id = %id, "Add on unknown collection");
            self.diagnostics.record_race();
            return EventOutcome::Ignored;
        };
        let snapshot = match snapshot.validate() {
            Ok(s) => s,
            Err(e) => {
                warn!(collection = %c.name, id = %id, error = %e, "Rejected malformed add");
                self.diagnostics.record_rejected();
                return EventOutcome::Rejected;
            }
        };

        let key = EntityKey::new(collection, id);
        if let Some(state) = self.entities.get_mut(&key) {
            warn!(collection = %c.name, id = %key.id, "Duplicate add; reusing live entity");
            self.diagnostics.record_race();
            if !self.significance.transform_settled(&state.target, &snapshot) {
                state.dirty |= DirtyFields::TRANSFORM;
            }
            for field in ScalarField::ALL {
                if let Some(value) = snapshot.fields.get(field) {
                    if self.significance.field_changed(state.target.fields.get(field), value) {
                        state.dirty |= field.dirty_bit();
                    }
                }
            }
            if state.role == Role::RemoteSmoothed {
                state
                    .motion
                    .observe(snapshot.position, self.now, self.cfg.stopped_velocity_epsilon);
            }
            state.target = snapshot;
            return EventOutcome::Reused;
        }

        let role = if c.local_id.as_ref() == Some(&key.id) {
            Role::LocalInstant
        } else {
            c.role
        };
        // Initial class fields go straight to the consumer (or its buffer).
        for field in ScalarField::ALL {
            if let Some(value) = snapshot.fields.get(field) {
                c.deliver(&key.id, field, value);
            }
        }
        let handle = self.pool.acquire(key.clone(), &snapshot);
        debug!(collection = %c.name, id = %key.id, ?role, "Entity added");
        self.entities
            .insert(key, EntityState::new(role, snapshot, self.now, handle));
        EventOutcome::Applied
    }

    pub fn on_field_change(
        &mut self,
        collection: CollectionId,
        id: &EntityId,
        field: Field,
        value: FieldValue,
    ) -> EventOutcome {
        let key = EntityKey::new(collection, id.clone());
        let Some(state) = self.entities.get_mut(&key) else {
            warn!(collection = collection.0, id = %id, field = field.name(), "Change for unknown entity");
            self.diagnostics.record_race();
            return EventOutcome::Ignored;
        };

        let old = state.target.get(field);
        if let Err(e) = state.target.set(field, value) {
            warn!(id = %id, field = field.name(), error = %e, "Rejected field update");
            self.diagnostics.record_rejected();
            return EventOutcome::Rejected;
        }

        if let (Field::Position, Role::RemoteSmoothed) = (field, state.role) {
            state
                .motion
                .observe(state.target.position, self.now, self.cfg.stopped_velocity_epsilon);
        }
        // Compare what was stored; rotations are normalized on the way in.
        let stored = state.target.get(field).unwrap_or(value);
        if self.significance.field_changed(old, stored) {
            state.dirty |= field.dirty_bit();
        }
        trace!(id = %id, field = field.name(), dirty = ?state.dirty, "Field changed");
        EventOutcome::Applied
    }

    pub fn on_remove(&mut self, collection: CollectionId, id: &EntityId) -> EventOutcome {
        let key = EntityKey::new(collection, id.clone());
        let Some(state) = self.entities.remove(&key) else {
            warn!(collection = collection.0, id = %id, "Remove for unknown entity");
            self.diagnostics.record_race();
            return EventOutcome::Ignored;
        };
        if state.animation.is_some() {
            debug!(id = %id, "Animation cancelled by remove");
        }
        self.pool.release(&key);
        if let Some(c) = self.collections.get_mut(collection.0 as usize) {
            c.pending.retain(|(pid, _, _)| pid != id);
        }
        debug!(collection = collection.0, id = %id, "Entity removed");
        EventOutcome::Applied
    }

    /// Queues a one-shot message for the host. Never touches entity state.
    pub fn on_message(&mut self, collection: CollectionId, message: OneShot) -> EventOutcome {
        let Some(c) = self.collections.get(collection.0 as usize) else {
            warn!(collection = collection.0, "Message on unknown collection");
            return EventOutcome::Ignored;
        };
        self.events.push(CollectionMessage {
            collection: c.name.clone(),
            message,
        });
        EventOutcome::Applied
    }

    /// Routes a validated event by collection name.
    pub fn apply(&mut self, event: ReplicaEvent) -> EventOutcome {
        let name = match &event {
            ReplicaEvent::Added { collection, .. }
            | ReplicaEvent::Changed { collection, .. }
            | ReplicaEvent::Removed { collection, .. }
            | ReplicaEvent::Message { collection, .. } => collection,
        };
        let Some(collection) = self.collection(name) else {
            debug!(collection = %name, "Event for unsubscribed collection");
            return EventOutcome::Ignored;
        };
        match event {
            ReplicaEvent::Added { id, snapshot, .. } => self.on_add(collection, id, snapshot),
            ReplicaEvent::Changed {
                id, field, value, ..
            } => self.on_field_change(collection, &id, field, value),
            ReplicaEvent::Removed { id, .. } => self.on_remove(collection, &id),
            ReplicaEvent::Message { message, .. } => self.on_message(collection, message),
        }
    }

    /// Validates a raw wire event and applies it.
    pub fn apply_net(&mut self, event: NetEvent) -> EventOutcome {
        match event.validate() {
            Ok(event) => self.apply(event),
            Err(e) => {
                warn!(error = %e, "Rejected wire event");
                self.diagnostics.record_rejected();
                EventOutcome::Rejected
            }
        }
    }

    /// Starts a client-driven transition toward `target`. While it runs,
    /// network updates are stored but not shown. A non-positive duration
    /// uses the configured default; an existing animation is replaced.
    pub fn start_animation(
        &mut self,
        collection: CollectionId,
        id: &EntityId,
        target: Snapshot,
        duration: f32,
        on_complete: Option<CompletionCallback>,
    ) -> EventOutcome {
        let target = match target.validate() {
            Ok(t) => t,
            Err(e) => {
                warn!(id = %id, error = %e, "Rejected animation target");
                return EventOutcome::Rejected;
            }
        };
        let Some(state) = self.entities.get_mut(&EntityKey::new(collection, id.clone())) else {
            warn!(id = %id, "Animation for unknown entity");
            return EventOutcome::Ignored;
        };
        let duration = if duration.is_finite() && duration > 0.0 {
            duration
        } else {
            self.cfg.default_animation_secs
        };
        if state.animation.is_some() {
            debug!(id = %id, "Replacing running animation");
        }
        state.animation = Some(Animation::new(state.current, target, duration, on_complete));
        EventOutcome::Applied
    }

    /// Detaches a running animation without firing its callback.
    pub fn cancel_animation(&mut self, collection: CollectionId, id: &EntityId) -> bool {
        let Some(state) = self.entities.get_mut(&EntityKey::new(collection, id.clone())) else {
            return false;
        };
        if state.animation.take().is_none() {
            return false;
        }
        state.dirty |= DirtyFields::TRANSFORM;
        state.motion.reset(state.target.position, self.now);
        true
    }

    pub fn is_animating(&self, collection: CollectionId, id: &EntityId) -> bool {
        self.state(collection, id)
            .map_or(false, EntityState::is_animating)
    }

    /// Attaches the consumer of class fields and replays anything buffered.
    pub fn attach_sink(&mut self, collection: CollectionId, mut sink: Box<dyn FieldSink>) {
        let Some(c) = self.collections.get_mut(collection.0 as usize) else {
            warn!(collection = collection.0, "Sink for unknown collection");
            return;
        };
        let replayed = c.pending.len();
        for (id, field, value) in c.pending.drain(..) {
            sink.on_field(&id, field, value);
        }
        c.sink = Some(sink);
        debug!(collection = %c.name, replayed, "Field sink attached");
    }

    pub fn detach_sink(&mut self, collection: CollectionId) -> Option<Box<dyn FieldSink>> {
        self.collections
            .get_mut(collection.0 as usize)
            .and_then(|c| c.sink.take())
    }

    /// Number of buffered scalar updates waiting for a sink.
    pub fn pending_fields(&self, collection: CollectionId) -> usize {
        self.collections
            .get(collection.0 as usize)
            .map_or(0, |c| c.pending.len())
    }

    /// Advances every entity by `dt` seconds and pushes the results to
    /// their surfaces.
    pub fn tick(&mut self, dt: f32) -> TickStats {
        let dt = if dt.is_finite() && dt >= 0.0 {
            dt
        } else {
            warn!(dt, "Ignoring invalid frame delta");
            0.0
        };
        self.now += dt as f64;
        let now = self.now;
        let cfg = &self.cfg;
        let sig = self.significance;
        let mut stats = TickStats::default();

        for (key, state) in self.entities.iter_mut() {
            match Policy::select(state.role, state.animation.is_some()) {
                Policy::AnimatedOverride => {
                    stats.animating += 1;
                    let finished = match state.animation.as_mut() {
                        Some(anim) => anim.step(dt, &mut state.current),
                        None => false,
                    };
                    push_transform(&mut self.pool, state);
                    if finished {
                        if let Some(cb) = state.animation.take().and_then(|mut a| a.take_callback()) {
                            cb(key);
                        }
                        // Hand control back to whatever the server said last.
                        state.dirty |= DirtyFields::TRANSFORM;
                        state.motion.reset(state.target.position, now);
                        self.completed.push(key.clone());
                        stats.animations_completed += 1;
                    }
                    // Class fields wait until the animation has finished.
                    continue;
                }
                Policy::LocalInstant => {
                    if interp::step_instant(&mut state.current, &state.target) {
                        push_transform(&mut self.pool, state);
                        stats.ticked += 1;
                    } else {
                        stats.skipped += 1;
                    }
                    state.dirty.remove(DirtyFields::TRANSFORM);
                }
                Policy::RemoteSmoothed => {
                    let idle = !state.dirty.intersects(DirtyFields::TRANSFORM)
                        && state.motion.is_stopped()
                        && sig.transform_settled(&state.current, &state.target);
                    if idle {
                        stats.skipped += 1;
                    } else {
                        let lead = state.motion.advance(now, dt, cfg);
                        interp::step_smoothed(&mut state.current, &state.target, lead, dt, cfg);
                        if state.motion.is_stopped()
                            && sig.transform_settled(&state.current, &state.target)
                        {
                            state.current.copy_transform(&state.target);
                            state.dirty.remove(DirtyFields::TRANSFORM);
                            stats.converged += 1;
                        }
                        push_transform(&mut self.pool, state);
                        stats.ticked += 1;
                    }
                }
            }

            if state.dirty.intersects(DirtyFields::SCALARS) {
                if let Some(c) = self.collections.get_mut(key.collection.0 as usize) {
                    stats.scalars_delivered += deliver_scalars(&key.id, state, c);
                }
            }
        }

        for key in self.completed.drain(..) {
            self.events.push(AnimationCompleted { key });
        }
        self.diagnostics.record_tick(&stats, self.pool.stats());
        trace!(?stats, "Tick");
        stats
    }

    /// Toggles per-entity effects by distance from `viewer`. Returns how
    /// many surfaces flipped.
    pub fn apply_culling(&mut self, culler: &EffectCuller, viewer: Vec3) -> usize {
        let mut flipped = 0;
        for state in self.entities.values_mut() {
            let d2 = state.current.position.distance_sq(viewer);
            let enabled = culler.decide(state.effects_enabled, d2);
            if enabled != state.effects_enabled {
                state.effects_enabled = enabled;
                if let Some(surface) = self.pool.surface_mut(state.handle) {
                    surface.set_effects_enabled(enabled);
                }
                flipped += 1;
            }
        }
        self.diagnostics.record_effect_toggles(flipped);
        flipped
    }

    pub fn state(&self, collection: CollectionId, id: &EntityId) -> Option<&EntityState> {
        self.entities.get(&EntityKey::new(collection, id.clone()))
    }

    pub fn surface(&self, collection: CollectionId, id: &EntityId) -> Option<&S> {
        let state = self.state(collection, id)?;
        self.pool.surface(state.handle)
    }

    /// Current position of the first live local entity, if any.
    pub fn local_position(&self) -> Option<Vec3> {
        self.entities
            .values()
            .find(|s| s.role == Role::LocalInstant)
            .map(|s| s.current.position)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn len_in(&self, collection: CollectionId) -> usize {
        self.entities
            .keys()
            .filter(|k| k.collection == collection)
            .count()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Seconds of simulated time accumulated by `tick`.
    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.cfg
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn drain_messages(&mut self) -> Vec<CollectionMessage> {
        self.events.drain::<CollectionMessage>()
    }

    pub fn drain_completed(&mut self) -> Vec<AnimationCompleted> {
        self.events.drain::<AnimationCompleted>()
    }
}

fn push_transform<S: RenderSurface>(pool: &mut ObjectPool<EntityKey, S>, state: &EntityState) {
    if let Some(surface) = pool.surface_mut(state.handle) {
        surface.set_transform(state.current.position, state.current.rotation);
        surface.set_scale(state.current.scale);
    }
}

fn deliver_scalars(id: &EntityId, state: &mut EntityState, c: &mut Collection) -> usize {
    let mut delivered = 0;
    for field in ScalarField::ALL {
        if !state.dirty.contains(field.dirty_bit()) {
            continue;
        }
        if let Some(value) = state.target.fields.get(field) {
            c.deliver(id, field, value);
            delivered += 1;
        }
    }
    state.current.fields = state.target.fields;
    state.dirty.remove(DirtyFields::SCALARS);
    delivered
}
