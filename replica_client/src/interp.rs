//! Interpolation.
//!
//! The server sends discrete updates at roughly 30 Hz. The client renders at
//! its own rate and moves each entity's current transform toward its target
//! with frame-rate independent smoothing, bounded extrapolation, or a
//! client-driven animation curve.

use std::fmt;

use replica_shared::{
    config::ReplicaConfig,
    entity::{EntityKey, Role},
    math::Vec3,
    snapshot::Snapshot,
};

/// `1 - e^(-speed * dt)`: the fraction of the remaining distance covered in `dt`.
pub fn smoothing_factor(speed: f32, dt: f32) -> f32 {
    1.0 - (-speed * dt).exp()
}

pub fn ease_out_cubic(t: f32) -> f32 {
    let inv = 1.0 - t.clamp(0.0, 1.0);
    1.0 - inv * inv * inv
}

/// How an entity is advanced this tick. Chosen once per entity per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    LocalInstant,
    RemoteSmoothed,
    AnimatedOverride,
}

impl Policy {
    pub fn select(role: Role, animating: bool) -> Self {
        match (animating, role) {
            (true, _) => Policy::AnimatedOverride,
            (false, Role::LocalInstant) => Policy::LocalInstant,
            (false, Role::RemoteSmoothed) => Policy::RemoteSmoothed,
        }
    }
}

/// Velocity inferred from successive target positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrapolator {
    last_pos: Vec3,
    last_update: f64,
    velocity: Vec3,
    lead: Vec3,
}

impl Extrapolator {
    pub fn new(position: Vec3, now: f64) -> Self {
        Self {
            last_pos: position,
            last_update: now,
            velocity: Vec3::ZERO,
            lead: Vec3::ZERO,
        }
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    /// Offset added to the target on the most recent tick.
    pub fn lead(&self) -> Vec3 {
        self.lead
    }

    pub fn last_update(&self) -> f64 {
        self.last_update
    }

    pub fn is_stopped(&self) -> bool {
        self.velocity == Vec3::ZERO
    }

    /// Records a new target position received at `now`.
    ///
    /// Updates landing in the same instant only move the reference point;
    /// speeds under `stopped_eps` zero the velocity.
    pub fn observe(&mut self, position: Vec3, now: f64, stopped_eps: f32) {
        let elapsed = (now - self.last_update) as f32;
        if elapsed > f32::EPSILON {
            let v = (position - self.last_pos) * elapsed.recip();
            self.velocity = if v.len() > stopped_eps { v } else { Vec3::ZERO };
            self.last_update = now;
        }
        self.last_pos = position;
    }

    /// Decays the velocity once updates are overdue and returns the lead
    /// offset, `velocity * min(time since update, cap)`.
    pub fn advance(&mut self, now: f64, dt: f32, cfg: &ReplicaConfig) -> Vec3 {
        if self.is_stopped() {
            self.lead = Vec3::ZERO;
            return self.lead;
        }

        let since = ((now - self.last_update) as f32).max(0.0);
        let decay_start = cfg.velocity_decay_start_secs();
        if since > decay_start {
            let overage = (since - decay_start).min(dt);
            self.velocity = self.velocity * (-cfg.velocity_decay_rate * overage).exp();
            if self.velocity.len() < cfg.stopped_velocity_epsilon {
                self.velocity = Vec3::ZERO;
            }
        }

        self.lead = self.velocity * since.min(cfg.extrapolation_cap_secs());
        self.lead
    }

    /// Forgets motion history, e.g. after an animation hands control back.
    pub fn reset(&mut self, position: Vec3, now: f64) {
        *self = Self::new(position, now);
    }
}

/// `current := target`. Returns whether anything changed.
pub fn step_instant(current: &mut Snapshot, target: &Snapshot) -> bool {
    if current == target {
        return false;
    }
    *current = *target;
    true
}

/// One smoothing step toward `target + lead`.
pub fn step_smoothed(
    current: &mut Snapshot,
    target: &Snapshot,
    lead: Vec3,
    dt: f32,
    cfg: &ReplicaConfig,
) {
    let move_t = smoothing_factor(cfg.remote_smoothing_speed, dt);
    let turn_t = smoothing_factor(cfg.rotation_smoothing_speed, dt);

    current.position = current.position.lerp(target.position + lead, move_t);
    current.rotation = current.rotation.slerp(target.rotation, turn_t);
    current.scale += (target.scale - current.scale) * move_t;
}

/// Fires when an animation runs to completion.
pub type CompletionCallback = Box<dyn FnOnce(&EntityKey) + Send>;

/// Client-only transition from a start to an end transform.
pub struct Animation {
    start: Snapshot,
    end: Snapshot,
    elapsed: f32,
    duration: f32,
    on_complete: Option<CompletionCallback>,
}

impl Animation {
    pub fn new(
        start: Snapshot,
        end: Snapshot,
        duration: f32,
        on_complete: Option<CompletionCallback>,
    ) -> Self {
        Self {
            start,
            end,
            elapsed: 0.0,
            duration,
            on_complete,
        }
    }

    pub fn progress(&self) -> f32 {
        if self.duration <= 0.0 {
            return 1.0;
        }
        (self.elapsed / self.duration).min(1.0)
    }

    pub fn end(&self) -> &Snapshot {
        &self.end
    }

    /// Advances by `dt` and writes the eased transform into `current`.
    /// Returns true once the end is reached.
    pub fn step(&mut self, dt: f32, current: &mut Snapshot) -> bool {
        self.elapsed += dt;
        let t = self.progress();
        let e = ease_out_cubic(t);
        current.position = self.start.position.lerp(self.end.position, e);
        current.rotation = self.start.rotation.slerp(self.end.rotation, e);
        current.scale = self.start.scale + (self.end.scale - self.start.scale) * e;
        t >= 1.0
    }

    pub fn take_callback(&mut self) -> Option<CompletionCallback> {
        self.on_complete.take()
    }
}

impl fmt::Debug for Animation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Animation")
            .field("start", &self.start.position)
            .field("end", &self.end.position)
            .field("progress", &self.progress())
            .field("has_callback", &self.on_complete.is_some())
            .finish()
    }
}
