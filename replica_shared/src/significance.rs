//! Significance-threshold filter.
//!
//! Pure predicates deciding whether a delta is worth acting on. The server
//! uses them to gate what it transmits and the client uses the same values to
//! gate dirty-marking; both must be built from the same [`ReplicaConfig`].

use crate::{
    config::ReplicaConfig,
    math::{Quat, Vec3},
    snapshot::{FieldValue, Snapshot},
};

/// `|a - b|² > eps²`.
pub fn position_changed(a: Vec3, b: Vec3, eps: f32) -> bool {
    a.distance_sq(b) > eps * eps
}

/// `|dot(a, b)| < eps`. The absolute value makes `q` and `-q` equal.
pub fn rotation_changed(a: Quat, b: Quat, eps: f32) -> bool {
    a.dot(b).abs() < eps
}

pub fn scalar_changed(a: f32, b: f32, eps: f32) -> bool {
    (a - b).abs() > eps
}

/// Epsilons taken from one config, applied symmetrically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Significance {
    pub position_eps: f32,
    pub rotation_eps: f32,
    pub scalar_eps: f32,
}

impl Significance {
    pub fn from_config(cfg: &ReplicaConfig) -> Self {
        Self {
            position_eps: cfg.position_significance_epsilon,
            rotation_eps: cfg.rotation_significance_epsilon,
            scalar_eps: cfg.scalar_significance_epsilon,
        }
    }

    /// Whether moving from `old` to `new` matters. A field that had no value
    /// before always counts as changed.
    pub fn field_changed(&self, old: Option<FieldValue>, new: FieldValue) -> bool {
        match (old, new) {
            (Some(FieldValue::Vec3(a)), FieldValue::Vec3(b)) => {
                position_changed(a, b, self.position_eps)
            }
            (Some(FieldValue::Quat(a)), FieldValue::Quat(b)) => {
                rotation_changed(a, b, self.rotation_eps)
            }
            (Some(FieldValue::Float(a)), FieldValue::Float(b)) => {
                scalar_changed(a, b, self.scalar_eps)
            }
            (Some(FieldValue::Bool(a)), FieldValue::Bool(b)) => a != b,
            (Some(FieldValue::Count(a)), FieldValue::Count(b)) => a != b,
            _ => true,
        }
    }

    /// True when `current` is within threshold of `target` on every
    /// transform component.
    pub fn transform_settled(&self, current: &Snapshot, target: &Snapshot) -> bool {
        !position_changed(current.position, target.position, self.position_eps)
            && !rotation_changed(current.rotation, target.rotation, self.rotation_eps)
            && !scalar_changed(current.scale, target.scale, self.scalar_eps)
    }
}

impl Default for Significance {
    fn default() -> Self {
        Self::from_config(&ReplicaConfig::default())
    }
}
