//! Configuration system.
//!
//! Loads reconciliation tuning from JSON strings (file IO left to app).
//! Every knob is a tunable constant; nothing here changes semantics.

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

/// Root configuration shared by client and server.
///
/// Keys are camelCase on the wire, e.g. `{"remoteSmoothingSpeed": 12}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplicaConfig {
    /// Follow speed of the viewer/camera that tracks the local entity (1/s).
    pub local_smoothing_speed: f32,
    /// Exponential smoothing speed for remote positions (1/s).
    pub remote_smoothing_speed: f32,
    /// Exponential smoothing speed for remote rotations (1/s).
    pub rotation_smoothing_speed: f32,
    /// Minimum position delta (world units) that counts as a change.
    pub position_significance_epsilon: f32,
    /// Rotations count as changed when `|dot(a, b)|` drops below this.
    pub rotation_significance_epsilon: f32,
    /// Minimum delta for float scalars and scale.
    pub scalar_significance_epsilon: f32,
    /// Inferred speeds below this (units/s) are treated as stopped.
    pub stopped_velocity_epsilon: f32,
    /// Upper bound on how far ahead of the last update we extrapolate.
    pub extrapolation_cap_ms: f32,
    /// Time since the last update after which inferred velocity decays.
    pub velocity_decay_start_ms: f32,
    /// Decay rate (1/s) applied once decay has started.
    pub velocity_decay_rate: f32,
    /// Render objects allocated up front by the pool.
    pub pool_prewarm_count: usize,
    /// Duration used when an animation is started without one.
    pub default_animation_secs: f32,
    /// Distance from the viewer beyond which per-entity effects are disabled.
    pub effect_cull_radius: f32,
    /// Band around the cull radius inside which effect state is kept.
    pub effect_cull_hysteresis: f32,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            local_smoothing_speed: 20.0,
            remote_smoothing_speed: 15.0,
            rotation_smoothing_speed: 10.0,
            position_significance_epsilon: 0.001,
            rotation_significance_epsilon: 0.99999,
            scalar_significance_epsilon: 0.001,
            stopped_velocity_epsilon: 0.05,
            extrapolation_cap_ms: 50.0,
            velocity_decay_start_ms: 50.0,
            velocity_decay_rate: 10.0,
            pool_prewarm_count: 16,
            default_animation_secs: 0.6,
            effect_cull_radius: 40.0,
            effect_cull_hysteresis: 2.0,
        }
    }
}

impl ReplicaConfig {
    /// Parses config from JSON. Missing keys take their defaults.
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_json::from_str(s).context("parse replica config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects values that would break the smoothing math.
    pub fn validate(&self) -> anyhow::Result<()> {
        let positive = [
            ("localSmoothingSpeed", self.local_smoothing_speed),
            ("remoteSmoothingSpeed", self.remote_smoothing_speed),
            ("rotationSmoothingSpeed", self.rotation_smoothing_speed),
            ("positionSignificanceEpsilon", self.position_significance_epsilon),
            ("scalarSignificanceEpsilon", self.scalar_significance_epsilon),
            ("stoppedVelocityEpsilon", self.stopped_velocity_epsilon),
            // Zero would keep extrapolating forever.
            ("velocityDecayRate", self.velocity_decay_rate),
            ("defaultAnimationSecs", self.default_animation_secs),
        ];
        for (name, value) in positive {
            ensure!(
                value.is_finite() && value > 0.0,
                "{} must be positive, got {}",
                name,
                value
            );
        }

        let non_negative = [
            ("extrapolationCapMs", self.extrapolation_cap_ms),
            ("velocityDecayStartMs", self.velocity_decay_start_ms),
            ("effectCullRadius", self.effect_cull_radius),
            ("effectCullHysteresis", self.effect_cull_hysteresis),
        ];
        for (name, value) in non_negative {
            ensure!(
                value.is_finite() && value >= 0.0,
                "{} must be non-negative, got {}",
                name,
                value
            );
        }

        let rot = self.rotation_significance_epsilon;
        ensure!(
            rot > 0.0 && rot <= 1.0,
            "rotationSignificanceEpsilon must be in (0, 1], got {}",
            rot
        );
        Ok(())
    }

    pub fn extrapolation_cap_secs(&self) -> f32 {
        self.extrapolation_cap_ms / 1000.0
    }

    pub fn velocity_decay_start_secs(&self) -> f32 {
        self.velocity_decay_start_ms / 1000.0
    }
}
