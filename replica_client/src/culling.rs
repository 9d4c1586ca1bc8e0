//! Distance culling of per-entity effects and tick diagnostics.

use replica_shared::{config::ReplicaConfig, math::Vec3};
use serde::Serialize;
use tracing::debug;

use crate::{
    interp::smoothing_factor,
    pool::PoolStats,
    registry::TickStats,
};

/// Camera-like point that follows the local entity.
#[derive(Debug, Clone, Copy)]
pub struct Viewer {
    position: Vec3,
    speed: f32,
    attached: bool,
}

impl Viewer {
    pub fn new(cfg: &ReplicaConfig) -> Self {
        Self {
            position: Vec3::ZERO,
            speed: cfg.local_smoothing_speed,
            attached: false,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Moves toward `target`. The first call snaps.
    pub fn follow(&mut self, target: Vec3, dt: f32) -> Vec3 {
        if self.attached {
            self.position = self.position.lerp(target, smoothing_factor(self.speed, dt));
        } else {
            self.position = target;
            self.attached = true;
        }
        self.position
    }
}

/// Enables effects inside `radius`, disables them outside, with a dead band
/// of `hysteresis` on either side so entities at the edge do not flap.
#[derive(Debug, Clone, Copy)]
pub struct EffectCuller {
    radius: f32,
    hysteresis: f32,
}

impl EffectCuller {
    pub fn new(radius: f32, hysteresis: f32) -> Self {
        Self { radius, hysteresis }
    }

    pub fn from_config(cfg: &ReplicaConfig) -> Self {
        Self::new(cfg.effect_cull_radius, cfg.effect_cull_hysteresis)
    }

    /// New effect state for an entity at squared distance `distance_sq`.
    pub fn decide(&self, enabled: bool, distance_sq: f32) -> bool {
        let outer = self.radius + self.hysteresis;
        let inner = (self.radius - self.hysteresis).max(0.0);
        if enabled {
            distance_sq <= outer * outer
        } else {
            distance_sq < inner * inner
        }
    }
}

/// Running counters across ticks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub frames: u64,
    pub entities_ticked: u64,
    pub entities_skipped: u64,
    pub animations_completed: u64,
    pub scalars_delivered: u64,
    /// Duplicate adds and updates/removes for unknown ids.
    pub races: u64,
    /// Malformed updates that were dropped.
    pub rejected: u64,
    pub effects_toggled: u64,
    pub peak_allocated: usize,
    pub last_pool: (usize, usize),
}

impl Diagnostics {
    pub fn record_tick(&mut self, stats: &TickStats, pool: PoolStats) {
        self.frames += 1;
        self.entities_ticked += stats.ticked as u64;
        self.entities_skipped += stats.skipped as u64;
        self.animations_completed += stats.animations_completed as u64;
        self.scalars_delivered += stats.scalars_delivered as u64;
        self.peak_allocated = self.peak_allocated.max(pool.allocated);
        self.last_pool = (pool.active, pool.free);
    }

    pub fn record_race(&mut self) {
        self.races += 1;
    }

    pub fn record_rejected(&mut self) {
        self.rejected += 1;
    }

    pub fn record_effect_toggles(&mut self, n: usize) {
        self.effects_toggled += n as u64;
    }

    /// Share of entity-ticks that took the static fast path.
    pub fn skip_ratio(&self) -> f32 {
        let total = self.entities_ticked + self.entities_skipped;
        if total == 0 {
            return 0.0;
        }
        self.entities_skipped as f32 / total as f32
    }

    pub fn log_summary(&self) {
        debug!(
            frames = self.frames,
            skip_ratio = self.skip_ratio(),
            races = self.races,
            rejected = self.rejected,
            peak_allocated = self.peak_allocated,
            "Reconciliation summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hysteresis_prevents_flapping() {
        let culler = EffectCuller::new(10.0, 1.0);
        // Just past the radius but inside the band: stays on.
        assert!(culler.decide(true, 10.5 * 10.5));
        assert!(!culler.decide(true, 11.5 * 11.5));
        // Coming back in: stays off until inside the inner edge.
        assert!(!culler.decide(false, 9.5 * 9.5));
        assert!(culler.decide(false, 8.5 * 8.5));
    }

    #[test]
    fn viewer_snaps_then_smooths() {
        let mut viewer = Viewer::new(&ReplicaConfig::default());
        assert_eq!(viewer.follow(Vec3::new(5.0, 0.0, 0.0), 0.016), Vec3::new(5.0, 0.0, 0.0));
        let p = viewer.follow(Vec3::new(10.0, 0.0, 0.0), 0.016);
        assert!(p.x > 5.0 && p.x < 10.0);
    }

    #[test]
    fn skip_ratio_counts_fast_path() {
        let mut d = Diagnostics::default();
        d.record_tick(
            &TickStats {
                ticked: 1,
                skipped: 3,
                ..TickStats::default()
            },
            PoolStats::default(),
        );
        assert_eq!(d.skip_ratio(), 0.75);
    }
}
