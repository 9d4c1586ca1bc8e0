//! Scripted scene.
//!
//! Stands in for the authoritative simulation when running the demo or the
//! end-to-end tests: a few players wander around the arena, floor tiles get
//! collected one by one and reappear as placed tiles in the frame, and the
//! frame's fill count goes up.

use rand::{rngs::StdRng, Rng, SeedableRng};
use replica_shared::{
    entity::EntityId,
    event::OneShot,
    math::{Quat, Vec3},
    snapshot::{Field, FieldValue, ScalarField, Snapshot},
};
use tracing::info;

use crate::feed::AuthoritativeFeed;

pub const PLAYERS: &str = "players";
pub const TILES: &str = "tiles";
pub const FRAMES: &str = "frames";

struct Walker {
    id: EntityId,
    position: Vec3,
    heading: f32,
    speed: f32,
}

/// Deterministic scene driver (seeded RNG).
pub struct ScriptedScene {
    rng: StdRng,
    walkers: Vec<Walker>,
    tile_count: u32,
    placed: u32,
    collect_every: u32,
    steps: u32,
}

impl ScriptedScene {
    pub fn new(seed: u64, players: u32, tiles: u32) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let walkers = (0..players)
            .map(|i| Walker {
                id: EntityId::session(format!("p{}", i)),
                position: Vec3::new(rng.gen_range(-10.0..10.0), 0.0, rng.gen_range(-10.0..10.0)),
                heading: rng.gen_range(0.0..std::f32::consts::TAU),
                speed: rng.gen_range(2.0..6.0),
            })
            .collect();
        Self {
            rng,
            walkers,
            tile_count: tiles,
            placed: 0,
            collect_every: 15,
            steps: 0,
        }
    }

    /// Session id of the player that plays the viewer.
    pub fn local_player(&self) -> Option<EntityId> {
        self.walkers.first().map(|w| w.id.clone())
    }

    pub fn placed(&self) -> u32 {
        self.placed
    }

    /// Spawns the initial population.
    pub fn setup(&mut self, feed: &mut AuthoritativeFeed) -> anyhow::Result<()> {
        for w in &self.walkers {
            let snap = Snapshot::at(w.position)
                .with_rotation(Quat::from_yaw(w.heading))
                .with_field(ScalarField::Health, FieldValue::Float(100.0))
                .with_field(ScalarField::SteeringAngle, FieldValue::Float(0.0));
            feed.spawn(PLAYERS, w.id.clone(), snap)?;
        }
        for i in 0..self.tile_count {
            let pos = Vec3::new(i as f32 * 1.5 - 10.0, 0.0, 6.0);
            let snap = Snapshot::at(pos).with_field(ScalarField::Locked, FieldValue::Bool(false));
            feed.spawn(TILES, EntityId::available(i), snap)?;
        }
        let frame = Snapshot::at(Vec3::new(0.0, 2.0, -12.0))
            .with_field(ScalarField::FillCount, FieldValue::Count(0));
        feed.spawn(FRAMES, EntityId::Index(0), frame)?;
        info!(players = self.walkers.len(), tiles = self.tile_count, "Scene ready");
        Ok(())
    }

    /// Advances the scene by `dt` seconds.
    pub fn step(&mut self, feed: &mut AuthoritativeFeed, dt: f32) -> anyhow::Result<()> {
        self.steps += 1;
        for w in &mut self.walkers {
            let turn = self.rng.gen_range(-0.6..0.6) * dt;
            w.heading = (w.heading + turn).rem_euclid(std::f32::consts::TAU);
            let dir = Vec3::new(w.heading.sin(), 0.0, w.heading.cos());
            w.position = w.position + dir * (w.speed * dt);
            // Keep everyone inside the arena.
            if w.position.len() > 20.0 {
                w.heading = (w.heading + std::f32::consts::PI).rem_euclid(std::f32::consts::TAU);
            }
            feed.set_field(PLAYERS, &w.id, Field::Position, FieldValue::Vec3(w.position))?;
            feed.set_field(PLAYERS, &w.id, Field::Rotation, FieldValue::Quat(Quat::from_yaw(w.heading)))?;
            feed.set_field(
                PLAYERS,
                &w.id,
                Field::Scalar(ScalarField::SteeringAngle),
                FieldValue::Float(turn / dt.max(f32::EPSILON)),
            )?;
        }

        if self.steps % self.collect_every == 0 && self.placed < self.tile_count {
            self.collect_next(feed)?;
        }
        Ok(())
    }

    fn collect_next(&mut self, feed: &mut AuthoritativeFeed) -> anyhow::Result<()> {
        let slot = self.placed;
        let available = EntityId::available(slot);
        feed.announce(TILES, OneShot::Collected { id: available.clone() });
        feed.despawn(TILES, &available);

        let placed = EntityId::placed(slot);
        let pos = Vec3::new(slot as f32 * 0.8 - 4.0, 2.0, -12.0);
        let snap = Snapshot::at(pos).with_field(ScalarField::Locked, FieldValue::Bool(true));
        feed.spawn(TILES, placed.clone(), snap)?;
        feed.announce(TILES, OneShot::SlotReached { id: placed, slot });

        self.placed += 1;
        feed.set_field(
            FRAMES,
            &EntityId::Index(0),
            Field::Scalar(ScalarField::FillCount),
            FieldValue::Count(self.placed),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_shared::config::ReplicaConfig;

    #[test]
    fn same_seed_same_events() {
        let cfg = ReplicaConfig::default();
        let run = || {
            let mut feed = AuthoritativeFeed::new(&cfg);
            let mut scene = ScriptedScene::new(7, 3, 4);
            scene.setup(&mut feed).unwrap();
            for _ in 0..30 {
                scene.step(&mut feed, 1.0 / 30.0).unwrap();
            }
            feed.drain_outbox()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn tiles_move_from_floor_to_frame() {
        let mut feed = AuthoritativeFeed::new(&ReplicaConfig::default());
        let mut scene = ScriptedScene::new(1, 1, 2);
        scene.setup(&mut feed).unwrap();
        for _ in 0..15 {
            scene.step(&mut feed, 1.0 / 30.0).unwrap();
        }
        assert_eq!(scene.placed(), 1);
        assert!(feed.get(TILES, &EntityId::available(0)).is_none());
        assert!(feed.get(TILES, &EntityId::placed(0)).is_some());
        assert_eq!(
            feed.get(FRAMES, &EntityId::Index(0)).unwrap().fields.fill_count,
            Some(1)
        );
    }
}
