//! Helpers shared by the integration tests.

use replica_client::EntityRegistry;
use replica_shared::{
    config::ReplicaConfig,
    entity::{CollectionId, Role},
    render::RecordingSurface,
};

/// Installs a test-friendly subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Registry over recording surfaces with one remote collection.
pub fn registry_with(
    cfg: ReplicaConfig,
    collection: &str,
) -> anyhow::Result<(EntityRegistry<RecordingSurface>, CollectionId)> {
    let mut reg = EntityRegistry::new(cfg, RecordingSurface::factory())?;
    let id = reg.subscribe(collection, Role::RemoteSmoothed);
    Ok((reg, id))
}

/// Ticks `reg` `n` times with a fixed step.
pub fn run_ticks(reg: &mut EntityRegistry<RecordingSurface>, n: usize, dt: f32) {
    for _ in 0..n {
        reg.tick(dt);
    }
}
