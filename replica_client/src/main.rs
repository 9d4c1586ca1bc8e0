//! Standalone client demo.
//!
//! Usage:
//!   cargo run -p replica_client -- [--config replica.json] [--frames 600] [--seed 7]
//!
//! Runs a scripted authoritative feed at 30 Hz on a background task and a
//! 60 Hz frame loop that drains the mailbox, ticks the registry, and culls
//! effects around the local player. Set `RUST_LOG=debug` for per-event logs.

use std::env;
use std::time::Duration;

use anyhow::Context;
use replica_client::{
    culling::{EffectCuller, Viewer},
    mailbox::{mailbox, pump},
    EntityRegistry,
};
use replica_server::{
    run_feed,
    scene::{FRAMES, PLAYERS, TILES},
    AuthoritativeFeed, ScriptedScene,
};
use replica_shared::{
    config::ReplicaConfig,
    entity::{EntityId, EntityKey, Role},
    event::OneShot,
    render::{FieldSink, NullSurface},
    resources::SharedResourceCache,
    snapshot::{FieldValue, ScalarField},
};
use tokio::sync::mpsc;
use tracing::info;

struct Args {
    config: Option<String>,
    frames: u32,
    seed: u64,
}

fn parse_args() -> Args {
    let mut out = Args {
        config: None,
        frames: 600,
        seed: 7,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                out.config = Some(args[i + 1].clone());
                i += 2;
            }
            "--frames" if i + 1 < args.len() => {
                out.frames = args[i + 1].parse().unwrap_or(600);
                i += 2;
            }
            "--seed" if i + 1 < args.len() => {
                out.seed = args[i + 1].parse().unwrap_or(7);
                i += 2;
            }
            _ => i += 1,
        }
    }
    out
}

/// Shared look of every pooled object in this demo.
#[derive(Debug)]
struct Material {
    name: &'static str,
}

/// Frame UI stand-in: logs slot fill changes.
struct FrameHud;

impl FieldSink for FrameHud {
    fn on_field(&mut self, id: &EntityId, field: ScalarField, value: FieldValue) {
        if let (ScalarField::FillCount, FieldValue::Count(n)) = (field, value) {
            info!(frame = %id, filled = n, "Frame fill changed");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let cfg = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path))?;
            ReplicaConfig::from_json_str(&raw)?
        }
        None => ReplicaConfig::default(),
    };
    info!(frames = args.frames, seed = args.seed, "Starting client");

    let mut cache = SharedResourceCache::new();
    let material = cache.get_or_insert_with("default", || Material { name: "default" });
    info!(material = material.name, "Shared material ready");

    let mut registry = EntityRegistry::new(cfg.clone(), || NullSurface)?;
    let players = registry.subscribe(PLAYERS, Role::RemoteSmoothed);
    let tiles = registry.subscribe(TILES, Role::RemoteSmoothed);
    let frames = registry.subscribe(FRAMES, Role::RemoteSmoothed);

    let scene = ScriptedScene::new(args.seed, 6, 12);
    if let Some(me) = scene.local_player() {
        registry.set_local_entity(players, me);
    }

    // Server task -> frames -> pump task -> mailbox -> frame loop.
    let (frame_tx, frame_rx) = mpsc::channel(1024);
    let (sender, mut inbox) = mailbox();
    let feed_ticks = args.frames / 2;
    let feed = tokio::spawn(run_feed(
        AuthoritativeFeed::new(&cfg),
        scene,
        frame_tx,
        30,
        feed_ticks,
    ));
    let pump = tokio::spawn(pump(frame_rx, sender));

    let culler = EffectCuller::from_config(&cfg);
    let mut viewer = Viewer::new(&cfg);
    let frame_dt = 1.0 / 60.0;
    let mut interval = tokio::time::interval(Duration::from_secs_f32(frame_dt));

    for frame in 0..args.frames {
        interval.tick().await;
        inbox.drain_into(&mut registry);

        for msg in registry.drain_messages() {
            if let OneShot::SlotReached { id, slot } = msg.message {
                info!(tile = %id, slot, "Tile reached slot");
                if let Some(end) = registry.state(tiles, &id).map(|s| *s.target()) {
                    let shrunk = end.with_scale(0.2);
                    registry.start_animation(
                        tiles,
                        &id,
                        shrunk,
                        0.15,
                        Some(Box::new(|key: &EntityKey| {
                            tracing::debug!(tile = %key, "Shrink done");
                        })),
                    );
                }
            }
        }
        for done in registry.drain_completed() {
            // Second half of the pop: grow back to the authoritative scale.
            if done.key.collection == tiles {
                if let Some(end) = registry.state(tiles, &done.key.id).map(|s| *s.target()) {
                    registry.start_animation(tiles, &done.key.id, end, 0.25, None);
                }
            }
        }

        if frame == 30 {
            // The HUD comes up late; buffered fill updates replay now.
            registry.attach_sink(frames, Box::new(FrameHud));
        }

        let stats = registry.tick(frame_dt);
        if let Some(me) = registry.local_position() {
            viewer.follow(me, frame_dt);
        }
        registry.apply_culling(&culler, viewer.position());

        if frame % 120 == 0 {
            let pool = registry.pool_stats();
            info!(
                frame,
                entities = registry.len(),
                ticked = stats.ticked,
                skipped = stats.skipped,
                animating = stats.animating,
                pool_active = pool.active,
                pool_free = pool.free,
                "Frame"
            );
        }
    }

    let summary = feed.await.context("feed task")??;
    let pumped = pump.await.context("pump task")??;
    inbox.drain_into(&mut registry);
    registry.diagnostics().log_summary();

    drop(material);
    let leaked = cache.teardown();
    info!(
        feed = %serde_json::to_string(&summary)?,
        forwarded = pumped.forwarded,
        leaked = leaked.len(),
        diagnostics = %serde_json::to_string(registry.diagnostics())?,
        "Client finished"
    );
    Ok(())
}
