//! Server feed -> pump -> mailbox -> registry, end to end.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use replica_client::{
    mailbox::{mailbox, pump},
    EntityRegistry,
};
use replica_server::{run_feed, scene, AuthoritativeFeed, ScriptedScene};
use replica_shared::{
    config::ReplicaConfig,
    entity::{EntityId, Role},
    event::OneShot,
    render::{RecordingSink, RecordingSurface},
    snapshot::{FieldValue, ScalarField},
};
use replica_tests::{init_tracing, run_ticks};
use tokio::sync::mpsc;
use tracing::info;

const TICKS: u32 = 120;
const TILES: u32 = 4;

#[tokio::test]
async fn scripted_scene_replicates_into_registry() -> anyhow::Result<()> {
    init_tracing();
    let cfg = ReplicaConfig::default();
    let scripted = ScriptedScene::new(11, 3, TILES);
    let me = scripted.local_player().expect("scene has players");

    let mut reg = EntityRegistry::new(cfg.clone(), RecordingSurface::factory())?;
    let players = reg.subscribe(scene::PLAYERS, Role::RemoteSmoothed);
    let tiles = reg.subscribe(scene::TILES, Role::RemoteSmoothed);
    let frames = reg.subscribe(scene::FRAMES, Role::RemoteSmoothed);
    reg.set_local_entity(players, me.clone());

    let (frame_tx, frame_rx) = mpsc::channel::<Bytes>(256);
    let (sender, mut inbox) = mailbox();
    let feed = tokio::spawn(run_feed(AuthoritativeFeed::new(&cfg), scripted, frame_tx, 1000, TICKS));
    let pumped = tokio::spawn(pump(frame_rx, sender));

    let summary = feed.await??;
    let stats = pumped.await??;
    info!(?summary, ?stats, "Pipeline drained");
    assert_eq!(summary.ticks, TICKS);
    assert_eq!(stats.forwarded, summary.frames);
    assert_eq!(stats.undecodable + stats.rejected, 0);

    let applied = inbox.drain_into(&mut reg);
    assert_eq!(applied as u64, summary.frames);
    reg.tick(1.0 / 60.0);

    assert_eq!(reg.len_in(players), 3);
    assert_eq!(reg.len_in(tiles), TILES as usize);
    assert_eq!(reg.len_in(frames), 1);
    for slot in 0..TILES {
        assert!(reg.state(tiles, &EntityId::available(slot)).is_none());
        assert!(reg.state(tiles, &EntityId::placed(slot)).is_some());
    }
    let pool = reg.pool_stats();
    assert_eq!(pool.active, reg.len());
    assert_eq!(pool.active + pool.free, pool.allocated);

    let local = reg.state(players, &me).unwrap();
    assert_eq!(local.role(), Role::LocalInstant);
    assert_eq!(local.current(), local.target());

    let messages = reg.drain_messages();
    let reached = messages
        .iter()
        .filter(|m| matches!(m.message, OneShot::SlotReached { .. }))
        .count();
    let collected = messages
        .iter()
        .filter(|m| matches!(m.message, OneShot::Collected { .. }))
        .count();
    assert_eq!((reached, collected), (TILES as usize, TILES as usize));

    // The frame UI shows up late and sees only the latest fill count.
    let sink = Arc::new(Mutex::new(RecordingSink::default()));
    reg.attach_sink(frames, Box::new(sink.clone()));
    assert_eq!(
        sink.lock().unwrap().received,
        vec![(EntityId::Index(0), ScalarField::FillCount, FieldValue::Count(TILES))]
    );

    // With the feed gone every remote entity settles on its last target.
    run_ticks(&mut reg, 900, 1.0 / 60.0);
    for i in 1..3 {
        let state = reg.state(players, &EntityId::session(format!("p{i}"))).unwrap();
        assert_eq!(state.current().position, state.target().position);
        assert!(!state.is_dirty());
    }
    Ok(())
}

#[tokio::test]
async fn frames_for_unsubscribed_collections_are_ignored() -> anyhow::Result<()> {
    let cfg = ReplicaConfig::default();
    let mut reg = EntityRegistry::new(cfg.clone(), RecordingSurface::factory())?;
    let tiles = reg.subscribe(scene::TILES, Role::RemoteSmoothed);

    let (frame_tx, frame_rx) = mpsc::channel::<Bytes>(256);
    let (sender, mut inbox) = mailbox();
    let feed = tokio::spawn(run_feed(
        AuthoritativeFeed::new(&cfg),
        ScriptedScene::new(3, 2, 2),
        frame_tx,
        1000,
        10,
    ));
    let pumped = tokio::spawn(pump(frame_rx, sender));
    feed.await??;
    pumped.await??;

    inbox.drain_into(&mut reg);
    run_ticks(&mut reg, 5, 1.0 / 60.0);
    assert_eq!(reg.len(), 2);
    assert_eq!(reg.len_in(tiles), 2);
    assert_eq!(reg.diagnostics().races, 0);
    Ok(())
}
