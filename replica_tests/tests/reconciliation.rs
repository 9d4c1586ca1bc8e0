//! End-to-end properties of the client reconciliation core.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use replica_client::{pool::ObjectPool, EventOutcome};
use replica_shared::{
    config::ReplicaConfig,
    entity::{EntityId, EntityKey, Role},
    math::{Quat, Vec3},
    net::{NetEvent, WireValue},
    render::{RecordingSink, RecordingSurface},
    snapshot::{Field, FieldValue, ScalarField, Snapshot},
};
use replica_tests::{init_tracing, registry_with, run_ticks};

const FRAME: f32 = 1.0 / 60.0;

fn pos(x: f32, y: f32, z: f32) -> FieldValue {
    FieldValue::Vec3(Vec3::new(x, y, z))
}

#[test]
fn smoothing_step_matches_closed_form() -> anyhow::Result<()> {
    init_tracing();
    let cfg = ReplicaConfig {
        remote_smoothing_speed: 15.0,
        ..ReplicaConfig::default()
    };
    let (mut reg, c) = registry_with(cfg, "players")?;
    let id = EntityId::session("remote");
    reg.on_add(c, id.clone(), Snapshot::default());
    reg.on_field_change(c, &id, Field::Position, pos(10.0, 0.0, 0.0));
    reg.tick(0.1);

    let expected = 10.0 * (1.0 - (-1.5f32).exp());
    let x = reg.state(c, &id).unwrap().current().position.x;
    assert!((x - expected).abs() <= expected * 0.01, "x = {x}, expected ≈ {expected}");
    assert_eq!(reg.surface(c, &id).unwrap().position.x, x);
    Ok(())
}

#[test]
fn remote_entity_converges_without_overshoot() -> anyhow::Result<()> {
    let (mut reg, c) = registry_with(ReplicaConfig::default(), "players")?;
    let id = EntityId::Index(1);
    reg.on_add(c, id.clone(), Snapshot::default());
    reg.on_field_change(c, &id, Field::Position, pos(10.0, 0.0, -4.0));
    reg.on_field_change(c, &id, Field::Rotation, FieldValue::Quat(Quat::from_yaw(1.2)));

    let target = *reg.state(c, &id).unwrap().target();
    let mut last_distance = f32::MAX;
    for _ in 0..600 {
        reg.tick(FRAME);
        let current = *reg.state(c, &id).unwrap().current();
        let d = current.position.distance_sq(target.position);
        assert!(d <= last_distance + 1e-9, "distance grew: {d} > {last_distance}");
        assert!(current.position.x <= 10.0 + 1e-5);
        last_distance = d;
    }

    let state = reg.state(c, &id).unwrap();
    assert_eq!(state.current().position, target.position);
    assert_eq!(state.current().rotation, target.rotation);
    assert!(!state.is_dirty());

    // Once settled the entity takes the static fast path.
    let stats = reg.tick(FRAME);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.ticked, 0);
    Ok(())
}

#[test]
fn local_entity_is_exact_after_every_tick() -> anyhow::Result<()> {
    let (mut reg, c) = registry_with(ReplicaConfig::default(), "players")?;
    let me = EntityId::session("me");
    reg.set_local_entity(c, me.clone());
    reg.on_add(c, me.clone(), Snapshot::default());

    for i in 0..50 {
        let t = i as f32;
        reg.on_field_change(c, &me, Field::Position, pos(t.sin() * 3.0, 0.0, t * 0.01));
        reg.on_field_change(c, &me, Field::Rotation, FieldValue::Quat(Quat::from_yaw(t * 0.1)));
        reg.tick(FRAME);
        let state = reg.state(c, &me).unwrap();
        assert_eq!(state.role(), Role::LocalInstant);
        assert_eq!(state.current(), state.target());
    }
    Ok(())
}

#[test]
fn velocity_is_inferred_then_decays_with_bounded_lead() -> anyhow::Result<()> {
    let cfg = ReplicaConfig::default();
    let cap_secs = cfg.extrapolation_cap_ms / 1000.0;
    let (mut reg, c) = registry_with(cfg, "players")?;
    let id = EntityId::session("runner");
    reg.on_add(c, id.clone(), Snapshot::default());
    reg.tick(0.05);
    reg.on_field_change(c, &id, Field::Position, pos(1.0, 0.0, 0.0));

    let v0 = reg.state(c, &id).unwrap().inferred_velocity();
    assert!((v0.x - 20.0).abs() < 0.2, "velocity {v0:?}");
    let bound = 20.0 * cap_secs + 1e-3;

    for _ in 0..10 {
        reg.tick(0.01);
        let lead = reg.state(c, &id).unwrap().extrapolated_lead();
        assert!(lead.len() <= bound, "lead {} exceeds {}", lead.len(), bound);
    }
    let v = reg.state(c, &id).unwrap().inferred_velocity();
    assert!(v.len() < v0.len());

    // Long silence: prediction degrades to stationary and the lead stays bounded.
    for _ in 0..600 {
        reg.tick(FRAME);
        assert!(reg.state(c, &id).unwrap().extrapolated_lead().len() <= bound);
    }
    let state = reg.state(c, &id).unwrap();
    assert_eq!(state.inferred_velocity(), Vec3::ZERO);
    assert_eq!(state.current().position, state.target().position);
    Ok(())
}

#[test]
fn stationary_updates_do_not_drift() -> anyhow::Result<()> {
    let (mut reg, c) = registry_with(ReplicaConfig::default(), "players")?;
    let id = EntityId::Index(4);
    reg.on_add(c, id.clone(), Snapshot::at(Vec3::new(2.0, 0.0, 2.0)));
    for _ in 0..20 {
        reg.tick(1.0 / 30.0);
        reg.on_field_change(c, &id, Field::Position, pos(2.0, 0.0, 2.0));
    }
    let state = reg.state(c, &id).unwrap();
    assert_eq!(state.inferred_velocity(), Vec3::ZERO);
    assert_eq!(state.current().position, Vec3::new(2.0, 0.0, 2.0));
    Ok(())
}

#[test]
fn pool_reacquire_returns_the_same_object() {
    let mut pool: ObjectPool<u32, RecordingSurface> = ObjectPool::new(RecordingSurface::factory());
    let snap_a = Snapshot::at(Vec3::new(1.0, 0.0, 0.0));
    let snap_b = Snapshot::at(Vec3::new(0.0, 0.0, 7.0)).with_scale(2.0);

    let first = pool.acquire(5, &snap_a);
    let serial = pool.surface(first).unwrap().serial;
    pool.release(&5);
    let second = pool.acquire(5, &snap_b);

    assert_eq!(first.index(), second.index());
    let surface = pool.surface(second).unwrap();
    assert_eq!(surface.serial, serial);
    assert_eq!(surface.position, snap_b.position);
    assert_eq!(surface.scale, 2.0);
    assert_eq!(pool.count_allocated(), 1);
}

#[test]
fn pool_release_twice_equals_once() {
    let mut pool: ObjectPool<u32, RecordingSurface> = ObjectPool::new(RecordingSurface::factory());
    for k in 0..4 {
        pool.acquire(k, &Snapshot::default());
    }
    pool.release(&2);
    let once = pool.stats();
    pool.release(&2);
    assert_eq!(pool.stats(), once);
    assert_eq!(once.active + once.free, once.allocated);
}

#[test]
fn add_remove_add_in_one_window_leaves_one_entity() -> anyhow::Result<()> {
    let (mut reg, c) = registry_with(ReplicaConfig::default(), "tiles")?;
    let id = EntityId::Index(7);
    let s1 = Snapshot::at(Vec3::new(1.0, 0.0, 0.0));
    let s2 = Snapshot::at(Vec3::new(2.0, 0.0, 0.0));

    assert_eq!(reg.on_add(c, id.clone(), s1), EventOutcome::Applied);
    assert_eq!(reg.on_remove(c, &id), EventOutcome::Applied);
    assert_eq!(reg.on_add(c, id.clone(), s2), EventOutcome::Applied);
    reg.tick(FRAME);

    assert_eq!(reg.len_in(c), 1);
    let state = reg.state(c, &id).unwrap();
    assert_eq!(*state.target(), s2);
    assert_eq!(*state.current(), s2);
    let pool = reg.pool_stats();
    assert_eq!(pool.active, 1);
    assert_eq!(pool.active + pool.free, pool.allocated);
    Ok(())
}

#[test]
fn churn_keeps_pool_conserved_and_allocation_free() -> anyhow::Result<()> {
    let cfg = ReplicaConfig {
        pool_prewarm_count: 4,
        ..ReplicaConfig::default()
    };
    let (mut reg, c) = registry_with(cfg, "tiles")?;

    for round in 0u32..200 {
        let id = EntityId::Index(round % 9);
        let before = reg.pool_stats();
        if reg.state(c, &id).is_some() && round % 3 != 0 {
            reg.on_remove(c, &id);
        } else {
            let was_live = reg.state(c, &id).is_some();
            reg.on_add(c, id, Snapshot::at(Vec3::new(round as f32, 0.0, 0.0)));
            if before.free > 0 || was_live {
                assert_eq!(reg.pool_stats().allocated, before.allocated);
            }
        }
        // Out-of-order noise from the network layer.
        reg.on_remove(c, &EntityId::Index(100 + round));
        reg.tick(FRAME);

        let stats = reg.pool_stats();
        assert_eq!(stats.active + stats.free, stats.allocated);
        assert_eq!(stats.active, reg.len());
    }
    assert!(reg.pool_stats().allocated <= 9);
    Ok(())
}

#[test]
fn animation_ignores_network_until_done_then_resumes() -> anyhow::Result<()> {
    type Rendered = (Vec3, Quat, f32);
    let run = |with_updates: bool| -> anyhow::Result<(Vec<Rendered>, Snapshot, usize, usize)> {
        let (mut reg, c) = registry_with(ReplicaConfig::default(), "tiles")?;
        let id = EntityId::available(3);
        reg.on_add(c, id.clone(), Snapshot::default());

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        reg.start_animation(
            c,
            &id,
            Snapshot::at(Vec3::new(5.0, 2.0, 0.0)),
            0.5,
            Some(Box::new(move |_: &EntityKey| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );

        let mut rendered = Vec::new();
        for i in 0..29 {
            if with_updates {
                reg.on_field_change(c, &id, Field::Position, pos(-3.0, 0.0, i as f32));
                reg.on_field_change(c, &id, Field::Rotation, FieldValue::Quat(Quat::from_yaw(1.0 + i as f32)));
                reg.on_field_change(c, &id, Field::Scale, FieldValue::Float(3.0));
            }
            reg.tick(FRAME);
            assert!(reg.is_animating(c, &id));
            let surface = reg.surface(c, &id).unwrap();
            rendered.push((surface.position, surface.rotation, surface.scale));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        run_ticks(&mut reg, 2, FRAME);
        assert!(!reg.is_animating(c, &id));
        let completed = reg.drain_completed().len();
        run_ticks(&mut reg, 600, FRAME);
        let current = *reg.state(c, &id).unwrap().current();
        Ok((rendered, current, fired.load(Ordering::SeqCst), completed))
    };

    let (quiet, quiet_end, quiet_fired, quiet_done) = run(false)?;
    let (noisy, noisy_end, noisy_fired, noisy_done) = run(true)?;
    assert_eq!(quiet, noisy);
    assert_eq!((quiet_fired, noisy_fired), (1, 1));
    assert_eq!((quiet_done, noisy_done), (1, 1));

    // Afterwards the server is authoritative again.
    assert_eq!(quiet_end.position, Vec3::ZERO);
    assert_eq!(noisy_end.position, Vec3::new(-3.0, 0.0, 28.0));
    Ok(())
}

#[test]
fn restarting_an_animation_drops_the_old_callback() -> anyhow::Result<()> {
    let (mut reg, c) = registry_with(ReplicaConfig::default(), "tiles")?;
    let id = EntityId::placed(1);
    reg.on_add(c, id.clone(), Snapshot::default());

    let fired = Arc::new(AtomicUsize::new(0));
    let first = fired.clone();
    reg.start_animation(
        c,
        &id,
        Snapshot::at(Vec3::new(1.0, 0.0, 0.0)),
        0.2,
        Some(Box::new(move |_: &EntityKey| {
            first.fetch_add(10, Ordering::SeqCst);
        })),
    );
    reg.tick(FRAME);
    let second = fired.clone();
    reg.start_animation(
        c,
        &id,
        Snapshot::at(Vec3::new(2.0, 0.0, 0.0)),
        0.0,
        Some(Box::new(move |_: &EntityKey| {
            second.fetch_add(1, Ordering::SeqCst);
        })),
    );
    run_ticks(&mut reg, 120, FRAME);
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // Cancelling with nothing running is a no-op.
    assert!(!reg.cancel_animation(c, &id));
    Ok(())
}

#[test]
fn fill_updates_wait_for_the_frame_ui() -> anyhow::Result<()> {
    let (mut reg, c) = registry_with(ReplicaConfig::default(), "frames")?;
    let frame = EntityId::Index(0);
    let snap = Snapshot::default().with_field(ScalarField::FillCount, FieldValue::Count(0));
    reg.on_add(c, frame.clone(), snap);
    for n in 1..=3 {
        reg.on_field_change(c, &frame, Field::Scalar(ScalarField::FillCount), FieldValue::Count(n));
        reg.tick(FRAME);
    }
    assert_eq!(reg.pending_fields(c), 1);

    let sink = Arc::new(Mutex::new(RecordingSink::default()));
    reg.attach_sink(c, Box::new(sink.clone()));
    assert_eq!(reg.pending_fields(c), 0);
    assert_eq!(
        sink.lock().unwrap().received,
        vec![(frame.clone(), ScalarField::FillCount, FieldValue::Count(3))]
    );

    reg.on_field_change(c, &frame, Field::Scalar(ScalarField::FillCount), FieldValue::Count(4));
    // Delivered on the tick, not in the network handler.
    assert_eq!(sink.lock().unwrap().received.len(), 1);
    reg.tick(FRAME);
    assert_eq!(sink.lock().unwrap().received.len(), 2);
    assert_eq!(
        reg.state(c, &frame).unwrap().current().fields.fill_count,
        Some(4)
    );
    Ok(())
}

#[test]
fn malformed_wire_update_is_rejected_and_state_kept() -> anyhow::Result<()> {
    let (mut reg, c) = registry_with(ReplicaConfig::default(), "players")?;
    let id = EntityId::session("p1");
    reg.on_add(c, id.clone(), Snapshot::at(Vec3::new(1.0, 2.0, 3.0)));

    let bad = NetEvent::Change {
        collection: "players".into(),
        id: id.clone(),
        field: "position".into(),
        value: WireValue::Array(vec![1.0, 2.0]),
    };
    assert_eq!(reg.apply_net(bad), EventOutcome::Rejected);
    let overflow = NetEvent::Change {
        collection: "players".into(),
        id: id.clone(),
        field: "health".into(),
        value: WireValue::Number(1e300),
    };
    assert_eq!(reg.apply_net(overflow), EventOutcome::Rejected);

    let good = NetEvent::change("players", id.clone(), Field::Position, pos(4.0, 0.0, 0.0));
    assert_eq!(reg.apply_net(good), EventOutcome::Applied);
    run_ticks(&mut reg, 600, FRAME);

    let state = reg.state(c, &id).unwrap();
    assert_eq!(state.current().position, Vec3::new(4.0, 0.0, 0.0));
    assert_eq!(reg.diagnostics().rejected, 2);
    Ok(())
}

#[test]
fn effects_are_culled_by_distance() -> anyhow::Result<()> {
    use replica_client::culling::EffectCuller;

    let (mut reg, c) = registry_with(ReplicaConfig::default(), "players")?;
    let near = EntityId::Index(1);
    let far = EntityId::Index(2);
    reg.on_add(c, near.clone(), Snapshot::at(Vec3::new(1.0, 0.0, 0.0)));
    reg.on_add(c, far.clone(), Snapshot::at(Vec3::new(100.0, 0.0, 0.0)));

    let culler = EffectCuller::new(10.0, 1.0);
    assert_eq!(reg.apply_culling(&culler, Vec3::ZERO), 1);
    assert!(reg.surface(c, &near).unwrap().effects_enabled);
    assert!(!reg.surface(c, &far).unwrap().effects_enabled);
    // Nothing flips the second time.
    assert_eq!(reg.apply_culling(&culler, Vec3::ZERO), 0);
    Ok(())
}
