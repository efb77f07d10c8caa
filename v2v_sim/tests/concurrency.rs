//! Cross-thread merges, two-way broadcasts and teardown safety.

use nalgebra::Vector3;
use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use v2v_core::{DetectionStore, RuntimeConfig, RuntimeServices, SensorConfig, VehicleRuntime, WalkerObservation};
use v2v_env::ActorId;
use v2v_sim::{PhysicsWorld, SimConfig, SimContext, SimScheduler, SimWorld};

struct Pair {
    ctx: Arc<SimContext>,
    physics: Arc<PhysicsWorld>,
    scheduler: SimScheduler,
    services: RuntimeServices,
    a: VehicleRuntime,
    b: VehicleRuntime,
}

fn pair(separation: f64) -> Pair {
    let ctx = SimContext::shared(3);
    let physics = Arc::new(PhysicsWorld::new());
    let scheduler = SimScheduler::new(ctx.clone());
    let services = RuntimeServices::new(physics.clone(), ctx.clone());

    let spawn = |name: &str, x: f64| {
        let vehicle = physics.spawn_vehicle(Vector3::new(x, 0.0, 0.0), Vector3::zeros());
        let agent = physics.attach_sensor(vehicle).unwrap();
        let config = RuntimeConfig {
            name: name.to_string(),
            ..Default::default()
        };
        let runtime = VehicleRuntime::new(vehicle, agent, config, &services);
        runtime.activate(&scheduler).unwrap();
        runtime
    };
    let a = spawn("a", 0.0);
    let b = spawn("b", separation);

    Pair {
        ctx,
        physics,
        scheduler,
        services,
        a,
        b,
    }
}

#[test]
fn test_parallel_merges_keep_latest_timestamp() {
    let p = pair(500.0);
    let store = Arc::clone(p.a.store());
    let walkers: Vec<ActorId> = (0..4).map(|i| ActorId(10_000 + i)).collect();

    thread::scope(|s| {
        for t in 0..8u32 {
            let store = Arc::clone(&store);
            let walkers = walkers.clone();
            s.spawn(move || {
                for i in 0..500u32 {
                    let walker = walkers[(i as usize + t as usize) % walkers.len()];
                    let ts = f64::from(i * 8 + t) * 0.01;
                    store.merge(walker, Vector3::new(ts, 0.0, 0.0), ts, false);
                }
            });
        }
        // The owner keeps scanning while peers write
        let scanner = Arc::clone(&store);
        s.spawn(move || {
            for _ in 0..500 {
                scanner.scan_tick(1.0 / 30.0);
            }
        });
    });

    for walker in &walkers {
        let obs = store.get(*walker).unwrap();
        // Location always travels with its own timestamp
        assert_eq!(obs.location.x, obs.timestamp);
        assert!(!obs.directly_observed);
    }
    let max = store.snapshot().iter().map(|o| o.timestamp).fold(0.0, f64::max);
    assert!((max - 39.99).abs() < 1e-9);
}

#[test]
fn test_two_way_broadcasts_do_not_deadlock() {
    let p = pair(500.0);
    p.a.store().merge(ActorId(1), Vector3::zeros(), 1.0, true);
    p.b.store().merge(ActorId(2), Vector3::zeros(), 1.0, true);

    let agent_a = Arc::clone(p.a.agent());
    let agent_b = Arc::clone(p.b.agent());
    thread::scope(|s| {
        s.spawn(move || {
            for _ in 0..1000 {
                agent_a.on_periodic_tick();
            }
        });
        s.spawn(move || {
            for _ in 0..1000 {
                agent_b.on_periodic_tick();
            }
        });
    });

    assert!(p.a.store().get(ActorId(2)).is_some_and(|o| !o.directly_observed));
    assert!(p.b.store().get(ActorId(1)).is_some_and(|o| !o.directly_observed));
    // Own detections stay direct despite relayed echoes
    assert!(p.a.store().get(ActorId(1)).unwrap().directly_observed);
    assert_eq!(p.a.agent().stats().cycles, 1000);
}

#[test]
fn test_teardown_leaves_no_live_callbacks() {
    let mut world = SimWorld::new(SimConfig::default());
    world.spawn_vehicle("a", Vector3::zeros(), Vector3::zeros()).unwrap();
    world.spawn_vehicle("b", Vector3::new(500.0, 0.0, 0.0), Vector3::zeros()).unwrap();
    world.spawn_walker(Vector3::new(510.0, 0.0, 0.0), Vector3::zeros());
    world.run_for(2.0);

    assert!(world.teardown_vehicle(0));
    assert!(world.teardown_vehicle(1));
    assert_eq!(world.scheduler.armed(), 0);

    let fired = world.scheduler.fired();
    world.run_for(3.0);
    assert_eq!(world.scheduler.fired(), fired);
    for runtime in world.vehicles() {
        assert!(!runtime.is_active());
        assert!(runtime.store().is_empty());
    }
}

#[test]
fn test_dropped_runtime_callbacks_are_inert() {
    let p = pair(500.0);
    let Pair {
        ctx,
        physics,
        scheduler,
        services,
        a,
        b,
    } = p;
    let a_store = Arc::downgrade(a.store());
    let a_agent = a.agent().agent_id();
    drop(a);

    // Timers still armed, but they only hold weak references
    assert_eq!(scheduler.armed(), 4);
    assert!(a_store.upgrade().is_none());
    assert!(services.registry.lookup(a_agent).is_none());

    b.store().merge(ActorId(7), Vector3::zeros(), 0.5, true);
    let report = b.agent().on_periodic_tick();
    assert_eq!(report.peers_reached, 0);

    // Firing the orphaned timers is harmless
    ctx.advance_time(Duration::from_secs(2));
    assert!(scheduler.run_due() > 0);
    assert!(b.store().get(ActorId(7)).is_some());

    b.teardown(&scheduler);
    assert_eq!(scheduler.armed(), 2);
    assert!(physics.actor_count() >= 4);
}

fn observations() -> impl Strategy<Value = Vec<(u64, f64, bool)>> {
    prop::collection::vec((0u64..4, -100.0f64..100.0, any::<bool>()), 1..40)
}

/// Direct flag per walker after applying `batch` in order.
fn expected_flags(batch: &[WalkerObservation]) -> BTreeMap<ActorId, bool> {
    let mut latest: BTreeMap<ActorId, (f64, bool)> = BTreeMap::new();
    for obs in batch {
        let entry = latest.entry(obs.walker_id).or_insert((f64::NEG_INFINITY, false));
        if obs.timestamp > entry.0 {
            entry.0 = obs.timestamp;
            entry.1 |= obs.directly_observed;
        }
    }
    latest.into_iter().map(|(walker, (_, flag))| (walker, flag)).collect()
}

proptest! {
    #[test]
    fn prop_delivery_order_does_not_matter(updates in observations(), seed in any::<u64>()) {
        let ctx = SimContext::shared(0);
        let physics = Arc::new(PhysicsWorld::new());
        let make = || {
            let store = DetectionStore::new(SensorConfig::default(), physics.clone(), ctx.clone());
            store.attach(ActorId(1));
            store
        };
        let forward = make();
        let shuffled = make();

        // Distinct timestamps per update
        let batch: Vec<WalkerObservation> = updates
            .iter()
            .enumerate()
            .map(|(i, (w, x, direct))| WalkerObservation::new(ActorId(100 + w), Vector3::new(*x, 0.0, 0.0), i as f64, *direct))
            .collect();

        let mut reordered = batch.clone();
        reordered.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));

        forward.merge_batch(batch.iter().copied());
        // Deliver twice to check duplicates are harmless
        shuffled.merge_batch(reordered.iter().copied());
        shuffled.merge_batch(reordered.iter().copied());

        let a = forward.snapshot_at(0.0);
        let b = shuffled.snapshot_at(0.0);
        prop_assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            prop_assert_eq!(x.walker_id, y.walker_id);
            prop_assert_eq!(x.location, y.location);
            prop_assert_eq!(x.timestamp, y.timestamp);
        }

        // The flag follows arrival order
        let forward_flags = expected_flags(&batch);
        let shuffled_flags = expected_flags(&reordered);
        for obs in &a {
            prop_assert_eq!(obs.directly_observed, forward_flags[&obs.walker_id]);
        }
        for obs in &b {
            prop_assert_eq!(obs.directly_observed, shuffled_flags[&obs.walker_id]);
        }
    }
}
