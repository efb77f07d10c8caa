//! In-memory world and clock doubles for unit tests.

use nalgebra::Vector3;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use v2v_env::{ActorId, ActorKind, Clock, RayHit, WorldQuery};

/// Clock whose time is set by hand.
pub struct ManualClock {
    secs: Mutex<f64>,
}

impl ManualClock {
    pub fn new(secs: f64) -> Self {
        Self {
            secs: Mutex::new(secs),
        }
    }

    pub fn set(&self, secs: f64) {
        *self.secs.lock().unwrap() = secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_secs_f64(*self.secs.lock().unwrap())
    }

    fn now_secs(&self) -> f64 {
        *self.secs.lock().unwrap()
    }
}

#[derive(Debug, Clone)]
pub struct StubActor {
    pub kind: ActorKind,
    pub location: Vector3<f64>,
    pub owner: Option<ActorId>,
}

/// Arguments of the most recent `cast_ray`.
#[derive(Debug, Clone)]
pub struct RecordedCast {
    pub origin: Vector3<f64>,
    pub direction: Vector3<f64>,
    pub max_range: f64,
    pub ignore: Vec<ActorId>,
}

/// World with a scripted ray result and point-distance overlap queries.
#[derive(Default)]
pub struct StubWorld {
    actors: Mutex<BTreeMap<ActorId, StubActor>>,
    hit: Mutex<Option<RayHit>>,
    last_cast: Mutex<Option<RecordedCast>>,
}

impl StubWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: ActorId, kind: ActorKind, location: Vector3<f64>) {
        self.actors.lock().unwrap().insert(
            id,
            StubActor {
                kind,
                location,
                owner: None,
            },
        );
    }

    pub fn set_owner(&self, id: ActorId, owner: ActorId) {
        if let Some(actor) = self.actors.lock().unwrap().get_mut(&id) {
            actor.owner = Some(owner);
        }
    }

    pub fn move_to(&self, id: ActorId, location: Vector3<f64>) {
        if let Some(actor) = self.actors.lock().unwrap().get_mut(&id) {
            actor.location = location;
        }
    }

    /// Every subsequent ray reports this hit.
    pub fn set_hit(&self, actor: ActorId, impact_point: Vector3<f64>) {
        *self.hit.lock().unwrap() = Some(RayHit::new(actor, impact_point, 0.0));
    }

    pub fn clear_hit(&self) {
        *self.hit.lock().unwrap() = None;
    }

    pub fn last_cast(&self) -> Option<RecordedCast> {
        self.last_cast.lock().unwrap().clone()
    }
}

impl WorldQuery for StubWorld {
    fn cast_ray(
        &self,
        origin: Vector3<f64>,
        direction: Vector3<f64>,
        max_range: f64,
        ignore: &[ActorId],
    ) -> Option<RayHit> {
        *self.last_cast.lock().unwrap() = Some(RecordedCast {
            origin,
            direction,
            max_range,
            ignore: ignore.to_vec(),
        });
        *self.hit.lock().unwrap()
    }

    fn actors_in_sphere(&self, center: Vector3<f64>, radius: f64, kind: Option<ActorKind>) -> Vec<ActorId> {
        self.actors
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, a)| kind.map_or(true, |k| a.kind == k))
            .filter(|(_, a)| (a.location - center).norm() <= radius)
            .map(|(id, _)| *id)
            .collect()
    }

    fn attached_actors(&self, actor: ActorId) -> Vec<ActorId> {
        self.actors
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, a)| a.owner == Some(actor))
            .map(|(id, _)| *id)
            .collect()
    }

    fn owner_of(&self, actor: ActorId) -> Option<ActorId> {
        self.actors.lock().unwrap().get(&actor).and_then(|a| a.owner)
    }

    fn kind_of(&self, actor: ActorId) -> Option<ActorKind> {
        self.actors.lock().unwrap().get(&actor).map(|a| a.kind)
    }

    fn location_of(&self, actor: ActorId) -> Option<Vector3<f64>> {
        self.actors.lock().unwrap().get(&actor).map(|a| a.location)
    }
}
