// The simulation interface the controller drives, and the callback contracts
// the backend calls back into during steps and queries

use super::body::{ConvexShape, PhysicsEntity};
use super::collision::{ContactManifold, ManifoldResponse};
use super::dispatcher::ThreadDispatcher;
use super::handle::{BodyHandle, CollidablePair, CollidableRef};
use super::scratch::ScratchBufferPool;
use crate::core::math::{BodyVelocity, Pose};
use glam::Vec3;

/// Narrow-phase hooks invoked from backend worker threads during a step
pub trait NarrowPhaseCallbacks: Sync {
    /// Broad-phase pair gate
    fn allow_contact_generation(&self, worker: usize, a: CollidableRef, b: CollidableRef) -> bool;

    /// Per-child gate for compound collidables, after the parent pair passed
    fn allow_child_contact_generation(
        &self,
        worker: usize,
        pair: CollidablePair,
        child_a: usize,
        child_b: usize,
    ) -> bool;

    /// Decide whether a manifold generates a constraint, and with which material
    fn configure_contact_manifold(
        &self,
        worker: usize,
        pair: CollidablePair,
        manifold: &ContactManifold,
    ) -> ManifoldResponse;

    /// Manifold between two compound children
    fn configure_child_manifold(
        &self,
        worker: usize,
        pair: CollidablePair,
        child_a: usize,
        child_b: usize,
        manifold: &ContactManifold,
    ) -> bool;
}

/// Velocity integration invoked once per body per sub-step
pub trait PoseIntegrator: Sync {
    fn integrate_velocity(&self, body: CollidableRef, velocity: &mut BodyVelocity, dt: f32);
}

/// Everything a timestep calls back into
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    pub callbacks: &'a dyn NarrowPhaseCallbacks,
    pub integrator: &'a dyn PoseIntegrator,
    pub dispatcher: &'a ThreadDispatcher,
}

/// Ray as handed to ray hit handlers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayData {
    pub origin: Vec3,
    /// Unit direction
    pub direction: Vec3,
}

/// Visitor driven by [`QueryView::ray_cast`].
///
/// `t` is the distance along the unit direction. Handlers shrink `max_t` to
/// prune the rest of the traversal.
pub trait RayHitHandler {
    fn allow_test(&self, candidate: CollidableRef) -> bool;

    fn allow_test_child(&self, candidate: CollidableRef, child: usize) -> bool;

    /// True for handlers that never shrink `max_t`; backends then enumerate
    /// every intersection instead of searching closest-first.
    fn collects_all(&self) -> bool {
        false
    }

    fn on_ray_hit(
        &mut self,
        ray: &RayData,
        max_t: &mut f32,
        t: f32,
        normal: Vec3,
        candidate: CollidableRef,
        child: usize,
    );
}

/// Visitor driven by [`QueryView::sweep`]
pub trait SweepHitHandler {
    fn allow_test(&self, candidate: CollidableRef) -> bool;

    fn allow_test_child(&self, candidate: CollidableRef, child: usize) -> bool;

    /// See [`RayHitHandler::collects_all`]
    fn collects_all(&self) -> bool {
        false
    }

    /// Hit found during traversal at `t` along the sweep direction
    fn on_hit(&mut self, max_t: &mut f32, t: f32, point: Vec3, normal: Vec3, candidate: CollidableRef);

    /// The swept shape already overlaps the candidate at its start pose
    fn on_hit_at_zero_t(&mut self, max_t: &mut f32, candidate: CollidableRef);
}

/// Read-only view of a world that spatial queries and body reads run against.
///
/// Views are immutable once published, so any number of threads may query one
/// while the world it was taken from keeps stepping.
pub trait QueryView: Send + Sync {
    fn ray_cast(&self, origin: Vec3, direction: Vec3, max_t: f32, handler: &mut dyn RayHitHandler);

    /// Sweep `shape` from `pose` along the unit `direction` up to `max_t`
    fn sweep(
        &self,
        shape: &ConvexShape,
        pose: &Pose,
        direction: Vec3,
        max_t: f32,
        pool: &mut ScratchBufferPool,
        handler: &mut dyn SweepHitHandler,
    );

    fn body_pose(&self, handle: BodyHandle) -> Option<Pose>;

    fn body_velocity(&self, handle: BodyHandle) -> Option<BodyVelocity>;
}

/// Collision and dynamics world consumed by the controller.
///
/// Every method that changes the world takes `&mut self` and runs on one
/// thread at a time. Queries never touch the world directly: they run against
/// a [`QueryView`] taken with [`snapshot`](Simulation::snapshot).
pub trait Simulation: Send + Sync {
    type Snapshot: QueryView + 'static;

    /// Insert a static collidable, returning its backend-issued handle
    fn add_static(&mut self, entity: &PhysicsEntity, pose: Pose) -> BodyHandle;

    /// Insert a dynamic or kinematic body
    fn add_body(&mut self, entity: &PhysicsEntity, pose: Pose, velocity: BodyVelocity) -> BodyHandle;

    fn remove_static(&mut self, handle: BodyHandle) -> bool;

    fn remove_body(&mut self, handle: BodyHandle) -> bool;

    /// Remove everything and recycle every handle
    fn clear(&mut self);

    /// Make topology changes visible to the next snapshot
    fn flush_topology(&mut self) {}

    /// Advance the world by `dt`
    fn timestep(&mut self, dt: f32, context: StepContext<'_>);

    /// Copy of the current collision state for queries
    fn snapshot(&self) -> Self::Snapshot;

    fn set_body_velocity(&mut self, handle: BodyHandle, velocity: BodyVelocity) -> bool;

    fn static_count(&self) -> usize;

    fn body_count(&self) -> usize;
}

#[cfg(test)]
pub(crate) mod testing {
    // Deterministic backend that replays scripted hits and contacts

    use super::*;
    use crate::engine::physics::handle::{IdPool, Mobility};
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy)]
    pub struct ScriptedRayHit {
        pub handle: BodyHandle,
        pub t: f32,
        pub normal: Vec3,
        pub child: usize,
    }

    #[derive(Debug, Clone, Copy)]
    pub struct ScriptedSweepHit {
        pub handle: BodyHandle,
        /// Zero replays as an overlap at the sweep start
        pub t: f32,
        pub point: Vec3,
        pub normal: Vec3,
        pub child: Option<usize>,
    }

    #[derive(Debug, Clone, Copy)]
    pub struct ScriptedContact {
        pub a: BodyHandle,
        pub b: BodyHandle,
        pub manifold: ContactManifold,
    }

    #[derive(Debug, Clone, Copy)]
    struct ScriptedBody {
        mobility: Mobility,
        pose: Pose,
        velocity: BodyVelocity,
    }

    /// Bodies integrate with the supplied integrator and move in a straight
    /// line; nothing collides except what the script says. The backend is its
    /// own snapshot.
    #[derive(Debug, Clone, Default)]
    pub struct ScriptedSimulation {
        ids: IdPool,
        entries: HashMap<BodyHandle, ScriptedBody>,
        pub ray_hits: Vec<ScriptedRayHit>,
        pub sweep_hits: Vec<ScriptedSweepHit>,
        pub contacts: Vec<ScriptedContact>,
        pub steps: usize,
        pub last_dt: f32,
        /// Sleep inside every timestep, to hold a step in flight
        pub step_delay: Option<Duration>,
    }

    impl ScriptedSimulation {
        pub fn new() -> Self {
            Self::default()
        }

        fn collidable(&self, handle: BodyHandle) -> Option<CollidableRef> {
            self.entries
                .get(&handle)
                .map(|entry| CollidableRef::new(entry.mobility, handle))
        }
    }

    impl Simulation for ScriptedSimulation {
        type Snapshot = ScriptedSimulation;

        fn add_static(&mut self, _entity: &PhysicsEntity, pose: Pose) -> BodyHandle {
            let handle = self.ids.take();
            self.entries.insert(
                handle,
                ScriptedBody {
                    mobility: Mobility::Static,
                    pose,
                    velocity: BodyVelocity::default(),
                },
            );
            handle
        }

        fn add_body(&mut self, entity: &PhysicsEntity, pose: Pose, velocity: BodyVelocity) -> BodyHandle {
            let handle = self.ids.take();
            self.entries.insert(
                handle,
                ScriptedBody {
                    mobility: entity.mobility(),
                    pose,
                    velocity,
                },
            );
            handle
        }

        fn remove_static(&mut self, handle: BodyHandle) -> bool {
            self.remove_body(handle)
        }

        fn remove_body(&mut self, handle: BodyHandle) -> bool {
            let removed = self.entries.remove(&handle).is_some();
            if removed {
                self.ids.release(handle);
            }
            removed
        }

        fn clear(&mut self) {
            self.entries.clear();
            self.ids.clear();
        }

        fn timestep(&mut self, dt: f32, context: StepContext<'_>) {
            self.steps += 1;
            self.last_dt = dt;
            if let Some(delay) = self.step_delay {
                std::thread::sleep(delay);
            }

            for (handle, entry) in self.entries.iter_mut() {
                if entry.mobility == Mobility::Static {
                    continue;
                }
                let body = CollidableRef::new(entry.mobility, *handle);
                context
                    .integrator
                    .integrate_velocity(body, &mut entry.velocity, dt);
                entry.pose.position += entry.velocity.linear * dt;
            }

            for contact in &self.contacts {
                let (Some(a), Some(b)) = (self.collidable(contact.a), self.collidable(contact.b)) else {
                    continue;
                };
                if context.callbacks.allow_contact_generation(0, a, b) {
                    context
                        .callbacks
                        .configure_contact_manifold(0, CollidablePair { a, b }, &contact.manifold);
                }
            }
        }

        fn snapshot(&self) -> Self::Snapshot {
            self.clone()
        }

        fn set_body_velocity(&mut self, handle: BodyHandle, velocity: BodyVelocity) -> bool {
            match self.entries.get_mut(&handle) {
                Some(entry) => {
                    entry.velocity = velocity;
                    true
                }
                None => false,
            }
        }

        fn static_count(&self) -> usize {
            self.entries
                .values()
                .filter(|entry| entry.mobility == Mobility::Static)
                .count()
        }

        fn body_count(&self) -> usize {
            self.entries.len() - self.static_count()
        }
    }

    impl QueryView for ScriptedSimulation {
        fn ray_cast(&self, origin: Vec3, direction: Vec3, max_t: f32, handler: &mut dyn RayHitHandler) {
            let ray = RayData { origin, direction };
            let mut max_t = max_t;
            for hit in &self.ray_hits {
                let Some(candidate) = self.collidable(hit.handle) else {
                    continue;
                };
                if hit.t > max_t || !handler.allow_test(candidate) {
                    continue;
                }
                if !handler.allow_test_child(candidate, hit.child) {
                    continue;
                }
                handler.on_ray_hit(&ray, &mut max_t, hit.t, hit.normal, candidate, hit.child);
            }
        }

        fn sweep(
            &self,
            _shape: &ConvexShape,
            _pose: &Pose,
            _direction: Vec3,
            max_t: f32,
            pool: &mut ScratchBufferPool,
            handler: &mut dyn SweepHitHandler,
        ) {
            let mut candidates: Vec<ScriptedSweepHit> = pool.take();
            candidates.extend(self.sweep_hits.iter().copied());

            let mut max_t = max_t;
            for hit in &candidates {
                let Some(candidate) = self.collidable(hit.handle) else {
                    continue;
                };
                if hit.t > max_t || !handler.allow_test(candidate) {
                    continue;
                }
                if let Some(child) = hit.child {
                    if !handler.allow_test_child(candidate, child) {
                        continue;
                    }
                }
                if hit.t <= 0.0 {
                    handler.on_hit_at_zero_t(&mut max_t, candidate);
                } else {
                    handler.on_hit(&mut max_t, hit.t, hit.point, hit.normal, candidate);
                }
            }

            pool.give_back(candidates);
        }

        fn body_pose(&self, handle: BodyHandle) -> Option<Pose> {
            self.entries.get(&handle).map(|entry| entry.pose)
        }

        fn body_velocity(&self, handle: BodyHandle) -> Option<BodyVelocity> {
            self.entries.get(&handle).map(|entry| entry.velocity)
        }
    }
}
