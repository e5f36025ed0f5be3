use super::backend::{
    NarrowPhaseCallbacks, QueryView, RayData, RayHitHandler, Simulation, StepContext,
    SweepHitHandler,
};
use super::body::{ConvexShape, EntityKind, PhysicsEntity};
use super::collision::ContactManifold;
use super::handle::{BodyHandle, CollidablePair, CollidableRef, IdPool, Mobility};
use super::scratch::ScratchBufferPool;
use crate::core::math::{
    from_isometry, from_point, from_vector, to_isometry, to_point, to_vector, BodyVelocity, Pose,
};
use glam::Vec3;
use rapier3d::parry::bounding_volume::BoundingVolume;
use rapier3d::parry::query::{cast_shapes, ShapeCastOptions, ShapeCastStatus};
use rapier3d::prelude::{
    ActiveHooks, CCDSolver, CoefficientCombineRule, Collider, ColliderBuilder, ColliderHandle,
    ColliderSet,
    ContactModificationContext, DefaultBroadPhase, ImpulseJointSet, IntegrationParameters,
    IslandManager, MultibodyJointSet, NarrowPhase, PairFilterContext, PhysicsHooks,
    PhysicsPipeline, QueryFilter, QueryPipeline, Ray, Real, RigidBody, RigidBodyBuilder,
    RigidBodyHandle,
    RigidBodySet, SharedShape, SolverFlags, Vector,
};
use std::collections::HashMap;

// Collider user data layout: handle in bits 0..32, mobility in 32..40,
// compound child index + 1 in 40..72 (zero for plain convex colliders)
const MOBILITY_SHIFT: u32 = 32;
const CHILD_SHIFT: u32 = 40;

fn encode_tag(collidable: CollidableRef, child: Option<usize>) -> u128 {
    let child = child.map_or(0, |index| index as u128 + 1);
    (collidable.handle.raw() as u32 as u128)
        | ((collidable.mobility as u128) << MOBILITY_SHIFT)
        | (child << CHILD_SHIFT)
}

fn decode_tag(data: u128) -> Option<(CollidableRef, Option<usize>)> {
    let handle = BodyHandle::from_raw(data as u32 as i32)?;
    let mobility = Mobility::from_bits((data >> MOBILITY_SHIFT) as u8)?;
    let child = match (data >> CHILD_SHIFT) as u32 {
        0 => None,
        index => Some(index as usize - 1),
    };
    Some((CollidableRef::new(mobility, handle), child))
}

fn collider_tag(colliders: &ColliderSet, handle: ColliderHandle) -> Option<(CollidableRef, Option<usize>)> {
    colliders.get(handle).and_then(|c| decode_tag(c.user_data))
}

pub(crate) fn shared_shape(shape: &ConvexShape) -> SharedShape {
    match *shape {
        ConvexShape::Ball { radius } => SharedShape::ball(radius),
        ConvexShape::Cuboid { half_extents } => {
            SharedShape::cuboid(half_extents.x, half_extents.y, half_extents.z)
        }
        ConvexShape::CapsuleY {
            half_height,
            radius,
        } => SharedShape::capsule_y(half_height, radius),
        ConvexShape::CylinderY {
            half_height,
            radius,
        } => SharedShape::cylinder(half_height, radius),
    }
}

/// Routes rapier's narrow-phase hooks to the simulation callbacks.
///
/// Rapier runs the narrow phase on the stepping thread, so every callback is
/// issued as worker 0.
struct CallbackHooks<'a> {
    callbacks: &'a dyn NarrowPhaseCallbacks,
}

impl PhysicsHooks for CallbackHooks<'_> {
    fn filter_contact_pair(&self, context: &PairFilterContext) -> Option<SolverFlags> {
        let (a, child_a) = collider_tag(context.colliders, context.collider1)?;
        let (b, child_b) = collider_tag(context.colliders, context.collider2)?;

        if !self.callbacks.allow_contact_generation(0, a, b) {
            return None;
        }
        if child_a.is_some() || child_b.is_some() {
            let pair = CollidablePair { a, b };
            let allowed = self.callbacks.allow_child_contact_generation(
                0,
                pair,
                child_a.unwrap_or(0),
                child_b.unwrap_or(0),
            );
            if !allowed {
                return None;
            }
        }
        Some(SolverFlags::COMPUTE_IMPULSES)
    }

    fn modify_solver_contacts(&self, context: &mut ContactModificationContext) {
        let (Some((a, child_a)), Some((b, child_b))) = (
            collider_tag(context.colliders, context.collider1),
            collider_tag(context.colliders, context.collider2),
        ) else {
            return;
        };

        // Offsets are relative to A's body, or to the collider itself for statics
        let origin = context
            .rigid_body1
            .and_then(|handle| context.bodies.get(handle))
            .map(|body| from_vector(body.translation()))
            .or_else(|| {
                context
                    .colliders
                    .get(context.collider1)
                    .map(|collider| from_vector(collider.translation()))
            })
            .unwrap_or(Vec3::ZERO);
        let offset = context
            .solver_contacts
            .first()
            .map(|contact| from_point(&contact.point) - origin)
            .unwrap_or(Vec3::ZERO);
        let manifold = ContactManifold {
            normal: from_vector(&*context.normal),
            offset,
            count: context.solver_contacts.len(),
        };
        let pair = CollidablePair { a, b };

        let accept = if child_a.is_some() || child_b.is_some() {
            self.callbacks.configure_child_manifold(
                0,
                pair,
                child_a.unwrap_or(0),
                child_b.unwrap_or(0),
                &manifold,
            )
        } else {
            let response = self.callbacks.configure_contact_manifold(0, pair, &manifold);
            for contact in context.solver_contacts.iter_mut() {
                contact.friction = response.material.friction;
            }
            response.accept
        };

        if !accept {
            context.solver_contacts.clear();
        }
    }
}

enum Slot {
    Static(Vec<ColliderHandle>),
    Body(RigidBodyHandle),
}

/// Collision and dynamics world backed by rapier3d.
///
/// Every entity maps to one rapier collider per convex child; dynamic and
/// kinematic entities additionally own a rigid body. Rapier's own gravity and
/// damping are disabled: velocities are integrated through the
/// [`PoseIntegrator`](super::backend::PoseIntegrator) before each timestep.
pub struct PhysicsWorld {
    /// Integration parameters for the physics simulation
    integration_parameters: IntegrationParameters,

    /// Physics pipeline handles collision detection and solving
    physics_pipeline: PhysicsPipeline,

    /// Island manager for sleeping bodies
    island_manager: IslandManager,

    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,

    /// Query pipeline for raycasts and shape casts
    query_pipeline: QueryPipeline,

    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,

    /// Handles shared by statics and bodies
    ids: IdPool,
    slots: HashMap<BodyHandle, Slot>,
}

impl PhysicsWorld {
    pub fn new() -> Self {
        Self {
            integration_parameters: IntegrationParameters::default(),
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            ids: IdPool::new(),
            slots: HashMap::new(),
        }
    }

    fn collider_builders(entity: &PhysicsEntity, collidable: CollidableRef) -> Vec<(Pose, ColliderBuilder)> {
        let children = entity.shape().children();
        let compound = entity.shape().is_compound();
        let count = children.len().max(1) as f32;
        let material = entity.material();

        children
            .iter()
            .enumerate()
            .map(|(index, child)| {
                let mut builder = ColliderBuilder::new(shared_shape(&child.shape))
                    .friction(material.friction)
                    .friction_combine_rule(CoefficientCombineRule::Multiply)
                    .active_hooks(ActiveHooks::FILTER_CONTACT_PAIRS | ActiveHooks::MODIFY_SOLVER_CONTACTS)
                    .user_data(encode_tag(collidable, compound.then_some(index)));
                if let Some(body) = entity.as_dynamic() {
                    if !body.is_kinematic() {
                        builder = builder.mass(body.mass() / count);
                    }
                }
                (child.local_pose, builder)
            })
            .collect()
    }

    fn remove_slot(&mut self, handle: BodyHandle) -> bool {
        let Some(slot) = self.slots.remove(&handle) else {
            return false;
        };
        match slot {
            Slot::Static(colliders) => {
                for collider in colliders {
                    self.collider_set.remove(
                        collider,
                        &mut self.island_manager,
                        &mut self.rigid_body_set,
                        false,
                    );
                }
            }
            Slot::Body(body) => {
                self.rigid_body_set.remove(
                    body,
                    &mut self.island_manager,
                    &mut self.collider_set,
                    &mut self.impulse_joint_set,
                    &mut self.multibody_joint_set,
                    true, // remove attached colliders
                );
            }
        }
        self.ids.release(handle);
        true
    }
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}


impl Simulation for PhysicsWorld {
    type Snapshot = WorldSnapshot;

    fn add_static(&mut self, entity: &PhysicsEntity, pose: Pose) -> BodyHandle {
        let handle = self.ids.take();
        let collidable = CollidableRef::new(Mobility::Static, handle);

        let colliders = Self::collider_builders(entity, collidable)
            .into_iter()
            .map(|(local, builder)| {
                let collider = builder.position(to_isometry(&pose.transform(&local))).build();
                self.collider_set.insert(collider)
            })
            .collect();

        self.slots.insert(handle, Slot::Static(colliders));
        handle
    }

    fn add_body(&mut self, entity: &PhysicsEntity, pose: Pose, velocity: BodyVelocity) -> BodyHandle {
        let handle = self.ids.take();
        let mobility = entity.mobility();
        let collidable = CollidableRef::new(mobility, handle);

        let builder = match entity.kind() {
            EntityKind::Dynamic(body) if !body.is_kinematic() => RigidBodyBuilder::dynamic(),
            _ => RigidBodyBuilder::kinematic_velocity_based(),
        };
        let body = builder
            .position(to_isometry(&pose))
            .linvel(to_vector(velocity.linear))
            .angvel(to_vector(velocity.angular))
            .user_data(encode_tag(collidable, None))
            .build();
        let body_handle = self.rigid_body_set.insert(body);

        for (local, builder) in Self::collider_builders(entity, collidable) {
            let collider = builder.position(to_isometry(&local)).build();
            self.collider_set
                .insert_with_parent(collider, body_handle, &mut self.rigid_body_set);
        }

        self.slots.insert(handle, Slot::Body(body_handle));
        handle
    }

    fn remove_static(&mut self, handle: BodyHandle) -> bool {
        matches!(self.slots.get(&handle), Some(Slot::Static(_))) && self.remove_slot(handle)
    }

    fn remove_body(&mut self, handle: BodyHandle) -> bool {
        matches!(self.slots.get(&handle), Some(Slot::Body(_))) && self.remove_slot(handle)
    }

    fn clear(&mut self) {
        let previous = std::mem::replace(self, Self::new());
        self.integration_parameters = previous.integration_parameters;
    }

    fn flush_topology(&mut self) {
        self.query_pipeline
            .update(&self.rigid_body_set, &self.collider_set);
    }

    fn timestep(&mut self, dt: f32, context: StepContext<'_>) {
        self.integration_parameters.dt = dt;

        let mut awake: Vec<(RigidBodyHandle, CollidableRef, BodyVelocity)> = self
            .rigid_body_set
            .iter()
            .filter(|(_, body)| body.is_dynamic() && !body.is_sleeping())
            .filter_map(|(handle, body)| {
                let (collidable, _) = decode_tag(body.user_data)?;
                let velocity = BodyVelocity::new(from_vector(body.linvel()), from_vector(body.angvel()));
                Some((handle, collidable, velocity))
            })
            .collect();

        context
            .dispatcher
            .for_each_chunk(&mut awake, |_, (_, collidable, velocity)| {
                context.integrator.integrate_velocity(*collidable, velocity, dt);
            });

        for (handle, _, velocity) in &awake {
            if let Some(body) = self.rigid_body_set.get_mut(*handle) {
                body.set_linvel(to_vector(velocity.linear), false);
                body.set_angvel(to_vector(velocity.angular), false);
            }
        }

        let hooks = CallbackHooks {
            callbacks: context.callbacks,
        };
        self.physics_pipeline.step(
            &Vector::zeros(),
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &hooks,
            &(),
        );
    }

    fn snapshot(&self) -> WorldSnapshot {
        let bodies = self
            .slots
            .iter()
            .filter_map(|(handle, slot)| match slot {
                Slot::Body(body) => Some((*handle, *body)),
                Slot::Static(_) => None,
            })
            .collect();

        WorldSnapshot {
            rigid_body_set: self.rigid_body_set.clone(),
            collider_set: self.collider_set.clone(),
            query_pipeline: self.query_pipeline.clone(),
            bodies,
        }
    }

    fn set_body_velocity(&mut self, handle: BodyHandle, velocity: BodyVelocity) -> bool {
        let Some(Slot::Body(body)) = self.slots.get(&handle) else {
            return false;
        };
        match self.rigid_body_set.get_mut(*body) {
            Some(body) => {
                body.set_linvel(to_vector(velocity.linear), true);
                body.set_angvel(to_vector(velocity.angular), true);
                true
            }
            None => false,
        }
    }

    fn static_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Static(_)))
            .count()
    }

    fn body_count(&self) -> usize {
        self.slots.len() - self.static_count()
    }
}

fn ray_admits(handler: &dyn RayHitHandler, collider: &Collider) -> bool {
    decode_tag(collider.user_data).is_some_and(|(candidate, child)| {
        handler.allow_test(candidate)
            && child.map_or(true, |child| handler.allow_test_child(candidate, child))
    })
}

fn sweep_admits(handler: &dyn SweepHitHandler, collider: &Collider) -> bool {
    decode_tag(collider.user_data).is_some_and(|(candidate, child)| {
        handler.allow_test(candidate)
            && child.map_or(true, |child| handler.allow_test_child(candidate, child))
    })
}

fn cast_options(max_t: f32) -> ShapeCastOptions {
    ShapeCastOptions {
        max_time_of_impact: max_t,
        target_distance: 0.0,
        stop_at_penetration: true,
        compute_impact_geometry_on_penetration: false,
    }
}

/// Collision state of a [`PhysicsWorld`] frozen at publication time.
///
/// Owns copies of the rapier sets and the query pipeline, so queries against
/// it never wait on the world that produced it.
#[derive(Clone)]
pub struct WorldSnapshot {
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    query_pipeline: QueryPipeline,
    bodies: HashMap<BodyHandle, RigidBodyHandle>,
}

impl WorldSnapshot {
    fn body(&self, handle: BodyHandle) -> Option<&RigidBody> {
        self.bodies
            .get(&handle)
            .and_then(|body| self.rigid_body_set.get(*body))
    }

    /// Best-first search that hands the nearest admitted collider to the
    /// handler, then searches again without it while the handler still
    /// accepts hits that far out. A handler that rejects a hit (an origin
    /// overlap under skip-zero) leaves `max_t` alone and the search moves on.
    fn closest_ray(&self, ray: &Ray, data: &RayData, mut max_t: f32, handler: &mut dyn RayHitHandler) {
        let mut excluded: Vec<ColliderHandle> = Vec::new();
        loop {
            let found = {
                let gate = &*handler;
                let predicate = |collider: ColliderHandle, target: &Collider| {
                    !excluded.contains(&collider) && ray_admits(gate, target)
                };
                self.query_pipeline.cast_ray_and_get_normal(
                    &self.rigid_body_set,
                    &self.collider_set,
                    ray,
                    max_t,
                    true,
                    QueryFilter::new().predicate(&predicate),
                )
            };
            let Some((collider, intersection)) = found else {
                break;
            };
            let Some((candidate, child)) = collider_tag(&self.collider_set, collider) else {
                break;
            };

            let t = intersection.time_of_impact;
            handler.on_ray_hit(
                data,
                &mut max_t,
                t,
                from_vector(&intersection.normal),
                candidate,
                child.unwrap_or(0),
            );
            if max_t < t {
                break;
            }
            excluded.push(collider);
        }
    }

    fn every_ray_hit(&self, ray: &Ray, data: &RayData, max_t: f32, handler: &mut dyn RayHitHandler) {
        let limit: Real = max_t;
        let mut max_t = max_t;
        self.query_pipeline.intersections_with_ray(
            &self.rigid_body_set,
            &self.collider_set,
            ray,
            limit,
            true,
            QueryFilter::default(),
            |collider, intersection| {
                let t = intersection.time_of_impact;
                let Some((candidate, child)) = collider_tag(&self.collider_set, collider) else {
                    return true;
                };
                if t > max_t || !handler.allow_test(candidate) {
                    return true;
                }
                if let Some(child) = child {
                    if !handler.allow_test_child(candidate, child) {
                        return true;
                    }
                }
                handler.on_ray_hit(
                    data,
                    &mut max_t,
                    t,
                    from_vector(&intersection.normal),
                    candidate,
                    child.unwrap_or(0),
                );
                true
            },
        );
    }

    /// Sweep counterpart of [`WorldSnapshot::closest_ray`]
    fn closest_sweep(
        &self,
        shape: &SharedShape,
        pose: &Pose,
        direction: Vec3,
        mut max_t: f32,
        pool: &mut ScratchBufferPool,
        handler: &mut dyn SweepHitHandler,
    ) {
        let start = to_isometry(pose);
        let velocity = to_vector(direction);
        let mut excluded: Vec<ColliderHandle> = pool.take();
        loop {
            let found = {
                let gate = &*handler;
                let predicate = |collider: ColliderHandle, target: &Collider| {
                    !excluded.contains(&collider) && sweep_admits(gate, target)
                };
                self.query_pipeline.cast_shape(
                    &self.rigid_body_set,
                    &self.collider_set,
                    &start,
                    &velocity,
                    &**shape,
                    cast_options(max_t),
                    QueryFilter::new().predicate(&predicate),
                )
            };
            let Some((collider, hit)) = found else {
                break;
            };
            let Some((candidate, _)) = collider_tag(&self.collider_set, collider) else {
                break;
            };

            // Witness and normal 1 belong to the world collider, in world space
            let t = hit.time_of_impact;
            if matches!(hit.status, ShapeCastStatus::PenetratingOrWithinTargetDist) {
                handler.on_hit_at_zero_t(&mut max_t, candidate);
            } else {
                handler.on_hit(
                    &mut max_t,
                    t,
                    from_point(&hit.witness1),
                    from_vector(&hit.normal1.into_inner()),
                    candidate,
                );
            }
            if max_t < t {
                break;
            }
            excluded.push(collider);
        }
        pool.give_back(excluded);
    }

    fn every_sweep_hit(
        &self,
        shape: &SharedShape,
        pose: &Pose,
        direction: Vec3,
        max_t: f32,
        pool: &mut ScratchBufferPool,
        handler: &mut dyn SweepHitHandler,
    ) {
        let start = to_isometry(pose);
        let end = to_isometry(&Pose::new(pose.position + direction * max_t, pose.orientation));
        let velocity = to_vector(direction);
        let swept = shape.compute_aabb(&start).merged(&shape.compute_aabb(&end));
        let mut candidates: Vec<ColliderHandle> = pool.take();
        self.query_pipeline
            .colliders_with_aabb_intersecting_aabb(&swept, |collider| {
                candidates.push(*collider);
                true
            });

        let mut max_t = max_t;
        for handle in &candidates {
            let Some(collider) = self.collider_set.get(*handle) else {
                continue;
            };
            let Some((candidate, child)) = decode_tag(collider.user_data) else {
                continue;
            };
            if !handler.allow_test(candidate) {
                continue;
            }
            if let Some(child) = child {
                if !handler.allow_test_child(candidate, child) {
                    continue;
                }
            }

            let hit = cast_shapes(
                &start,
                &velocity,
                &**shape,
                collider.position(),
                &Vector::zeros(),
                collider.shape(),
                cast_options(max_t),
            );
            match hit {
                Ok(Some(hit)) if matches!(hit.status, ShapeCastStatus::PenetratingOrWithinTargetDist) => {
                    handler.on_hit_at_zero_t(&mut max_t, candidate);
                }
                Ok(Some(hit)) => {
                    let point = collider.position() * hit.witness2;
                    let normal = collider.position().rotation * hit.normal2.into_inner();
                    handler.on_hit(
                        &mut max_t,
                        hit.time_of_impact,
                        from_point(&point),
                        from_vector(&normal),
                        candidate,
                    );
                }
                Ok(None) => {}
                Err(unsupported) => {
                    log::warn!("Sweep against {:?} skipped: {unsupported:?}", candidate);
                }
            }
        }

        pool.give_back(candidates);
    }
}

impl QueryView for WorldSnapshot {
    fn ray_cast(&self, origin: Vec3, direction: Vec3, max_t: f32, handler: &mut dyn RayHitHandler) {
        let ray = Ray::new(to_point(origin), to_vector(direction));
        let data = RayData { origin, direction };
        if handler.collects_all() {
            self.every_ray_hit(&ray, &data, max_t, handler);
        } else {
            self.closest_ray(&ray, &data, max_t, handler);
        }
    }

    fn sweep(
        &self,
        shape: &ConvexShape,
        pose: &Pose,
        direction: Vec3,
        max_t: f32,
        pool: &mut ScratchBufferPool,
        handler: &mut dyn SweepHitHandler,
    ) {
        let shape = shared_shape(shape);
        if handler.collects_all() {
            self.every_sweep_hit(&shape, pose, direction, max_t, pool, handler);
        } else {
            self.closest_sweep(&shape, pose, direction, max_t, pool, handler);
        }
    }

    fn body_pose(&self, handle: BodyHandle) -> Option<Pose> {
        self.body(handle).map(|body| from_isometry(body.position()))
    }

    fn body_velocity(&self, handle: BodyHandle) -> Option<BodyVelocity> {
        self.body(handle)
            .map(|body| BodyVelocity::new(from_vector(body.linvel()), from_vector(body.angvel())))
    }
}
