use super::backend::{QueryView, RayData, RayHitHandler, SweepHitHandler};
use super::body::{ConvexShape, PhysicsEntity};
use super::collision::CollisionGroup;
use super::dispatcher::ThreadDispatcher;
use super::handle::CollidableRef;
use super::registry::HandleRegistry;
use crate::core::math::{direction_and_length, Pose};
use glam::Vec3;
use std::sync::Arc;

/// Result of a ray cast or shape sweep
#[derive(Debug, Clone, Default)]
pub struct HitResult {
    pub succeeded: bool,
    pub point: Vec3,
    pub normal: Vec3,
    /// Position of the hit along the query, in [0, 1]
    pub hit_fraction: f32,
    pub collider: Option<Arc<PhysicsEntity>>,
}

impl HitResult {
    pub fn miss() -> Self {
        Self::default()
    }
}

fn visible(registry: &HandleRegistry, mask: CollisionGroup, candidate: CollidableRef) -> bool {
    registry.get(candidate).collision_group().overlaps(mask)
}

/// Keeps the earliest ray hit, ties going to the lowest handle
pub struct ClosestRayHandler<'a> {
    registry: &'a HandleRegistry,
    mask: CollisionGroup,
    skip_zero: bool,
    length: f32,
    best_t: f32,
    best: Option<CollidableRef>,
    result: HitResult,
}

impl<'a> ClosestRayHandler<'a> {
    pub fn new(registry: &'a HandleRegistry, mask: CollisionGroup, length: f32, skip_zero: bool) -> Self {
        Self {
            registry,
            mask,
            skip_zero,
            length,
            best_t: f32::MAX,
            best: None,
            result: HitResult::miss(),
        }
    }

    pub fn into_result(self) -> HitResult {
        self.result
    }
}

impl RayHitHandler for ClosestRayHandler<'_> {
    fn allow_test(&self, candidate: CollidableRef) -> bool {
        visible(self.registry, self.mask, candidate)
    }

    fn allow_test_child(&self, candidate: CollidableRef, _child: usize) -> bool {
        visible(self.registry, self.mask, candidate)
    }

    fn on_ray_hit(
        &mut self,
        ray: &RayData,
        max_t: &mut f32,
        t: f32,
        normal: Vec3,
        candidate: CollidableRef,
        _child: usize,
    ) {
        if self.skip_zero && t <= f32::EPSILON {
            return;
        }

        let closer = t < self.best_t
            || (t == self.best_t && self.best.is_some_and(|best| candidate.handle < best.handle));
        if closer {
            self.best_t = t;
            self.best = Some(candidate);
            self.result = HitResult {
                succeeded: true,
                point: ray.origin + ray.direction * t,
                normal,
                hit_fraction: t / self.length,
                collider: Some(self.registry.get(candidate).clone()),
            };
        }

        // Nothing past the earliest hit can win any more
        if t < *max_t {
            *max_t = t;
        }
    }
}

/// Collects every ray hit along the segment, unordered
pub struct AllRayHandler<'a, 'o> {
    registry: &'a HandleRegistry,
    mask: CollisionGroup,
    length: f32,
    output: &'o mut Vec<HitResult>,
}

impl<'a, 'o> AllRayHandler<'a, 'o> {
    pub fn new(
        registry: &'a HandleRegistry,
        mask: CollisionGroup,
        length: f32,
        output: &'o mut Vec<HitResult>,
    ) -> Self {
        Self {
            registry,
            mask,
            length,
            output,
        }
    }
}

impl RayHitHandler for AllRayHandler<'_, '_> {
    fn allow_test(&self, candidate: CollidableRef) -> bool {
        visible(self.registry, self.mask, candidate)
    }

    fn allow_test_child(&self, candidate: CollidableRef, _child: usize) -> bool {
        visible(self.registry, self.mask, candidate)
    }

    fn collects_all(&self) -> bool {
        true
    }

    fn on_ray_hit(
        &mut self,
        ray: &RayData,
        _max_t: &mut f32,
        t: f32,
        normal: Vec3,
        candidate: CollidableRef,
        _child: usize,
    ) {
        self.output.push(HitResult {
            succeeded: true,
            point: ray.origin + ray.direction * t,
            normal,
            hit_fraction: t / self.length,
            collider: Some(self.registry.get(candidate).clone()),
        });
    }
}

/// Keeps the first thing a swept shape touches.
///
/// An overlap at the start pose is reported through its own callback so that
/// `skip_zero` suppresses only those, never an early hit found mid-sweep.
pub struct ClosestSweepHandler<'a> {
    registry: &'a HandleRegistry,
    mask: CollisionGroup,
    skip_zero: bool,
    start: Vec3,
    length: f32,
    best_t: f32,
    best: Option<CollidableRef>,
    result: HitResult,
}

impl<'a> ClosestSweepHandler<'a> {
    pub fn new(
        registry: &'a HandleRegistry,
        mask: CollisionGroup,
        start: Vec3,
        length: f32,
        skip_zero: bool,
    ) -> Self {
        Self {
            registry,
            mask,
            skip_zero,
            start,
            length,
            best_t: f32::MAX,
            best: None,
            result: HitResult::miss(),
        }
    }

    pub fn into_result(self) -> HitResult {
        self.result
    }
}

impl SweepHitHandler for ClosestSweepHandler<'_> {
    fn allow_test(&self, candidate: CollidableRef) -> bool {
        visible(self.registry, self.mask, candidate)
    }

    fn allow_test_child(&self, candidate: CollidableRef, _child: usize) -> bool {
        visible(self.registry, self.mask, candidate)
    }

    fn on_hit(&mut self, max_t: &mut f32, t: f32, point: Vec3, normal: Vec3, candidate: CollidableRef) {
        let closer = t < self.best_t
            || (t == self.best_t && self.best.is_some_and(|best| candidate.handle < best.handle));
        if closer {
            self.best_t = t;
            self.best = Some(candidate);
            self.result = HitResult {
                succeeded: true,
                point,
                normal,
                hit_fraction: t / self.length,
                collider: Some(self.registry.get(candidate).clone()),
            };
        }

        if t < *max_t {
            *max_t = t;
        }
    }

    fn on_hit_at_zero_t(&mut self, max_t: &mut f32, candidate: CollidableRef) {
        if self.skip_zero {
            return;
        }

        let tie_lost = self.best_t == 0.0 && self.best.is_some_and(|best| best.handle < candidate.handle);
        if !tie_lost {
            self.best = Some(candidate);
            self.result = HitResult {
                succeeded: true,
                point: self.start,
                normal: Vec3::ZERO,
                hit_fraction: 0.0,
                collider: Some(self.registry.get(candidate).clone()),
            };
        }
        self.best_t = 0.0;
        *max_t = 0.0;
    }
}

/// Collects every sweep hit, including overlaps at the start pose
pub struct AllSweepHandler<'a, 'o> {
    registry: &'a HandleRegistry,
    mask: CollisionGroup,
    start: Vec3,
    length: f32,
    output: &'o mut Vec<HitResult>,
}

impl<'a, 'o> AllSweepHandler<'a, 'o> {
    pub fn new(
        registry: &'a HandleRegistry,
        mask: CollisionGroup,
        start: Vec3,
        length: f32,
        output: &'o mut Vec<HitResult>,
    ) -> Self {
        Self {
            registry,
            mask,
            start,
            length,
            output,
        }
    }
}

impl SweepHitHandler for AllSweepHandler<'_, '_> {
    fn allow_test(&self, candidate: CollidableRef) -> bool {
        visible(self.registry, self.mask, candidate)
    }

    fn allow_test_child(&self, candidate: CollidableRef, _child: usize) -> bool {
        visible(self.registry, self.mask, candidate)
    }

    fn collects_all(&self) -> bool {
        true
    }

    fn on_hit(&mut self, _max_t: &mut f32, t: f32, point: Vec3, normal: Vec3, candidate: CollidableRef) {
        self.output.push(HitResult {
            succeeded: true,
            point,
            normal,
            hit_fraction: t / self.length,
            collider: Some(self.registry.get(candidate).clone()),
        });
    }

    fn on_hit_at_zero_t(&mut self, _max_t: &mut f32, candidate: CollidableRef) {
        self.output.push(HitResult {
            succeeded: true,
            point: self.start,
            normal: Vec3::ZERO,
            hit_fraction: 0.0,
            collider: Some(self.registry.get(candidate).clone()),
        });
    }
}

/// Normalized direction and length of a `direction * length` segment
fn normalize_segment(direction: Vec3, length: f32) -> Option<(Vec3, f32)> {
    if !length.is_finite() || length <= 0.0 {
        return None;
    }
    direction.try_normalize().map(|dir| (dir, length))
}

/// Ray casts and shape sweeps over a consistent view of the world.
///
/// Borrows the registry and a published world view for the duration of the
/// queries; the caller keeps the registry from changing meanwhile.
pub struct SpatialQueryEngine<'a, V: QueryView + ?Sized> {
    registry: &'a HandleRegistry,
    view: &'a V,
    dispatcher: &'a ThreadDispatcher,
}

impl<'a, V: QueryView + ?Sized> SpatialQueryEngine<'a, V> {
    pub fn new(registry: &'a HandleRegistry, view: &'a V, dispatcher: &'a ThreadDispatcher) -> Self {
        Self {
            registry,
            view,
            dispatcher,
        }
    }

    /// Closest hit on the segment `from -> to`
    pub fn raycast(&self, from: Vec3, to: Vec3, mask: CollisionGroup, skip_zero: bool) -> HitResult {
        match direction_and_length(from, to) {
            Some((direction, length)) => self.raycast_dir(from, direction, length, mask, skip_zero),
            None => HitResult::miss(),
        }
    }

    /// Closest hit along `direction` up to `length`
    pub fn raycast_dir(
        &self,
        origin: Vec3,
        direction: Vec3,
        length: f32,
        mask: CollisionGroup,
        skip_zero: bool,
    ) -> HitResult {
        let Some((direction, length)) = normalize_segment(direction, length) else {
            return HitResult::miss();
        };
        let mut handler = ClosestRayHandler::new(self.registry, mask, length, skip_zero);
        self.view.ray_cast(origin, direction, length, &mut handler);
        handler.into_result()
    }

    /// Every hit on the segment `from -> to`, appended to `output`
    pub fn raycast_penetrating(&self, from: Vec3, to: Vec3, mask: CollisionGroup, output: &mut Vec<HitResult>) {
        if let Some((direction, length)) = direction_and_length(from, to) {
            self.raycast_penetrating_dir(from, direction, length, mask, output);
        }
    }

    pub fn raycast_penetrating_dir(
        &self,
        origin: Vec3,
        direction: Vec3,
        length: f32,
        mask: CollisionGroup,
        output: &mut Vec<HitResult>,
    ) {
        let Some((direction, length)) = normalize_segment(direction, length) else {
            return;
        };
        let mut handler = AllRayHandler::new(self.registry, mask, length, output);
        self.view.ray_cast(origin, direction, length, &mut handler);
    }

    /// First thing `shape` touches moving from `pose` to `end`
    pub fn shape_sweep(
        &self,
        shape: &ConvexShape,
        pose: &Pose,
        end: Vec3,
        mask: CollisionGroup,
        skip_zero: bool,
    ) -> HitResult {
        match direction_and_length(pose.position, end) {
            Some((direction, length)) => self.shape_sweep_dir(shape, pose, direction, length, mask, skip_zero),
            None => HitResult::miss(),
        }
    }

    pub fn shape_sweep_dir(
        &self,
        shape: &ConvexShape,
        pose: &Pose,
        direction: Vec3,
        length: f32,
        mask: CollisionGroup,
        skip_zero: bool,
    ) -> HitResult {
        let Some((direction, length)) = normalize_segment(direction, length) else {
            return HitResult::miss();
        };
        let mut handler = ClosestSweepHandler::new(self.registry, mask, pose.position, length, skip_zero);
        let mut pool = self.dispatcher.lease_pool();
        self.view
            .sweep(shape, pose, direction, length, &mut pool, &mut handler);
        handler.into_result()
    }

    /// Everything `shape` touches moving from `pose` to `end`, appended to `output`
    pub fn shape_sweep_penetrating(
        &self,
        shape: &ConvexShape,
        pose: &Pose,
        end: Vec3,
        mask: CollisionGroup,
        output: &mut Vec<HitResult>,
    ) {
        if let Some((direction, length)) = direction_and_length(pose.position, end) {
            self.shape_sweep_penetrating_dir(shape, pose, direction, length, mask, output);
        }
    }

    pub fn shape_sweep_penetrating_dir(
        &self,
        shape: &ConvexShape,
        pose: &Pose,
        direction: Vec3,
        length: f32,
        mask: CollisionGroup,
        output: &mut Vec<HitResult>,
    ) {
        let Some((direction, length)) = normalize_segment(direction, length) else {
            return;
        };
        let mut handler = AllSweepHandler::new(self.registry, mask, pose.position, length, output);
        let mut pool = self.dispatcher.lease_pool();
        self.view
            .sweep(shape, pose, direction, length, &mut pool, &mut handler);
    }
}
