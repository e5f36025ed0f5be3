use super::collision::{CollisionGroup, ContactRecorder};
use super::handle::{BodyHandle, EntityId, Mobility};
use super::scene::SceneTransform;
use crate::core::math::{BodyVelocity, Pose};
use glam::{Quat, Vec3};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};

/// Convex shapes usable as colliders, compound children and sweep shapes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConvexShape {
    /// Sphere (meters)
    Ball { radius: f32 },

    /// Box with given half-extents (meters)
    Cuboid { half_extents: Vec3 },

    /// Y-aligned capsule (meters)
    CapsuleY { half_height: f32, radius: f32 },

    /// Y-aligned cylinder (meters)
    CylinderY { half_height: f32, radius: f32 },
}

impl ConvexShape {
    pub fn ball(radius: f32) -> Self {
        ConvexShape::Ball { radius }
    }

    pub fn cuboid(hx: f32, hy: f32, hz: f32) -> Self {
        ConvexShape::Cuboid {
            half_extents: Vec3::new(hx, hy, hz),
        }
    }

    pub fn capsule_y(half_height: f32, radius: f32) -> Self {
        ConvexShape::CapsuleY {
            half_height,
            radius,
        }
    }

    pub fn cylinder_y(half_height: f32, radius: f32) -> Self {
        ConvexShape::CylinderY {
            half_height,
            radius,
        }
    }
}

/// Convex child of a compound collider, placed in the parent's local frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompoundChild {
    pub local_pose: Pose,
    pub shape: ConvexShape,
}

/// Collision geometry of an entity
#[derive(Debug, Clone, PartialEq)]
pub enum ColliderShape {
    Convex(ConvexShape),
    Compound(Vec<CompoundChild>),
}

impl ColliderShape {
    pub fn is_compound(&self) -> bool {
        matches!(self, ColliderShape::Compound(_))
    }

    /// Children in local space; a convex shape is its own single child
    pub fn children(&self) -> Vec<CompoundChild> {
        match self {
            ColliderShape::Convex(shape) => vec![CompoundChild {
                local_pose: Pose::IDENTITY,
                shape: *shape,
            }],
            ColliderShape::Compound(children) => children.clone(),
        }
    }
}

impl From<ConvexShape> for ColliderShape {
    fn from(shape: ConvexShape) -> Self {
        ColliderShape::Convex(shape)
    }
}

/// Contact spring parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpringSettings {
    pub angular_frequency: f32,
    pub twice_damping_ratio: f32,
}

impl Default for SpringSettings {
    fn default() -> Self {
        Self {
            angular_frequency: 30.0,
            twice_damping_ratio: 1.0,
        }
    }
}

/// Surface material of a single entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub friction: f32,
    pub max_recovery_velocity: f32,
    pub spring: SpringSettings,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            friction: 0.5,
            max_recovery_velocity: 2.0,
            spring: SpringSettings::default(),
        }
    }
}

bitflags::bitflags! {
    /// Per-entity behavior flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntityFlags: u8 {
        /// Detects and records contacts but never constrains motion
        const GHOST = 0b0000_0001;
        /// Registered automatically when its scene entity enters the scene
        const AUTOMATIC_ADD = 0b0000_0010;
    }
}

/// Velocity integration settings of a dynamic body
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionSettings {
    /// Replaces the simulation gravity for this body when set
    pub gravity_override: Option<Vec3>,
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// Linear speed cap; zero or negative disables the cap
    pub max_speed: f32,
}

/// Payload of a simulated body
#[derive(Debug)]
pub struct DynamicBody {
    mass: f32,
    initial_velocity: BodyVelocity,
    motion: RwLock<MotionSettings>,
    contacts: ContactRecorder,
}

impl DynamicBody {
    /// Mass in kilograms; zero means kinematic
    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn inverse_mass(&self) -> f32 {
        if self.mass > 0.0 {
            1.0 / self.mass
        } else {
            0.0
        }
    }

    /// Kinematic bodies have infinite mass and are never accelerated
    pub fn is_kinematic(&self) -> bool {
        self.mass <= 0.0
    }

    pub fn initial_velocity(&self) -> BodyVelocity {
        self.initial_velocity
    }

    /// Snapshot of the current integration settings
    pub fn motion(&self) -> MotionSettings {
        *self.motion.read()
    }

    /// Replace the integration settings; takes effect on the next sub-step
    pub fn set_motion(&self, motion: MotionSettings) {
        *self.motion.write() = motion;
    }

    pub fn contacts(&self) -> &ContactRecorder {
        &self.contacts
    }
}

/// Variant-specific part of an entity
#[derive(Debug)]
pub enum EntityKind {
    Static,
    Dynamic(DynamicBody),
}

/// A collidable participant in the simulation.
///
/// Shared as `Arc<PhysicsEntity>` between the scene, the mutation queue and the
/// handle registry. Its handle is -1 while it is not inserted in the backend.
pub struct PhysicsEntity {
    id: EntityId,
    kind: EntityKind,
    shape: ColliderShape,
    collision_group: CollisionGroup,
    can_collide_with: CollisionGroup,
    material: Material,
    flags: EntityFlags,
    initial_pose: Pose,
    handle: AtomicI32,
    scene: Option<Weak<dyn SceneTransform>>,
}

impl PhysicsEntity {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub fn as_dynamic(&self) -> Option<&DynamicBody> {
        match &self.kind {
            EntityKind::Dynamic(body) => Some(body),
            EntityKind::Static => None,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self.kind, EntityKind::Static)
    }

    pub fn mobility(&self) -> Mobility {
        match &self.kind {
            EntityKind::Static => Mobility::Static,
            EntityKind::Dynamic(body) if body.is_kinematic() => Mobility::Kinematic,
            EntityKind::Dynamic(_) => Mobility::Dynamic,
        }
    }

    pub fn shape(&self) -> &ColliderShape {
        &self.shape
    }

    pub fn collision_group(&self) -> CollisionGroup {
        self.collision_group
    }

    pub fn can_collide_with(&self) -> CollisionGroup {
        self.can_collide_with
    }

    pub fn material(&self) -> Material {
        self.material
    }

    pub fn flags(&self) -> EntityFlags {
        self.flags
    }

    pub fn is_ghost(&self) -> bool {
        self.flags.contains(EntityFlags::GHOST)
    }

    pub fn automatic_add(&self) -> bool {
        self.flags.contains(EntityFlags::AUTOMATIC_ADD)
    }

    /// Backend handle, or `None` while not inserted
    pub fn handle(&self) -> Option<BodyHandle> {
        BodyHandle::from_raw(self.handle.load(Ordering::Acquire))
    }

    pub fn is_inserted(&self) -> bool {
        self.handle().is_some()
    }

    pub(crate) fn set_handle(&self, handle: BodyHandle) {
        self.handle.store(handle.raw(), Ordering::Release);
    }

    pub(crate) fn invalidate_handle(&self) {
        self.handle.store(BodyHandle::INVALID_RAW, Ordering::Release);
    }

    /// Pose used when the entity is inserted: the owning scene entity's world
    /// transform if it is still alive, otherwise the builder's pose
    pub fn world_pose(&self) -> Pose {
        match self.scene.as_ref().and_then(Weak::upgrade) {
            Some(scene) => Pose::new(scene.world_position(), scene.world_rotation()),
            None => self.initial_pose,
        }
    }

    /// Contact recorder of a dynamic body
    pub fn contacts(&self) -> Option<&ContactRecorder> {
        self.as_dynamic().map(DynamicBody::contacts)
    }
}

impl std::fmt::Debug for PhysicsEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsEntity")
            .field("id", &self.id)
            .field("mobility", &self.mobility())
            .field("handle", &self.handle())
            .field("collision_group", &self.collision_group)
            .finish()
    }
}

/// Builder for creating physics entities with common configurations
pub struct EntityBuilder {
    shape: ColliderShape,
    mass: Option<f32>,
    pose: Pose,
    velocity: BodyVelocity,
    collision_group: CollisionGroup,
    can_collide_with: CollisionGroup,
    material: Material,
    flags: EntityFlags,
    motion: MotionSettings,
    collect_collisions: bool,
    max_contacts: usize,
    scene: Option<Weak<dyn SceneTransform>>,
}

impl EntityBuilder {
    fn new(shape: ColliderShape, mass: Option<f32>) -> Self {
        Self {
            shape,
            mass,
            pose: Pose::IDENTITY,
            velocity: BodyVelocity::default(),
            collision_group: CollisionGroup::DEFAULT,
            can_collide_with: CollisionGroup::ALL,
            material: Material::default(),
            flags: EntityFlags::AUTOMATIC_ADD,
            motion: MotionSettings::default(),
            collect_collisions: false,
            max_contacts: 32,
            scene: None,
        }
    }

    /// Create a static collider (never moves)
    pub fn new_static(shape: impl Into<ColliderShape>) -> Self {
        Self::new(shape.into(), None)
    }

    /// Create a dynamic body (affected by gravity and contacts)
    pub fn new_dynamic(shape: impl Into<ColliderShape>, mass: f32) -> Self {
        Self::new(shape.into(), Some(mass.max(0.0)))
    }

    /// Create a kinematic body (moves by velocity only, infinite mass)
    pub fn new_kinematic(shape: impl Into<ColliderShape>) -> Self {
        Self::new(shape.into(), Some(0.0))
    }

    /// Set the pose used when no scene entity provides one
    pub fn pose(mut self, pose: Pose) -> Self {
        self.pose = pose;
        self
    }

    pub fn position(mut self, x: f32, y: f32, z: f32) -> Self {
        self.pose.position = Vec3::new(x, y, z);
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.pose.orientation = rotation;
        self
    }

    /// Set the initial velocity of a dynamic body
    pub fn velocity(mut self, velocity: BodyVelocity) -> Self {
        self.velocity = velocity;
        self
    }

    /// Set which groups this entity belongs to
    pub fn collision_group(mut self, group: CollisionGroup) -> Self {
        self.collision_group = group;
        self
    }

    /// Set which groups this entity generates contacts with
    pub fn can_collide_with(mut self, mask: CollisionGroup) -> Self {
        self.can_collide_with = mask;
        self
    }

    pub fn material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn friction(mut self, friction: f32) -> Self {
        self.material.friction = friction;
        self
    }

    /// Make this a ghost (records contacts, no physical response)
    pub fn ghost(mut self, ghost: bool) -> Self {
        self.flags.set(EntityFlags::GHOST, ghost);
        self
    }

    /// Whether scene notifications register this entity automatically
    pub fn automatic_add(mut self, automatic: bool) -> Self {
        self.flags.set(EntityFlags::AUTOMATIC_ADD, automatic);
        self
    }

    pub fn gravity_override(mut self, gravity: Vec3) -> Self {
        self.motion.gravity_override = Some(gravity);
        self
    }

    pub fn damping(mut self, linear: f32, angular: f32) -> Self {
        self.motion.linear_damping = linear;
        self.motion.angular_damping = angular;
        self
    }

    pub fn max_speed(mut self, max_speed: f32) -> Self {
        self.motion.max_speed = max_speed;
        self
    }

    /// Record contacts into a queue holding at most `max_contacts` records
    pub fn collect_collisions(mut self, max_contacts: usize) -> Self {
        self.collect_collisions = true;
        self.max_contacts = max_contacts;
        self
    }

    /// Attach the scene entity that owns this physics entity
    pub fn scene_entity(mut self, scene: &Arc<dyn SceneTransform>) -> Self {
        self.scene = Some(Arc::downgrade(scene));
        self
    }

    /// Build the entity
    pub fn build(self) -> Arc<PhysicsEntity> {
        let kind = match self.mass {
            None => EntityKind::Static,
            Some(mass) => EntityKind::Dynamic(DynamicBody {
                mass,
                initial_velocity: self.velocity,
                motion: RwLock::new(self.motion),
                contacts: ContactRecorder::new(self.collect_collisions, self.max_contacts),
            }),
        };

        Arc::new(PhysicsEntity {
            id: EntityId::next(),
            kind,
            shape: self.shape,
            collision_group: self.collision_group,
            can_collide_with: self.can_collide_with,
            material: self.material,
            flags: self.flags,
            initial_pose: self.pose,
            handle: AtomicI32::new(BodyHandle::INVALID_RAW),
            scene: self.scene,
        })
    }
}

/// Common entity configurations
pub mod presets {
    use super::*;

    /// Flat static ground box whose top face sits at `top_y`
    pub fn ground(half_size: f32, top_y: f32) -> Arc<PhysicsEntity> {
        EntityBuilder::new_static(ConvexShape::cuboid(half_size, 0.5, half_size))
            .position(0.0, top_y - 0.5, 0.0)
            .collision_group(CollisionGroup::STATIC)
            .build()
    }

    /// Unit-mass ball at a position
    pub fn ball(radius: f32, position: Vec3) -> Arc<PhysicsEntity> {
        EntityBuilder::new_dynamic(ConvexShape::ball(radius), 1.0)
            .pose(Pose::from_position(position))
            .build()
    }

    /// Ghost trigger volume that records contacts of dynamic bodies
    pub fn trigger(half_extents: Vec3, position: Vec3) -> Arc<PhysicsEntity> {
        EntityBuilder::new_kinematic(ConvexShape::Cuboid { half_extents })
            .pose(Pose::from_position(position))
            .collision_group(CollisionGroup::SENSOR)
            .ghost(true)
            .collect_collisions(64)
            .build()
    }
}
