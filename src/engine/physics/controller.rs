use super::backend::{QueryView, Simulation, StepContext};
use super::body::{ConvexShape, PhysicsEntity};
use super::collision::{CollisionGroup, ContactFilter};
use super::config::SimulationConfig;
use super::dispatcher::ThreadDispatcher;
use super::handle::BodyHandle;
use super::integration::PoseIntegrationPolicy;
use super::mutation::{MutationStats, WorldMutationQueue};
use super::query::{HitResult, SpatialQueryEngine};
use super::registry::HandleRegistry;
use super::scene::SceneEvent;
use super::world::PhysicsWorld;
use super::{PhysicsError, PhysicsResult};
use crate::core::math::{BodyVelocity, Pose};
use crossbeam_channel::{Receiver, Sender};
use glam::Vec3;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle of a [`SimulationController`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Ready,
    Stepping,
    Disposed,
}

const CLEAR_NONE: u8 = 0;
const CLEAR_BODIES: u8 = 1;
const CLEAR_BODIES_AND_BUFFERS: u8 = 2;

type BeforeStepAction = Box<dyn FnOnce(f32) + Send>;

#[derive(Debug)]
struct SimulationState {
    gravity: Vec3,
    time_scale: f32,
    max_sub_steps: u32,
    disabled: bool,
    lifecycle: ControllerState,
}

/// Owns a simulation world and sequences everything done to it.
///
/// Lock discipline: `topology` guards the handle registry, `world` the backend
/// and `snapshot` the query view last published from it. Locks are always
/// taken in that order.
///
/// | operation              | topology | world | snapshot |
/// |------------------------|----------|-------|----------|
/// | apply mutations, clear | write    | lock  | swap     |
/// | step                   | read     | lock  | swap     |
/// | set body velocity      |          | lock  | swap     |
/// | queries, body reads    | read     |       | clone    |
///
/// The registry stays frozen for the whole timestep, which lets narrow-phase
/// callbacks and pose integration read it from worker threads without locking.
/// Queries never touch the live world: they clone the `Arc` of the latest
/// snapshot and run against it while the world keeps stepping. Topology
/// changes publish their snapshot before releasing `topology`, so a query
/// holding the registry always sees a view that matches it.
///
/// Calling [`dispose`](Self::dispose) or a forced [`clear`](Self::clear)
/// from another thread while a step is in flight is the caller's problem: it
/// blocks until the step finishes, then tears the world down under it.
pub struct SimulationController<B: Simulation = PhysicsWorld> {
    topology: RwLock<HandleRegistry>,
    world: Mutex<B>,
    snapshot: RwLock<Arc<B::Snapshot>>,
    mutations: WorldMutationQueue,
    dispatcher: ThreadDispatcher,
    state: Mutex<SimulationState>,
    clear_request: AtomicU8,
    before_step_sender: Sender<BeforeStepAction>,
    before_step_receiver: Receiver<BeforeStepAction>,
}

impl SimulationController<PhysicsWorld> {
    /// Create a controller over a rapier world
    pub fn new(config: &SimulationConfig) -> PhysicsResult<Self> {
        Self::with_backend(PhysicsWorld::new(), config)
    }
}

impl<B: Simulation> SimulationController<B> {
    /// Create a controller over an existing backend
    pub fn with_backend(backend: B, config: &SimulationConfig) -> PhysicsResult<Self> {
        config.validate()?;

        let dispatcher = ThreadDispatcher::new(
            config.resolved_worker_count(),
            config.scratch_block_capacity,
        )?;
        let (before_step_sender, before_step_receiver) = crossbeam_channel::unbounded();

        log::info!(
            "Simulation initialized: {} workers, gravity {:?}, {} sub-step(s)",
            dispatcher.worker_count(),
            config.gravity(),
            config.max_sub_steps
        );

        Ok(Self {
            topology: RwLock::new(HandleRegistry::new()),
            snapshot: RwLock::new(Arc::new(backend.snapshot())),
            world: Mutex::new(backend),
            mutations: WorldMutationQueue::new(),
            dispatcher,
            state: Mutex::new(SimulationState {
                gravity: config.gravity(),
                time_scale: config.time_scale,
                max_sub_steps: config.max_sub_steps,
                disabled: config.disabled,
                lifecycle: ControllerState::Ready,
            }),
            clear_request: AtomicU8::new(CLEAR_NONE),
            before_step_sender,
            before_step_receiver,
        })
    }

    pub fn state(&self) -> ControllerState {
        self.state.lock().lifecycle
    }

    fn is_disposed(&self) -> bool {
        self.state() == ControllerState::Disposed
    }

    pub fn gravity(&self) -> Vec3 {
        self.state.lock().gravity
    }

    pub fn set_gravity(&self, gravity: Vec3) {
        self.state.lock().gravity = gravity;
    }

    pub fn time_scale(&self) -> f32 {
        self.state.lock().time_scale
    }

    pub fn set_time_scale(&self, time_scale: f32) {
        self.state.lock().time_scale = time_scale.max(0.0);
    }

    pub fn max_sub_steps(&self) -> u32 {
        self.state.lock().max_sub_steps
    }

    pub fn set_max_sub_steps(&self, sub_steps: u32) {
        self.state.lock().max_sub_steps = sub_steps.max(1);
    }

    pub fn is_disabled(&self) -> bool {
        self.state.lock().disabled
    }

    /// Disabled controllers ignore [`step`](Self::step)
    pub fn set_disabled(&self, disabled: bool) {
        self.state.lock().disabled = disabled;
    }

    pub fn dispatcher(&self) -> &ThreadDispatcher {
        &self.dispatcher
    }

    /// Queue an entity for insertion at the start of the next step
    pub fn request_add(&self, entity: Arc<PhysicsEntity>) {
        if self.is_disposed() {
            log::warn!("Ignoring add request for {:?}: simulation disposed", entity.id());
            return;
        }
        self.mutations.request_add(entity);
    }

    /// Queue an entity for removal at the start of the next step
    pub fn request_remove(&self, entity: Arc<PhysicsEntity>) {
        if self.is_disposed() {
            log::warn!("Ignoring remove request for {:?}: simulation disposed", entity.id());
            return;
        }
        self.mutations.request_remove(entity);
    }

    /// Run `action` with the scaled delta time at the start of the next step
    pub fn enqueue_before_step<F>(&self, action: F)
    where
        F: FnOnce(f32) + Send + 'static,
    {
        // The receiver lives in `self`, the channel cannot be disconnected
        let _ = self.before_step_sender.send(Box::new(action));
    }

    /// Register or unregister physics entities following a scene change
    pub fn handle_scene_event(&self, event: SceneEvent) {
        let requests = event.into_requests();
        for entity in requests.remove {
            self.request_remove(entity);
        }
        for entity in requests.add {
            self.request_add(entity);
        }
    }

    /// Apply queued mutations now, outside of a step
    pub fn apply_pending(&self) -> MutationStats {
        let mut registry = self.topology.write();
        let mut world = self.world.lock();
        let stats = self.mutations.apply_pending(&mut registry, &mut *world);
        self.publish(&world);
        stats
    }

    /// Replace the query view with the current state of `world`
    fn publish(&self, world: &B) {
        let view = Arc::new(world.snapshot());
        *self.snapshot.write() = view;
    }

    /// Advance the simulation by `dt` seconds of game time.
    ///
    /// Consumes a deferred clear, runs before-step actions, applies queued
    /// mutations, then runs `max_sub_steps` backend timesteps covering
    /// `dt * time_scale`. No-op while disabled or disposed.
    pub fn step(&self, dt: f32) {
        let time_scale = {
            let mut state = self.state.lock();
            if state.disabled || state.lifecycle == ControllerState::Disposed {
                return;
            }
            state.lifecycle = ControllerState::Stepping;
            state.time_scale
        };
        let scaled_dt = dt * time_scale;

        match self.clear_request.swap(CLEAR_NONE, Ordering::AcqRel) {
            CLEAR_BODIES => self.force_clear(false),
            CLEAR_BODIES_AND_BUFFERS => self.force_clear(true),
            _ => {}
        }

        for action in self.before_step_receiver.try_iter() {
            action(scaled_dt);
        }

        self.apply_pending();

        let (gravity, sub_steps) = {
            let state = self.state.lock();
            (state.gravity, state.max_sub_steps.max(1))
        };
        let sub_dt = scaled_dt / sub_steps as f32;

        if sub_dt > 0.0 {
            let registry = self.topology.read();
            let mut world = self.world.lock();
            let filter = ContactFilter::new(&registry);
            let integrator = PoseIntegrationPolicy::new(&registry, gravity);
            let context = StepContext {
                callbacks: &filter,
                integrator: &integrator,
                dispatcher: &self.dispatcher,
            };
            for _ in 0..sub_steps {
                world.timestep(sub_dt, context);
                self.publish(&world);
            }
        }

        let mut state = self.state.lock();
        if state.lifecycle == ControllerState::Stepping {
            state.lifecycle = ControllerState::Ready;
        }
    }

    /// Empty the world.
    ///
    /// With `force_now` the world is cleared immediately and every inserted
    /// entity gets its handle invalidated; `clear_buffers` additionally releases
    /// all scratch memory. Otherwise the request is recorded and carried out at
    /// the start of the next step.
    pub fn clear(&self, clear_buffers: bool, force_now: bool) {
        if force_now {
            self.clear_request.store(CLEAR_NONE, Ordering::Release);
            self.force_clear(clear_buffers);
        } else {
            let request = if clear_buffers {
                CLEAR_BODIES_AND_BUFFERS
            } else {
                CLEAR_BODIES
            };
            self.clear_request.fetch_max(request, Ordering::AcqRel);
        }
    }

    fn force_clear(&self, clear_buffers: bool) {
        let mut registry = self.topology.write();
        let mut world = self.world.lock();

        world.clear();
        self.publish(&world);
        if clear_buffers {
            self.dispatcher.clear_pools();
        }

        let entities = registry.drain();
        for entity in &entities {
            entity.invalidate_handle();
            if let Some(contacts) = entity.contacts() {
                contacts.reset();
            }
        }
        log::info!(
            "Simulation cleared: {} entities removed{}",
            entities.len(),
            if clear_buffers { ", scratch buffers released" } else { "" }
        );
    }

    /// Tear the simulation down; later steps and requests are ignored
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        self.force_clear(true);
        let dropped = self.mutations.discard_pending() + self.before_step_receiver.try_iter().count();
        self.state.lock().lifecycle = ControllerState::Disposed;
        log::info!("Simulation disposed ({dropped} pending requests dropped)");
    }

    fn body_handle(&self, entity: &PhysicsEntity) -> PhysicsResult<BodyHandle> {
        if self.is_disposed() {
            return Err(PhysicsError::Disposed);
        }
        if entity.is_static() {
            return Err(PhysicsError::NotABody(entity.id()));
        }
        entity.handle().ok_or(PhysicsError::NotInserted(entity.id()))
    }

    /// Pose of an inserted body as of the last published step
    pub fn body_pose(&self, entity: &PhysicsEntity) -> PhysicsResult<Pose> {
        let handle = self.body_handle(entity)?;
        self.snapshot
            .read()
            .body_pose(handle)
            .ok_or(PhysicsError::NotInserted(entity.id()))
    }

    pub fn body_velocity(&self, entity: &PhysicsEntity) -> PhysicsResult<BodyVelocity> {
        let handle = self.body_handle(entity)?;
        self.snapshot
            .read()
            .body_velocity(handle)
            .ok_or(PhysicsError::NotInserted(entity.id()))
    }

    /// Waits for a running step to finish
    pub fn set_body_velocity(&self, entity: &PhysicsEntity, velocity: BodyVelocity) -> PhysicsResult<()> {
        let handle = self.body_handle(entity)?;
        let mut world = self.world.lock();
        if !world.set_body_velocity(handle, velocity) {
            return Err(PhysicsError::NotInserted(entity.id()));
        }
        self.publish(&world);
        Ok(())
    }

    /// Snapshot of every inserted dynamic or kinematic body
    pub fn dynamic_entities(&self) -> Vec<Arc<PhysicsEntity>> {
        self.topology.read().dynamic_entities().cloned().collect()
    }

    pub fn body_count(&self) -> usize {
        self.topology.read().body_count()
    }

    pub fn static_count(&self) -> usize {
        self.topology.read().static_count()
    }

    /// Move pending contacts of every body into its current contact list
    pub fn process_contacts(&self) -> usize {
        self.topology
            .read()
            .dynamic_entities()
            .filter_map(|entity| entity.contacts())
            .map(|contacts| contacts.process())
            .sum()
    }

    fn with_queries<R>(&self, query: impl FnOnce(&SpatialQueryEngine<'_, B::Snapshot>) -> R) -> R {
        let registry = self.topology.read();
        let view = Arc::clone(&self.snapshot.read());
        query(&SpatialQueryEngine::new(&registry, &*view, &self.dispatcher))
    }

    /// Closest hit on the segment `from -> to` among entities in `mask`
    pub fn raycast(&self, from: Vec3, to: Vec3, mask: CollisionGroup, skip_zero: bool) -> HitResult {
        self.with_queries(|engine| engine.raycast(from, to, mask, skip_zero))
    }

    pub fn raycast_dir(
        &self,
        origin: Vec3,
        direction: Vec3,
        length: f32,
        mask: CollisionGroup,
        skip_zero: bool,
    ) -> HitResult {
        self.with_queries(|engine| engine.raycast_dir(origin, direction, length, mask, skip_zero))
    }

    /// Every hit on the segment `from -> to`, appended to `output` unordered
    pub fn raycast_penetrating(&self, from: Vec3, to: Vec3, mask: CollisionGroup, output: &mut Vec<HitResult>) {
        self.with_queries(|engine| engine.raycast_penetrating(from, to, mask, output));
    }

    pub fn raycast_penetrating_dir(
        &self,
        origin: Vec3,
        direction: Vec3,
        length: f32,
        mask: CollisionGroup,
        output: &mut Vec<HitResult>,
    ) {
        self.with_queries(|engine| engine.raycast_penetrating_dir(origin, direction, length, mask, output));
    }

    /// First hit of `shape` moving from `pose` to `end`
    pub fn shape_sweep(
        &self,
        shape: &ConvexShape,
        pose: &Pose,
        end: Vec3,
        mask: CollisionGroup,
        skip_zero: bool,
    ) -> HitResult {
        self.with_queries(|engine| engine.shape_sweep(shape, pose, end, mask, skip_zero))
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
        self.with_queries(|engine| engine.shape_sweep_dir(shape, pose, direction, length, mask, skip_zero))
    }

    /// Every hit of `shape` moving from `pose` to `end`, including overlaps at the start
    pub fn shape_sweep_penetrating(
        &self,
        shape: &ConvexShape,
        pose: &Pose,
        end: Vec3,
        mask: CollisionGroup,
        output: &mut Vec<HitResult>,
    ) {
        self.with_queries(|engine| engine.shape_sweep_penetrating(shape, pose, end, mask, output));
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
        self.with_queries(|engine| {
            engine.shape_sweep_penetrating_dir(shape, pose, direction, length, mask, output)
        });
    }
}
