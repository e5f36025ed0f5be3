use super::backend::NarrowPhaseCallbacks;
use super::body::{Material, PhysicsEntity, SpringSettings};
use super::handle::{CollidablePair, CollidableRef, EntityId, Mobility};
use super::registry::HandleRegistry;
use crossbeam_channel::{Receiver, Sender};
use glam::Vec3;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

bitflags::bitflags! {
    /// Collision groups for filtering what entities can touch or be hit by queries
    ///
    /// An entity belongs to its `collision_group` and generates contacts with
    /// anything whose group intersects its `can_collide_with` mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CollisionGroup: u32 {
        /// Default group - interacts with everything
        const DEFAULT = 0b0000_0001;
        /// Static world geometry
        const STATIC = 0b0000_0010;
        /// Kinematic movers
        const KINEMATIC = 0b0000_0100;
        /// Small loose objects
        const DEBRIS = 0b0000_1000;
        /// Trigger volumes
        const SENSOR = 0b0001_0000;
        /// Player and NPC characters
        const CHARACTER = 0b0010_0000;
        const CUSTOM1 = 0b0100_0000;
        const CUSTOM2 = 0b1000_0000;
        const CUSTOM3 = 0b0001_0000_0000;
        const CUSTOM4 = 0b0010_0000_0000;
        /// Every group, including bits without a name
        const ALL = u32::MAX;
    }
}

impl CollisionGroup {
    /// True if the two masks share at least one bit
    pub fn overlaps(self, other: CollisionGroup) -> bool {
        (self.bits() & other.bits()) != 0
    }
}

/// Contact discovered during a step, as seen by the recording entity
#[derive(Debug, Clone)]
pub struct ContactRecord {
    pub a_id: EntityId,
    pub b_id: EntityId,
    pub a: Weak<PhysicsEntity>,
    pub b: Weak<PhysicsEntity>,
    /// World-space contact normal pointing from A to B
    pub normal: Vec3,
    /// Offset from A's position to the contact point
    pub offset: Vec3,
}

impl ContactRecord {
    /// The entity on the other side of this contact from `me`
    pub fn other(&self, me: EntityId) -> Option<Arc<PhysicsEntity>> {
        if me == self.a_id {
            self.b.upgrade()
        } else {
            self.a.upgrade()
        }
    }
}

/// Contact geometry reported by the backend for one pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactManifold {
    pub normal: Vec3,
    pub offset: Vec3,
    /// Number of contact points; empty manifolds are never recorded
    pub count: usize,
}

/// Combined material of a contact pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairMaterial {
    pub friction: f32,
    pub max_recovery_velocity: f32,
    pub spring: SpringSettings,
}

impl PairMaterial {
    /// Friction multiplies, recovery velocity and springs average
    pub fn combine(a: &Material, b: &Material) -> Self {
        Self {
            friction: a.friction * b.friction,
            max_recovery_velocity: (a.max_recovery_velocity + b.max_recovery_velocity) * 0.5,
            spring: SpringSettings {
                angular_frequency: (a.spring.angular_frequency + b.spring.angular_frequency) * 0.5,
                twice_damping_ratio: (a.spring.twice_damping_ratio
                    + b.spring.twice_damping_ratio)
                    * 0.5,
            },
        }
    }
}

/// Answer to a manifold configuration callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManifoldResponse {
    /// Whether a constraint is generated for the manifold
    pub accept: bool,
    pub material: PairMaterial,
}

/// Bounded queue of contacts collected for one dynamic body
///
/// Narrow-phase workers push records while the step runs; the owning entity
/// drains them afterwards with [`ContactRecorder::process`]. Once the queue
/// holds `capacity` records, further contacts are dropped until it is drained.
#[derive(Debug)]
pub struct ContactRecorder {
    collect: AtomicBool,
    capacity: usize,
    sender: Sender<ContactRecord>,
    receiver: Receiver<ContactRecord>,
    current: Mutex<Vec<ContactRecord>>,
}

impl ContactRecorder {
    pub fn new(collect: bool, capacity: usize) -> Self {
        // A zero-capacity crossbeam channel is a rendezvous channel, keep one slot
        // and gate on `capacity` instead
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        Self {
            collect: AtomicBool::new(collect),
            capacity,
            sender,
            receiver,
            current: Mutex::new(Vec::new()),
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.collect.load(Ordering::Relaxed)
    }

    pub fn set_collecting(&self, collect: bool) {
        self.collect.store(collect, Ordering::Relaxed);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records waiting to be processed
    pub fn pending_len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether a new record would currently be accepted
    pub fn has_room(&self) -> bool {
        self.is_collecting() && self.receiver.len() < self.capacity
    }

    /// Queue a record, returning false if it was dropped
    pub fn try_record(&self, record: ContactRecord) -> bool {
        if !self.has_room() {
            return false;
        }
        self.sender.try_send(record).is_ok()
    }

    /// Move every pending record into the current contact list, replacing its
    /// previous content. Returns the number of records moved.
    pub fn process(&self) -> usize {
        let mut current = self.current.lock();
        current.clear();
        current.extend(self.receiver.try_iter());
        current.len()
    }

    /// Contacts from the last [`ContactRecorder::process`]
    pub fn current(&self) -> Vec<ContactRecord> {
        self.current.lock().clone()
    }

    /// Discard pending records without processing them
    pub fn drain_pending(&self) -> usize {
        self.receiver.try_iter().count()
    }

    /// Discard pending records and the current contact list
    pub fn reset(&self) {
        self.drain_pending();
        self.current.lock().clear();
    }
}

/// Narrow-phase filtering and contact recording over the handle registry.
///
/// Runs on backend worker threads during a step. It only reads the registry,
/// which cannot change while a step holds the topology read lock, and writes
/// into the per-body contact queues.
pub struct ContactFilter<'a> {
    registry: &'a HandleRegistry,
}

impl<'a> ContactFilter<'a> {
    pub fn new(registry: &'a HandleRegistry) -> Self {
        Self { registry }
    }

    fn can_collide(&self, a: CollidableRef, b: CollidableRef) -> bool {
        let a = self.registry.get(a);
        let b = self.registry.get(b);
        a.collision_group().overlaps(b.can_collide_with())
    }

    fn record_contact(&self, a: &Arc<PhysicsEntity>, b: &Arc<PhysicsEntity>, manifold: &ContactManifold) {
        if manifold.count == 0 {
            return;
        }

        let a_recorder = a.contacts().filter(|c| c.has_room());
        let b_recorder = b.contacts().filter(|c| c.has_room());
        if a_recorder.is_none() && b_recorder.is_none() {
            return;
        }

        let record = ContactRecord {
            a_id: a.id(),
            b_id: b.id(),
            a: Arc::downgrade(a),
            b: Arc::downgrade(b),
            normal: manifold.normal,
            offset: manifold.offset,
        };
        if let Some(recorder) = a_recorder {
            recorder.try_record(record.clone());
        }
        if let Some(recorder) = b_recorder {
            recorder.try_record(record);
        }
    }

    /// Mask check, record, then decide whether the manifold constrains motion
    fn accept_manifold(&self, pair: CollidablePair, manifold: &ContactManifold) -> bool {
        let a = self.registry.get(pair.a);
        let b = self.registry.get(pair.b);
        if !a.can_collide_with().overlaps(b.collision_group()) {
            return false;
        }
        self.record_contact(a, b, manifold);
        !a.is_ghost() && !b.is_ghost()
    }
}

impl NarrowPhaseCallbacks for ContactFilter<'_> {
    fn allow_contact_generation(&self, _worker: usize, a: CollidableRef, b: CollidableRef) -> bool {
        // Kinematic-kinematic and anything-static pairs can never produce a constraint
        (a.mobility == Mobility::Dynamic || b.mobility == Mobility::Dynamic) && self.can_collide(a, b)
    }

    fn allow_child_contact_generation(
        &self,
        _worker: usize,
        pair: CollidablePair,
        _child_a: usize,
        _child_b: usize,
    ) -> bool {
        self.can_collide(pair.a, pair.b)
    }

    fn configure_contact_manifold(
        &self,
        _worker: usize,
        pair: CollidablePair,
        manifold: &ContactManifold,
    ) -> ManifoldResponse {
        let material = PairMaterial::combine(
            &self.registry.get(pair.a).material(),
            &self.registry.get(pair.b).material(),
        );
        ManifoldResponse {
            accept: self.accept_manifold(pair, manifold),
            material,
        }
    }

    fn configure_child_manifold(
        &self,
        _worker: usize,
        pair: CollidablePair,
        _child_a: usize,
        _child_b: usize,
        manifold: &ContactManifold,
    ) -> bool {
        self.accept_manifold(pair, manifold)
    }
}
