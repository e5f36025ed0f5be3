use super::backend::Simulation;
use super::body::{EntityKind, PhysicsEntity};
use super::handle::EntityId;
use super::registry::HandleRegistry;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::Arc;

enum Mutation {
    Add(Arc<PhysicsEntity>),
    Remove(Arc<PhysicsEntity>),
}

/// Counts from one [`WorldMutationQueue::apply_pending`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationStats {
    pub added: usize,
    pub removed: usize,
}

/// Deferred add/remove requests, applied in one batch between steps.
///
/// Requests go through a lock-free channel and may be issued from any thread,
/// including from inside step callbacks. They are folded into an add set and a
/// remove set at apply time, in request order: a remove cancels a pending add
/// and an add cancels a pending remove.
pub struct WorldMutationQueue {
    sender: Sender<Mutation>,
    receiver: Receiver<Mutation>,
}

impl WorldMutationQueue {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    pub fn request_add(&self, entity: Arc<PhysicsEntity>) {
        // The receiver lives in `self`, the channel cannot be disconnected
        let _ = self.sender.send(Mutation::Add(entity));
    }

    pub fn request_remove(&self, entity: Arc<PhysicsEntity>) {
        let _ = self.sender.send(Mutation::Remove(entity));
    }

    /// Requests not yet folded by an apply
    pub fn pending_len(&self) -> usize {
        self.receiver.len()
    }

    /// Drop every queued request without applying it
    pub fn discard_pending(&self) -> usize {
        self.receiver.try_iter().count()
    }

    fn fold(&self) -> (Vec<Arc<PhysicsEntity>>, Vec<Arc<PhysicsEntity>>) {
        let mut to_add: HashMap<EntityId, Arc<PhysicsEntity>> = HashMap::new();
        let mut to_remove: HashMap<EntityId, Arc<PhysicsEntity>> = HashMap::new();

        for mutation in self.receiver.try_iter() {
            match mutation {
                Mutation::Add(entity) => {
                    to_remove.remove(&entity.id());
                    to_add.insert(entity.id(), entity);
                }
                Mutation::Remove(entity) => {
                    to_add.remove(&entity.id());
                    to_remove.insert(entity.id(), entity);
                }
            }
        }

        // Creation order keeps handle assignment reproducible
        let mut adds: Vec<_> = to_add.into_values().collect();
        adds.sort_by_key(|entity| entity.id());
        let mut removes: Vec<_> = to_remove.into_values().collect();
        removes.sort_by_key(|entity| entity.id());
        (adds, removes)
    }

    /// Apply every queued request to the backend and the registry.
    ///
    /// Must run with exclusive access to both, between steps. Adds are applied
    /// before removes; entities already inserted are not added twice and
    /// entities that were never inserted are not removed.
    pub fn apply_pending<B: Simulation + ?Sized>(
        &self,
        registry: &mut HandleRegistry,
        backend: &mut B,
    ) -> MutationStats {
        let (adds, removes) = self.fold();
        let mut stats = MutationStats::default();

        for entity in adds {
            if entity.is_inserted() {
                continue;
            }
            let pose = entity.world_pose();
            let handle = match entity.kind() {
                EntityKind::Static => backend.add_static(&entity, pose),
                EntityKind::Dynamic(body) => backend.add_body(&entity, pose, body.initial_velocity()),
            };
            entity.set_handle(handle);
            registry.insert(handle, entity);
            stats.added += 1;
        }

        for entity in removes {
            let Some(handle) = entity.handle() else {
                continue;
            };
            if entity.is_static() {
                backend.remove_static(handle);
            } else {
                backend.remove_body(handle);
            }
            entity.invalidate_handle();
            registry.remove(handle);
            if let Some(contacts) = entity.contacts() {
                contacts.reset();
            }
            stats.removed += 1;
        }

        if stats != MutationStats::default() {
            backend.flush_topology();
            log::debug!(
                "Applied world mutations: {} added, {} removed",
                stats.added,
                stats.removed
            );
        }
        stats
    }
}

impl Default for WorldMutationQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::physics::backend::testing::ScriptedSimulation;
    use crate::engine::physics::backend::QueryView;
    use crate::engine::physics::body::{presets, ConvexShape, EntityBuilder};
    use crate::engine::physics::collision::ContactRecord;
    use glam::Vec3;

    fn setup() -> (WorldMutationQueue, HandleRegistry, ScriptedSimulation) {
        (WorldMutationQueue::new(), HandleRegistry::new(), ScriptedSimulation::new())
    }

    #[test]
    fn test_add_then_remove_before_apply_cancels() {
        let (queue, mut registry, mut backend) = setup();
        let ball = presets::ball(0.5, Vec3::ZERO);

        queue.request_add(ball.clone());
        queue.request_remove(ball.clone());
        let stats = queue.apply_pending(&mut registry, &mut backend);

        assert_eq!(stats, MutationStats::default());
        assert!(registry.is_empty(), "Cancelled pair must leave the registry untouched");
        assert_eq!(ball.handle(), None);
        assert_eq!(backend.body_count(), 0);
    }

    #[test]
    fn test_remove_then_add_requeues_insertion() {
        let (queue, mut registry, mut backend) = setup();
        let ball = presets::ball(0.5, Vec3::ZERO);

        queue.request_remove(ball.clone());
        queue.request_add(ball.clone());
        queue.apply_pending(&mut registry, &mut backend);

        assert!(ball.is_inserted());
        assert_eq!(registry.body_count(), 1);
    }

    #[test]
    fn test_add_remove_roundtrip_resets_handle() {
        let (queue, mut registry, mut backend) = setup();
        let ground = presets::ground(5.0, 0.0);
        let ball = presets::ball(0.5, Vec3::Y);

        queue.request_add(ground.clone());
        queue.request_add(ball.clone());
        let stats = queue.apply_pending(&mut registry, &mut backend);
        assert_eq!(stats.added, 2);

        let handle = ball.handle().unwrap();
        assert!(registry.contains(handle));
        assert_eq!(backend.static_count(), 1);

        queue.request_remove(ball.clone());
        queue.apply_pending(&mut registry, &mut backend);

        assert!(!registry.contains(handle));
        assert_eq!(ball.handle(), None);
        assert_eq!(backend.body_count(), 0);
        assert_eq!(registry.static_count(), 1);
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let (queue, mut registry, mut backend) = setup();
        let ball = presets::ball(0.5, Vec3::ZERO);

        queue.request_add(ball.clone());
        queue.apply_pending(&mut registry, &mut backend);
        let handle = ball.handle();

        queue.request_add(ball.clone());
        let stats = queue.apply_pending(&mut registry, &mut backend);

        assert_eq!(stats.added, 0);
        assert_eq!(ball.handle(), handle);
        assert_eq!(backend.body_count(), 1);
    }

    #[test]
    fn test_body_pose_seeded_from_world_pose() {
        let (queue, mut registry, mut backend) = setup();
        let ball = presets::ball(0.5, Vec3::new(1.0, 2.0, 3.0));

        queue.request_add(ball.clone());
        queue.apply_pending(&mut registry, &mut backend);

        let pose = backend.body_pose(ball.handle().unwrap()).unwrap();
        assert_eq!(pose.position, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_remove_drains_contacts() {
        let (queue, mut registry, mut backend) = setup();
        let ball = EntityBuilder::new_dynamic(ConvexShape::ball(0.5), 1.0)
            .collect_collisions(4)
            .build();
        queue.request_add(ball.clone());
        queue.apply_pending(&mut registry, &mut backend);

        let recorder = ball.contacts().unwrap();
        let record = ContactRecord {
            a_id: ball.id(),
            b_id: ball.id(),
            a: Arc::downgrade(&ball),
            b: Arc::downgrade(&ball),
            normal: Vec3::Y,
            offset: Vec3::ZERO,
        };
        recorder.try_record(record.clone());
        recorder.process();
        recorder.try_record(record);

        queue.request_remove(ball.clone());
        queue.apply_pending(&mut registry, &mut backend);

        assert_eq!(recorder.pending_len(), 0);
        assert!(recorder.current().is_empty());
    }

    #[test]
    fn test_requests_from_many_threads() {
        let (queue, mut registry, mut backend) = setup();
        let balls: Vec<_> = (0..32).map(|i| presets::ball(0.5, Vec3::X * i as f32)).collect();

        std::thread::scope(|scope| {
            for chunk in balls.chunks(8) {
                let queue = &queue;
                scope.spawn(move || chunk.iter().for_each(|b| queue.request_add(b.clone())));
            }
        });

        assert_eq!(queue.pending_len(), 32);
        queue.apply_pending(&mut registry, &mut backend);
        assert_eq!(registry.body_count(), 32);
    }
}
