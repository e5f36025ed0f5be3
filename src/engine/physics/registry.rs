use super::body::PhysicsEntity;
use super::handle::{BodyHandle, CollidableRef};
use std::collections::HashMap;
use std::sync::Arc;

/// Bidirectional lookup between backend handles and the entities that own them.
///
/// Statics and bodies are kept apart. Handles come from a single pool shared by
/// both collections, so a handle is always in at most one of the two maps.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    statics: HashMap<BodyHandle, Arc<PhysicsEntity>>,
    bodies: HashMap<BodyHandle, Arc<PhysicsEntity>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an inserted entity under its backend handle
    pub fn insert(&mut self, handle: BodyHandle, entity: Arc<PhysicsEntity>) {
        let (target, other) = if entity.is_static() {
            (&mut self.statics, &self.bodies)
        } else {
            (&mut self.bodies, &self.statics)
        };
        assert!(
            !other.contains_key(&handle),
            "handle {handle:?} is already registered in the other collection"
        );
        target.insert(handle, entity);
    }

    /// Stop tracking a handle, returning the entity it mapped to
    pub fn remove(&mut self, handle: BodyHandle) -> Option<Arc<PhysicsEntity>> {
        self.bodies
            .remove(&handle)
            .or_else(|| self.statics.remove(&handle))
    }

    /// Entity behind a collidable the backend reported.
    ///
    /// # Panics
    /// If the handle is unknown; that means the registry and the backend have
    /// diverged, which is never recoverable.
    pub fn get(&self, collidable: CollidableRef) -> &Arc<PhysicsEntity> {
        let map = if collidable.mobility.is_body() {
            &self.bodies
        } else {
            &self.statics
        };
        match map.get(&collidable.handle) {
            Some(entity) => entity,
            None => panic!(
                "{:?} {:?} is not registered: registry out of sync with the backend",
                collidable.mobility, collidable.handle
            ),
        }
    }

    pub fn contains(&self, handle: BodyHandle) -> bool {
        self.bodies.contains_key(&handle) || self.statics.contains_key(&handle)
    }

    /// Every inserted dynamic or kinematic body
    pub fn dynamic_entities(&self) -> impl Iterator<Item = &Arc<PhysicsEntity>> {
        self.bodies.values()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn static_count(&self) -> usize {
        self.statics.len()
    }

    pub fn len(&self) -> usize {
        self.bodies.len() + self.statics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty() && self.statics.is_empty()
    }

    /// Remove every entry, returning the entities that were tracked
    pub fn drain(&mut self) -> Vec<Arc<PhysicsEntity>> {
        self.bodies
            .drain()
            .chain(self.statics.drain())
            .map(|(_, entity)| entity)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::physics::body::{presets, ConvexShape, EntityBuilder};
    use crate::engine::physics::handle::Mobility;
    use glam::Vec3;

    #[test]
    fn test_insert_and_lookup_by_mobility() {
        let mut registry = HandleRegistry::new();
        let ground = presets::ground(5.0, 0.0);
        let ball = presets::ball(0.5, Vec3::Y);

        registry.insert(BodyHandle(0), ground.clone());
        registry.insert(BodyHandle(1), ball.clone());

        assert_eq!(registry.static_count(), 1);
        assert_eq!(registry.body_count(), 1);
        let found = registry.get(CollidableRef::new(Mobility::Dynamic, BodyHandle(1)));
        assert_eq!(found.id(), ball.id());
        let found = registry.get(CollidableRef::new(Mobility::Static, BodyHandle(0)));
        assert_eq!(found.id(), ground.id());
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn test_unknown_handle_fails_fast() {
        let registry = HandleRegistry::new();
        registry.get(CollidableRef::new(Mobility::Dynamic, BodyHandle(3)));
    }

    #[test]
    #[should_panic(expected = "other collection")]
    fn test_handle_never_in_both_maps() {
        let mut registry = HandleRegistry::new();
        registry.insert(BodyHandle(0), presets::ground(5.0, 0.0));
        registry.insert(BodyHandle(0), presets::ball(0.5, Vec3::ZERO));
    }

    #[test]
    fn test_remove_and_drain() {
        let mut registry = HandleRegistry::new();
        let kinematic = EntityBuilder::new_kinematic(ConvexShape::ball(1.0)).build();
        registry.insert(BodyHandle(2), kinematic.clone());
        registry.insert(BodyHandle(3), presets::ground(1.0, 0.0));

        let removed = registry.remove(BodyHandle(2)).unwrap();
        assert_eq!(removed.id(), kinematic.id());
        assert!(!registry.contains(BodyHandle(2)));
        assert_eq!(registry.dynamic_entities().count(), 0);

        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }
}
