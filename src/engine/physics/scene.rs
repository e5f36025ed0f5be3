// Scene collaborator interface: transforms that seed body poses and the
// notifications that drive automatic registration

use super::body::PhysicsEntity;
use glam::{Quat, Vec3};
use std::sync::Arc;

/// World-space transform of the scene entity owning a physics entity
pub trait SceneTransform: Send + Sync {
    fn world_position(&self) -> Vec3;
    fn world_rotation(&self) -> Quat;
}

/// Scene notification forwarded to the simulation
#[derive(Debug, Clone)]
pub enum SceneEvent {
    /// Physics components of a scene entity that just entered the scene
    EntityAdded(Vec<Arc<PhysicsEntity>>),

    /// Physics components of a scene entity that just left the scene
    EntityRemoved(Vec<Arc<PhysicsEntity>>),

    /// A component slot changed; either side may be absent or non-physics
    ComponentChanged {
        previous: Option<Arc<PhysicsEntity>>,
        new: Option<Arc<PhysicsEntity>>,
    },
}

/// Registration requests resulting from a scene event
#[derive(Debug, Default)]
pub struct SceneRequests {
    pub add: Vec<Arc<PhysicsEntity>>,
    pub remove: Vec<Arc<PhysicsEntity>>,
}

impl SceneEvent {
    /// Translate the event into add/remove requests. Only entities flagged for
    /// automatic add are added; removals are always requested.
    pub fn into_requests(self) -> SceneRequests {
        let mut requests = SceneRequests::default();
        match self {
            SceneEvent::EntityAdded(entities) => {
                requests.add = entities.into_iter().filter(|e| e.automatic_add()).collect();
            }
            SceneEvent::EntityRemoved(entities) => {
                requests.remove = entities;
            }
            SceneEvent::ComponentChanged { previous, new } => {
                requests.remove.extend(previous);
                requests.add.extend(new.filter(|e| e.automatic_add()));
            }
        }
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::physics::body::{ConvexShape, EntityBuilder};

    #[test]
    fn test_only_automatic_entities_are_added() {
        let auto = EntityBuilder::new_dynamic(ConvexShape::ball(0.5), 1.0).build();
        let manual = EntityBuilder::new_dynamic(ConvexShape::ball(0.5), 1.0)
            .automatic_add(false)
            .build();

        let requests = SceneEvent::EntityAdded(vec![auto.clone(), manual]).into_requests();
        assert_eq!(requests.add.len(), 1);
        assert_eq!(requests.add[0].id(), auto.id());
        assert!(requests.remove.is_empty());
    }

    #[test]
    fn test_removal_ignores_automatic_flag() {
        let manual = EntityBuilder::new_static(ConvexShape::ball(0.5))
            .automatic_add(false)
            .build();

        let requests = SceneEvent::EntityRemoved(vec![manual]).into_requests();
        assert_eq!(requests.remove.len(), 1);
    }

    #[test]
    fn test_component_swap() {
        let old = EntityBuilder::new_static(ConvexShape::ball(0.5)).build();
        let new = EntityBuilder::new_static(ConvexShape::ball(1.0)).build();

        let requests = SceneEvent::ComponentChanged {
            previous: Some(old.clone()),
            new: Some(new.clone()),
        }
        .into_requests();

        assert_eq!(requests.remove[0].id(), old.id());
        assert_eq!(requests.add[0].id(), new.id());
    }
}
