use super::backend::PoseIntegrator;
use super::body::MotionSettings;
use super::handle::CollidableRef;
use super::registry::HandleRegistry;
use crate::core::math::BodyVelocity;
use glam::Vec3;

/// Apply gravity, damping and the speed cap to one body's velocity.
///
/// Damping is a first-order decay `v -= v * dt * damping`, not an exponential;
/// a `dt * damping` above one flips the velocity. Bodies with zero inverse mass
/// are left untouched.
pub fn integrate_velocity(
    velocity: &mut BodyVelocity,
    inverse_mass: f32,
    motion: &MotionSettings,
    gravity: Vec3,
    dt: f32,
) {
    if inverse_mass <= 0.0 {
        return;
    }

    velocity.linear += motion.gravity_override.unwrap_or(gravity) * dt;

    if motion.linear_damping > 0.0 {
        velocity.linear -= velocity.linear * dt * motion.linear_damping;
    }
    if motion.angular_damping > 0.0 {
        velocity.angular -= velocity.angular * dt * motion.angular_damping;
    }

    if motion.max_speed > 0.0 {
        let speed = velocity.linear.length();
        if speed > motion.max_speed {
            velocity.linear *= motion.max_speed / speed;
        }
    }
}

/// Per-body velocity integration driven by the backend each sub-step
pub struct PoseIntegrationPolicy<'a> {
    registry: &'a HandleRegistry,
    gravity: Vec3,
}

impl<'a> PoseIntegrationPolicy<'a> {
    pub fn new(registry: &'a HandleRegistry, gravity: Vec3) -> Self {
        Self { registry, gravity }
    }
}

impl PoseIntegrator for PoseIntegrationPolicy<'_> {
    fn integrate_velocity(&self, body: CollidableRef, velocity: &mut BodyVelocity, dt: f32) {
        let Some(dynamic) = self.registry.get(body).as_dynamic() else {
            return;
        };
        integrate_velocity(
            velocity,
            dynamic.inverse_mass(),
            &dynamic.motion(),
            self.gravity,
            dt,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::physics::body::{ConvexShape, EntityBuilder};
    use crate::engine::physics::handle::BodyHandle;
    use approx::assert_relative_eq;

    const GRAVITY: Vec3 = Vec3::new(0.0, -9.81, 0.0);

    #[test]
    fn test_gravity_one_step() {
        let mut velocity = BodyVelocity::default();
        integrate_velocity(&mut velocity, 1.0, &MotionSettings::default(), GRAVITY, 1.0 / 60.0);

        assert_relative_eq!(velocity.linear.y, -0.1635, epsilon = 1e-4);
        assert_relative_eq!(velocity.linear.x, 0.0);
    }

    #[test]
    fn test_kinematic_never_accelerates() {
        let before = BodyVelocity::new(Vec3::new(1.0, 2.0, 3.0), Vec3::X);
        let mut velocity = before;
        let motion = MotionSettings {
            linear_damping: 0.5,
            max_speed: 0.1,
            ..Default::default()
        };
        integrate_velocity(&mut velocity, 0.0, &motion, GRAVITY, 1.0 / 60.0);

        assert_eq!(velocity, before, "Zero inverse mass must keep its velocity");
    }

    #[test]
    fn test_gravity_override_replaces_gravity() {
        let mut velocity = BodyVelocity::default();
        let motion = MotionSettings {
            gravity_override: Some(Vec3::new(6.0, 0.0, 0.0)),
            ..Default::default()
        };
        integrate_velocity(&mut velocity, 1.0, &motion, GRAVITY, 0.5);

        assert_relative_eq!(velocity.linear.x, 3.0);
        assert_relative_eq!(velocity.linear.y, 0.0);
    }

    #[test]
    fn test_damping_is_first_order() {
        let mut velocity = BodyVelocity::new(Vec3::new(10.0, 0.0, 0.0), Vec3::new(0.0, 4.0, 0.0));
        let motion = MotionSettings {
            gravity_override: Some(Vec3::ZERO),
            linear_damping: 0.5,
            angular_damping: 0.25,
            ..Default::default()
        };
        integrate_velocity(&mut velocity, 1.0, &motion, GRAVITY, 0.1);

        assert_relative_eq!(velocity.linear.x, 9.5);
        assert_relative_eq!(velocity.angular.y, 3.9);
    }

    #[test]
    fn test_speed_cap_keeps_direction() {
        let mut velocity = BodyVelocity::new(Vec3::new(3.0, 4.0, 0.0), Vec3::ZERO);
        let motion = MotionSettings {
            gravity_override: Some(Vec3::ZERO),
            max_speed: 1.0,
            ..Default::default()
        };
        integrate_velocity(&mut velocity, 1.0, &motion, GRAVITY, 1.0 / 60.0);

        assert_relative_eq!(velocity.linear.length(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(velocity.linear.x, 0.6, epsilon = 1e-6);
        assert_relative_eq!(velocity.linear.y, 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_policy_reads_body_settings() {
        let mut registry = HandleRegistry::new();
        let body = EntityBuilder::new_dynamic(ConvexShape::ball(0.5), 2.0)
            .gravity_override(Vec3::new(0.0, -1.0, 0.0))
            .build();
        registry.insert(BodyHandle(0), body.clone());

        let policy = PoseIntegrationPolicy::new(&registry, GRAVITY);
        let mut velocity = BodyVelocity::default();
        policy.integrate_velocity(
            CollidableRef::new(body.mobility(), BodyHandle(0)),
            &mut velocity,
            1.0,
        );

        assert_relative_eq!(velocity.linear.y, -1.0);
    }
}
