// Math types shared by the simulation API and conversions to the backend's nalgebra types

use glam::{Quat, Vec3};
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::{Isometry, Point, Real, Vector};

/// Position and orientation of a body or query shape in world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Pose with identity orientation
    pub fn from_position(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }

    /// Compose a child pose expressed in this pose's local frame
    pub fn transform(&self, local: &Pose) -> Pose {
        Pose {
            position: self.position + self.orientation * local.position,
            orientation: (self.orientation * local.orientation).normalize(),
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Linear and angular velocity of a body
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BodyVelocity {
    pub linear: Vec3,
    pub angular: Vec3,
}

impl BodyVelocity {
    pub fn new(linear: Vec3, angular: Vec3) -> Self {
        Self { linear, angular }
    }
}

/// Normalize `to - from`, returning the unit direction and the segment length.
/// Degenerate segments yield `None`.
pub fn direction_and_length(from: Vec3, to: Vec3) -> Option<(Vec3, f32)> {
    let diff = to - from;
    let length = diff.length();
    if length <= f32::EPSILON || !length.is_finite() {
        return None;
    }
    Some((diff / length, length))
}

pub fn to_vector(v: Vec3) -> Vector<Real> {
    Vector::new(v.x, v.y, v.z)
}

pub fn from_vector(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

pub fn to_point(v: Vec3) -> Point<Real> {
    Point::new(v.x, v.y, v.z)
}

pub fn from_point(p: &Point<Real>) -> Vec3 {
    Vec3::new(p.x, p.y, p.z)
}

pub fn to_rotation(q: Quat) -> UnitQuaternion<Real> {
    UnitQuaternion::new_normalize(Quaternion::new(q.w, q.x, q.y, q.z))
}

pub fn from_rotation(q: &UnitQuaternion<Real>) -> Quat {
    let q = q.quaternion();
    Quat::from_xyzw(q.i, q.j, q.k, q.w)
}

pub fn to_isometry(pose: &Pose) -> Isometry<Real> {
    Isometry::from_parts(
        Translation3::from(to_vector(pose.position)),
        to_rotation(pose.orientation),
    )
}

pub fn from_isometry(iso: &Isometry<Real>) -> Pose {
    Pose {
        position: from_vector(&iso.translation.vector),
        orientation: from_rotation(&iso.rotation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_direction_and_length() {
        let (dir, len) = direction_and_length(Vec3::ZERO, Vec3::new(0.0, 0.0, 4.0)).unwrap();
        assert_relative_eq!(len, 4.0);
        assert_relative_eq!(dir.z, 1.0);
    }

    #[test]
    fn test_degenerate_segment_has_no_direction() {
        assert!(direction_and_length(Vec3::ONE, Vec3::ONE).is_none());
    }

    #[test]
    fn test_isometry_roundtrip_keeps_pose() {
        let pose = Pose::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
        );
        let back = from_isometry(&to_isometry(&pose));

        assert_relative_eq!(back.position.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(back.position.z, 3.0, epsilon = 1e-5);
        assert!(back.orientation.dot(pose.orientation).abs() > 0.9999);
    }

    #[test]
    fn test_pose_transform_composes_offset() {
        let parent = Pose::new(Vec3::new(0.0, 1.0, 0.0), Quat::from_rotation_y(std::f32::consts::PI));
        let child = Pose::from_position(Vec3::new(1.0, 0.0, 0.0));
        let world = parent.transform(&child);

        assert_relative_eq!(world.position.x, -1.0, epsilon = 1e-5);
        assert_relative_eq!(world.position.y, 1.0, epsilon = 1e-5);
    }
}
