// Core math shared across the engine

pub mod math;

pub use math::{BodyVelocity, Pose};
