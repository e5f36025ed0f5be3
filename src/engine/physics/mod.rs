// Physics system using rapier3d
//
// Deferred world mutation, locked spatial queries and narrow-phase contact
// recording around a pluggable simulation backend.

pub mod backend;
pub mod body;
pub mod collision;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod handle;
pub mod integration;
pub mod mutation;
pub mod query;
pub mod registry;
pub mod scene;
pub mod scratch;
pub mod world;

pub use backend::{QueryView, Simulation};
pub use body::{
    presets, ColliderShape, CompoundChild, ConvexShape, EntityBuilder, EntityKind, Material,
    MotionSettings, PhysicsEntity, SpringSettings,
};
pub use collision::{CollisionGroup, ContactRecord, ContactRecorder};
pub use config::SimulationConfig;
pub use controller::{ControllerState, SimulationController};
pub use handle::{BodyHandle, EntityId, Mobility};
pub use query::HitResult;
pub use scene::{SceneEvent, SceneTransform};
pub use world::{PhysicsWorld, WorldSnapshot};

/// Physics errors
#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    #[error("Entity {0:?} is not inserted in the simulation")]
    NotInserted(EntityId),

    #[error("Entity {0:?} is a static collider, not a body")]
    NotABody(EntityId),

    #[error("Simulation has been disposed")]
    Disposed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start worker threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type PhysicsResult<T> = Result<T, PhysicsError>;
