use super::{PhysicsError, PhysicsResult};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Simulation settings, loadable from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Gravity in m/s²
    pub gravity: [f32; 3],
    /// Multiplier applied to every step's delta time
    pub time_scale: f32,
    /// Backend timesteps per step
    pub max_sub_steps: u32,
    /// Worker threads; `None` uses one per logical CPU
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_count: Option<usize>,
    /// Minimum element capacity of fresh scratch buffers
    pub scratch_block_capacity: usize,
    /// Start with stepping disabled
    pub disabled: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            gravity: [0.0, -9.81, 0.0],
            time_scale: 1.0,
            max_sub_steps: 1,
            worker_count: None,
            scratch_block_capacity: 256,
            disabled: false,
        }
    }
}

impl SimulationConfig {
    pub fn gravity(&self) -> Vec3 {
        Vec3::from_array(self.gravity)
    }

    /// Worker count after resolving `None` to the hardware concurrency
    pub fn resolved_worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(num_cpus::get)
    }

    pub fn validate(&self) -> PhysicsResult<()> {
        if !self.gravity.iter().all(|g| g.is_finite()) {
            return Err(PhysicsError::InvalidConfig(format!(
                "gravity must be finite, got {:?}",
                self.gravity
            )));
        }
        if !self.time_scale.is_finite() || self.time_scale <= 0.0 {
            return Err(PhysicsError::InvalidConfig(format!(
                "time_scale must be positive, got {}",
                self.time_scale
            )));
        }
        if self.max_sub_steps == 0 {
            return Err(PhysicsError::InvalidConfig(
                "max_sub_steps must be at least 1".to_string(),
            ));
        }
        if self.worker_count == Some(0) {
            return Err(PhysicsError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> PhysicsResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> PhysicsResult<Self> {
        let source = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> PhysicsResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
