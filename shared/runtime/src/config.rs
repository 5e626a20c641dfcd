use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use paramsync_collectives::GRID_DIM;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    VendorCollective,
    InHouseP2p,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionMode {
    EndOfStepWholeModel,
    PerParameterOverlap,
}

/// The whole-process configuration: which devices to run on, which collective backend and
/// reduction schedule to use, and the chunking/seeding knobs those backends read. Loadable from
/// TOML via `toml`, matching the rest of this ecosystem's config conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub devices: Vec<usize>,
    #[serde(default = "default_backend")]
    pub backend: Backend,
    #[serde(default = "default_reduction_mode")]
    pub reduction_mode: ReductionMode,
    #[serde(default = "default_grid_dim")]
    pub grid_dim: usize,
    #[serde(default)]
    pub random_seed: Option<u64>,
}

fn default_backend() -> Backend {
    Backend::InHouseP2p
}

fn default_reduction_mode() -> ReductionMode {
    ReductionMode::EndOfStepWholeModel
}

fn default_grid_dim() -> usize {
    GRID_DIM
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        if self.grid_dim == 0 {
            return Err(ConfigError::InvalidGridDim);
        }
        Ok(())
    }

    pub fn world_size(&self) -> usize {
        self.devices.len()
    }

    pub fn seed_for(&self, device_id: usize) -> Option<u64> {
        self.random_seed.map(|seed| seed + device_id as u64)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            devices: vec![0],
            backend: default_backend(),
            reduction_mode: default_reduction_mode(),
            grid_dim: default_grid_dim(),
            random_seed: None,
        }
    }
}
