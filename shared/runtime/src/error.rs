use paramsync_collectives::CollectiveError;
use paramsync_core::{BarrierError, ParamBufferError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Buffer(#[from] ParamBufferError),
    #[error(transparent)]
    Collective(#[from] CollectiveError),
    #[error(transparent)]
    Barrier(#[from] BarrierError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`devices` must list at least one device id")]
    NoDevices,
    #[error("`grid_dim` must be at least 1")]
    InvalidGridDim,
    #[error("layer batch_size {batch_size} is not divisible by world size {world_size}")]
    IndivisibleBatchSize { batch_size: u64, world_size: usize },
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("device {0} is not available on this build")]
    MissingDevice(usize),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("worker {rank} failed: {source}")]
    Worker {
        rank: usize,
        #[source]
        source: WorkerError,
    },
    #[error("worker {0} thread panicked")]
    WorkerPanicked(usize),
}
