pub mod batch;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod solver;
pub mod synchronizer;
pub mod testing;
pub mod worker;

pub use batch::{divide_batch_size, LayerBatchSize};
pub use config::{Backend, ReductionMode, SyncConfig};
pub use coordinator::Coordinator;
pub use error::{ConfigError, CoordinatorError, WorkerError};
pub use solver::Solver;
pub use synchronizer::{soft_barrier, SyncHandle, Synchronizer};
pub use worker::{Worker, WorkerState};
