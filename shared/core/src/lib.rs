pub mod barrier;
pub mod device;
pub mod error;
pub mod param_buffer;
pub mod scalar;
pub mod token_queue;
pub mod topology;

pub use barrier::{Barrier, BarrierError, CyclicBarrier};
pub use device::{CpuRuntime, DeviceBuffer, DeviceRuntime};
pub use error::ParamBufferError;
pub use param_buffer::{BindOp, ParamBufferSet, ParamSlice};
pub use scalar::Scalar;
pub use token_queue::TokenQueue;
pub use topology::Topology;
