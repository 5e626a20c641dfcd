use paramsync_core::{DeviceRuntime, ParamBufferSet, Scalar};

use crate::error::WorkerError;
use crate::synchronizer::SyncHandle;

/// The external collaborator this crate drives but does not implement: a model/optimizer replica
/// that owns its own forward/backward logic and reads/writes its gradients through the packed
/// buffers a [`crate::worker::Worker`] gives it.
pub trait Solver<T: Scalar, R: DeviceRuntime<T>>: Send {
    /// Ordered parameter values used once, at construction, to size and seed the packed buffers.
    fn initial_parameter_values(&self) -> Vec<Vec<T>>;

    fn max_iter(&self) -> u64;
    fn initial_iter(&self) -> u64;
    fn random_seed(&self) -> Option<u64>;

    /// Called once by the worker thread before the first step, only for non-root replicas.
    fn seed_rng(&mut self, seed: u64);
    fn mark_non_root(&mut self);

    /// Called once by [`crate::worker::Worker::new`], registering this solver as its own
    /// step-lifecycle callback. A solver whose reduction mode needs per-parameter overlap calls
    /// `sync.allreduce_slice(range)` from inside its own `step` as each parameter's gradient
    /// becomes ready; a solver that only ever runs whole-model reduction can ignore the handle.
    fn bind_sync(&mut self, sync: SyncHandle<T>);

    /// Run one optimization step. `buffers` is the packed value/gradient storage this solver's
    /// parameters have been bound onto; the solver is expected to read `buffers.data()` for the
    /// current parameter values and write `buffers.diff()` with this step's gradients before
    /// returning.
    fn step(&mut self, iter: u64, buffers: &ParamBufferSet<T, R>) -> Result<(), WorkerError>;
}
