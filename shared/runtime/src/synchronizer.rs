use std::ops::Range;
use std::sync::Arc;

use paramsync_collectives::CollectiveEngine;
use paramsync_core::{Barrier, BarrierError, Scalar, Topology};

use crate::error::WorkerError;

/// Process-wide rendezvous point plus the round-collective helper every worker hook (`on_start`,
/// `allreduce`, `syncAllStreams`) is built from: wait for everyone to arrive, let exactly one
/// participant run the shared collective call, then wait again so nobody proceeds before that
/// call has actually finished.
pub struct Synchronizer {
    barrier: Arc<dyn Barrier>,
}

impl Synchronizer {
    pub fn new(barrier: Arc<dyn Barrier>) -> Self {
        Self { barrier }
    }

    /// Run `round` exactly once per barrier generation, on whichever participant happens to be
    /// the last to arrive, while every other participant blocks until it's done. Returns the
    /// leader's result to the leader only; followers get `None` since they never ran `round`.
    pub fn collective_round<Ret>(&self, round: impl FnOnce() -> Ret) -> Result<Option<Ret>, BarrierError> {
        let is_leader = self.barrier.wait()?;
        let result = is_leader.then(round);
        self.barrier.wait()?;
        Ok(result)
    }

    pub fn cancel(&self) {
        self.barrier.cancel();
    }
}

/// What a [`crate::worker::Worker`] hands its solver at bind time so the solver can trigger
/// broadcast/reduce itself, at whatever granularity its reduction mode needs — a per-parameter
/// overlapped solver calls `allreduce_slice` for each parameter as soon as its own backward pass
/// for that parameter finishes, rather than waiting for the whole step to return.
pub struct SyncHandle<T: Scalar> {
    synchronizer: Arc<Synchronizer>,
    engine: Arc<dyn CollectiveEngine<T>>,
}

impl<T: Scalar> Clone for SyncHandle<T> {
    fn clone(&self) -> Self {
        Self {
            synchronizer: self.synchronizer.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl<T: Scalar> SyncHandle<T> {
    pub fn new(synchronizer: Arc<Synchronizer>, engine: Arc<dyn CollectiveEngine<T>>) -> Self {
        Self { synchronizer, engine }
    }

    /// Broadcast root's `data` to every worker. Must be called by every rank once at the top of
    /// each step.
    pub fn on_start(&self) -> Result<(), WorkerError> {
        let engine = self.engine.clone();
        self.synchronizer.collective_round(move || engine.broadcast(0))?.transpose()?;
        Ok(())
    }

    /// Whole-model gradient reduction, scaled by `1 / world_size`.
    pub fn allreduce(&self) -> Result<(), WorkerError> {
        let engine = self.engine.clone();
        self.synchronizer.collective_round(move || engine.all_reduce())?.transpose()?;
        Ok(())
    }

    /// Per-parameter overlapped reduction: only the gradient slice named by `range`.
    pub fn allreduce_slice(&self, range: Range<usize>) -> Result<(), WorkerError> {
        let engine = self.engine.clone();
        self.synchronizer
            .collective_round(move || engine.all_reduce_slice(range))?
            .transpose()?;
        Ok(())
    }

    /// Barrier + join on every communication stream; terminal of a step.
    pub fn sync_all_streams(&self) -> Result<(), WorkerError> {
        self.synchronizer.collective_round(|| {}).map_err(WorkerError::from)?;
        Ok(())
    }
}

/// A CPU-only two-lap ring rendezvous used as a lighter-weight alternative to the hard barrier
/// when the caller wants to avoid blocking on device work. Every rank calls
/// this with its own `queues` slice (one [`paramsync_core::TokenQueue`] per rank, indexed by
/// rank); it returns once every rank has passed through both laps.
pub fn soft_barrier(rank: usize, topology: &Topology, queues: &[paramsync_core::TokenQueue]) {
    let child = topology.child(rank);
    queues[child].push();
    queues[rank].pop();

    let parent = topology.parent(rank);
    queues[parent].push();
    queues[rank].pop();
}
