use std::sync::Arc;
use std::thread;

use paramsync_collectives::{require_vendor_backend, CollectiveEngine, InHouseRingEngine};
use paramsync_core::{CpuRuntime, CyclicBarrier, ParamBufferSet, Scalar, Topology};
use tracing::{error, info, info_span};

use crate::config::{Backend, ReductionMode, SyncConfig};
use crate::error::CoordinatorError;
use crate::solver::Solver;
use crate::synchronizer::Synchronizer;
use crate::worker::Worker;

/// Owns the whole run: builds one [`Worker`] per configured device, wires them to a shared
/// [`Synchronizer`] and collective engine, then drives every worker's step loop to completion —
/// rank 0 on the calling thread, every other rank on a spawned one, joined before returning.
/// Builds the topology and collective handles once up front, then fans worker threads out and
/// back in per run, not per step.
pub struct Coordinator<S: Solver<f32, CpuRuntime> + Clone + 'static> {
    config: SyncConfig,
    workers: Vec<Worker<f32, CpuRuntime, S>>,
}

impl<S: Solver<f32, CpuRuntime> + Clone + 'static> Coordinator<S> {
    /// `root_solver` is cloned once per configured device; non-root clones are marked and seeded
    /// inside each worker's own thread, never here.
    pub fn new(config: SyncConfig, root_solver: S) -> Result<Self, CoordinatorError> {
        config.validate()?;
        if matches!(config.backend, Backend::VendorCollective) {
            require_vendor_backend().map_err(|e| CoordinatorError::Worker { rank: 0, source: e.into() })?;
        }

        let world_size = config.world_size();
        let topology = Topology::new(world_size);

        let param_values = root_solver.initial_parameter_values();
        let runtimes: Vec<Arc<CpuRuntime>> = config.devices.iter().map(|&id| CpuRuntime::new(id)).collect();
        let sets: Vec<ParamBufferSet<f32, CpuRuntime>> = runtimes
            .iter()
            .map(|rt| ParamBufferSet::new(rt.clone(), &param_values))
            .collect::<Result<_, _>>()
            .map_err(|e| CoordinatorError::Worker {
                rank: 0,
                source: e.into(),
            })?;

        let engine: Arc<dyn CollectiveEngine<f32>> =
            Arc::new(InHouseRingEngine::new(topology, config.grid_dim, runtimes.clone(), &sets));
        let barrier = CyclicBarrier::new(world_size);
        let synchronizer = Arc::new(Synchronizer::new(barrier));

        let mut workers = Vec::with_capacity(world_size);
        for (rank, (rt, device_id)) in runtimes.iter().zip(&config.devices).enumerate() {
            let solver = root_solver.clone();
            let worker = Worker::new(
                rank,
                *device_id,
                rt.clone(),
                solver,
                synchronizer.clone(),
                engine.clone(),
                config.reduction_mode,
            )
            .map_err(|e| CoordinatorError::Worker { rank, source: e })?;
            workers.push(worker);
        }

        Ok(Self { config, workers })
    }

    pub fn world_size(&self) -> usize {
        self.config.world_size()
    }

    /// Run every worker's configured step budget to completion. Rank 0 runs inline on the calling
    /// thread; every other rank runs on a thread spawned for the duration of this call.
    pub fn run(&mut self) -> Result<(), CoordinatorError> {
        let mut workers = std::mem::take(&mut self.workers);
        let mut rest: Vec<_> = workers.split_off(1);
        let mut root = workers.pop().expect("at least one worker");

        let handles: Vec<_> = rest
            .drain(..)
            .map(|mut worker| {
                let rank = worker.rank();
                thread::Builder::new()
                    .name(format!("paramsync-worker-{rank}"))
                    .spawn(move || {
                        let _span = info_span!("worker", rank).entered();
                        let result = worker.run();
                        (worker, result)
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        let root_result = {
            let _span = info_span!("worker", rank = root.rank()).entered();
            root.run()
        };

        let mut rejoined = vec![root];
        let mut first_panic = None;
        let mut first_error = root_result.err().map(|source| (0usize, source));
        for (rank, handle) in (1..).zip(handles) {
            match handle.join() {
                Ok((worker, result)) => {
                    rejoined.push(worker);
                    if let Err(source) = result {
                        error!(rank, %source, "worker reported a collective error");
                        first_error.get_or_insert((rank, source));
                    }
                }
                Err(_) => {
                    error!(rank, "worker thread panicked");
                    first_panic.get_or_insert(rank);
                }
            }
        }

        rejoined.sort_by_key(|w| w.rank());
        self.workers = rejoined;

        if let Some(rank) = first_panic {
            return Err(CoordinatorError::WorkerPanicked(rank));
        }
        if let Some((rank, source)) = first_error {
            return Err(CoordinatorError::Worker { rank, source });
        }

        info!(world_size = self.workers.len(), "run complete");
        Ok(())
    }

    pub fn workers(&self) -> &[Worker<f32, CpuRuntime, S>] {
        &self.workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::DummySolver;

    #[test]
    fn coordinator_runs_every_configured_device_and_seeds_non_root_ranks() {
        let config = SyncConfig {
            devices: vec![0, 1, 2],
            random_seed: Some(7),
            ..Default::default()
        };
        let solver = DummySolver::new(vec![vec![0.0; 4]], 0, 2, Some(7), ReductionMode::EndOfStepWholeModel);
        let mut coordinator = Coordinator::new(config, solver).unwrap();
        coordinator.run().unwrap();

        let workers = coordinator.workers();
        assert_eq!(workers.len(), 3);
        for worker in workers {
            assert_eq!(worker.buffers().total_len(), 4);
        }
    }

    #[test]
    fn rejects_empty_device_list() {
        let config = SyncConfig {
            devices: vec![],
            ..Default::default()
        };
        let solver = DummySolver::new(vec![vec![0.0; 2]], 0, 1, None, ReductionMode::EndOfStepWholeModel);
        assert!(Coordinator::new(config, solver).is_err());
    }
}
