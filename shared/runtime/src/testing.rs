//! A deterministic mock [`Solver`] usable without any accelerator present: fixed parameter
//! shapes, no real compute, but a faithful enough lifecycle (seeding, non-root marking, step
//! counting) to exercise [`crate::worker`] and [`crate::coordinator`] in tests.

use std::sync::{Arc, Mutex};

use paramsync_core::{DeviceRuntime, ParamBufferSet};

use crate::config::ReductionMode;
use crate::error::WorkerError;
use crate::solver::Solver;
use crate::synchronizer::SyncHandle;

#[derive(Clone)]
pub struct DummySolver {
    initial_values: Vec<Vec<f32>>,
    initial_iter: u64,
    max_iter: u64,
    random_seed: Option<u64>,
    reduction_mode: ReductionMode,
    sync: Option<SyncHandle<f32>>,
    seeded_with: Arc<Mutex<Option<u64>>>,
    non_root: Arc<Mutex<bool>>,
    steps_taken: Arc<Mutex<Vec<u64>>>,
    /// gradient value `step(iter)` writes into every element of `diff`, so tests can assert on it
    gradient_fill: f32,
}

impl DummySolver {
    pub fn new(
        initial_values: Vec<Vec<f32>>,
        initial_iter: u64,
        max_iter: u64,
        random_seed: Option<u64>,
        reduction_mode: ReductionMode,
    ) -> Self {
        Self {
            initial_values,
            initial_iter,
            max_iter,
            random_seed,
            reduction_mode,
            sync: None,
            seeded_with: Arc::new(Mutex::new(None)),
            non_root: Arc::new(Mutex::new(false)),
            steps_taken: Arc::new(Mutex::new(Vec::new())),
            gradient_fill: 1.0,
        }
    }

    pub fn with_gradient_fill(mut self, value: f32) -> Self {
        self.gradient_fill = value;
        self
    }

    pub fn seeded_with(&self) -> Option<u64> {
        *self.seeded_with.lock().unwrap()
    }

    pub fn marked_non_root(&self) -> bool {
        *self.non_root.lock().unwrap()
    }

    pub fn steps_taken(&self) -> Vec<u64> {
        self.steps_taken.lock().unwrap().clone()
    }
}

impl<R: DeviceRuntime<f32>> Solver<f32, R> for DummySolver {
    fn initial_parameter_values(&self) -> Vec<Vec<f32>> {
        self.initial_values.clone()
    }

    fn max_iter(&self) -> u64 {
        self.max_iter
    }

    fn initial_iter(&self) -> u64 {
        self.initial_iter
    }

    fn random_seed(&self) -> Option<u64> {
        self.random_seed
    }

    fn seed_rng(&mut self, seed: u64) {
        *self.seeded_with.lock().unwrap() = Some(seed);
    }

    fn mark_non_root(&mut self) {
        *self.non_root.lock().unwrap() = true;
    }

    fn bind_sync(&mut self, sync: SyncHandle<f32>) {
        self.sync = Some(sync);
    }

    fn step(&mut self, iter: u64, buffers: &ParamBufferSet<f32, R>) -> Result<(), WorkerError> {
        let fill = vec![self.gradient_fill; buffers.total_len()];
        buffers.diff().write_from(&fill);
        if self.reduction_mode == ReductionMode::PerParameterOverlap {
            let sync = self.sync.as_ref().expect("bind_sync is called before the first step");
            for slice in buffers.slices() {
                sync.allreduce_slice(slice.offset..slice.offset + slice.count)?;
            }
        }
        self.steps_taken.lock().unwrap().push(iter);
        Ok(())
    }
}
