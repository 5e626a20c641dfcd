use std::ops::Range;
use std::sync::Arc;

use paramsync_core::{DeviceBuffer, DeviceRuntime, ParamBufferSet, Scalar, Topology};
use tracing::debug;

use crate::engine::CollectiveEngine;
use crate::error::CollectiveError;

/// Default chunk count a packed buffer is split into for pipelining, matching the reference
/// implementation's constant of the same name.
pub const GRID_DIM: usize = 8;

/// The handles one rank's [`InHouseRingEngine`] needs direct access to: its neighbors' packed
/// buffers, reached without an owning parent/child pointer graph. `data`/`diff` are the rank's
/// packed parameter/gradient buffers; `parent_grads` is the
/// per-rank scratch buffer a neighbor's gradient chunk is staged into before being added in;
/// `offset` is the length-`GRID_DIM` progress vector signalling chunk completion.
pub struct RingHandles<T: Scalar> {
    pub data: DeviceBuffer<T>,
    pub diff: DeviceBuffer<T>,
    pub parent_grads: DeviceBuffer<T>,
    pub offset: DeviceBuffer<i64>,
}

impl<T: Scalar> RingHandles<T> {
    pub fn new<R: DeviceRuntime<T>>(runtime: &Arc<R>, set: &ParamBufferSet<T, R>, grid_dim: usize) -> Self {
        let total = set.total_len();
        let offset = runtime.alloc(grid_dim.max(1));
        offset.write_from(&vec![-1i64; grid_dim.max(1)]);
        Self {
            data: set.data().clone(),
            diff: set.diff().clone(),
            parent_grads: runtime.alloc(total),
            offset,
        }
    }

    fn reset_offset(&self, grid_dim: usize) {
        self.offset.write_from(&vec![-1i64; grid_dim.max(1)]);
    }
}

fn chunk_ranges(total: usize, grid_dim: usize) -> Vec<Range<usize>> {
    let grid_dim = grid_dim.max(1).min(total.max(1));
    let base = total / grid_dim;
    let remainder = total % grid_dim;
    let mut ranges = Vec::with_capacity(grid_dim);
    let mut start = 0;
    for i in 0..grid_dim {
        let len = base + if i < remainder { 1 } else { 0 };
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// Ring order of ranks starting at `start`, wrapping once around the whole topology.
fn ring_order(topology: &Topology, start: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(topology.world_size());
    let mut rank = start;
    for _ in 0..topology.world_size() {
        order.push(rank);
        rank = topology.child(rank);
    }
    order
}

/// The in-house, peer-to-peer collective backend: a pipelined ring broadcast and a two-phase
/// (reduce-then-distribute) ring all-reduce, each operating in `GRID_DIM`-sized chunks so a
/// consumer could, in a threaded deployment, start forwarding a chunk before the rest of the
/// buffer has arrived. Generic over any [`DeviceRuntime`], so the same code path that talks to
/// real peer-accessible device memory in production is what this crate's tests exercise against
/// the CPU reference runtime.
pub struct InHouseRingEngine<T: Scalar, R: DeviceRuntime<T>> {
    topology: Topology,
    grid_dim: usize,
    runtimes: Vec<Arc<R>>,
    handles: Vec<RingHandles<T>>,
}

impl<T: Scalar, R: DeviceRuntime<T>> InHouseRingEngine<T, R> {
    pub fn new(topology: Topology, grid_dim: usize, runtimes: Vec<Arc<R>>, sets: &[ParamBufferSet<T, R>]) -> Self {
        assert_eq!(runtimes.len(), topology.world_size());
        assert_eq!(sets.len(), topology.world_size());

        let handles: Vec<_> = runtimes
            .iter()
            .zip(sets)
            .map(|(rt, set)| RingHandles::new(rt, set, grid_dim))
            .collect();

        for rank in topology.ranks() {
            let parent = topology.parent(rank);
            let child = topology.child(rank);
            if topology.world_size() > 1 {
                for peer in [parent, child] {
                    if !runtimes[rank].can_access_peer(peer) {
                        debug!(rank, peer, "peer access unavailable, falling back to staged copies");
                    } else {
                        runtimes[rank].enable_peer_access(peer);
                    }
                }
            }
        }

        Self {
            topology,
            grid_dim,
            runtimes,
            handles,
        }
    }

    fn copy_chunk(
        &self,
        dst_rank: usize,
        src_rank: usize,
        chunk_idx: usize,
        chunk: Range<usize>,
    ) -> Result<(), CollectiveError> {
        let dst = &self.handles[dst_rank];
        let src = &self.handles[src_rank];
        let found = dst.offset.slice(chunk_idx..chunk_idx + 1)[0];
        if found != -1 {
            return Err(CollectiveError::InvalidProgress {
                chunk: chunk_idx,
                expected: -1,
                found,
            });
        }
        // Whether or not peer access is enabled the CPU reference runtime performs the same
        // staged copy; a real CUDA runtime would issue a direct peer write when available and an
        // explicit host-staged memcpy otherwise.
        dst.data.copy_range_from(chunk.start, &src.data, chunk.start, chunk.len());
        dst.offset.write_slice(chunk_idx, &[chunk.end as i64]);
        Ok(())
    }

    fn total_len(&self) -> usize {
        self.handles[0].diff.len()
    }
}

impl<T: Scalar, R: DeviceRuntime<T>> CollectiveEngine<T> for InHouseRingEngine<T, R> {
    fn broadcast(&self, root: usize) -> Result<(), CollectiveError> {
        let total = self.handles[root].data.len();
        if self.topology.world_size() == 1 {
            return Ok(());
        }
        let order = ring_order(&self.topology, root);
        for (chunk_idx, chunk) in chunk_ranges(total, self.grid_dim).into_iter().enumerate() {
            for window in order.windows(2) {
                let (prev, cur) = (window[0], window[1]);
                self.copy_chunk(cur, prev, chunk_idx, chunk.clone())?;
            }
        }
        for rank in self.topology.ranks() {
            self.handles[rank].reset_offset(self.grid_dim);
            self.runtimes[rank].synchronize();
        }
        Ok(())
    }

    fn all_reduce(&self) -> Result<(), CollectiveError> {
        self.all_reduce_slice(0..self.total_len())
    }

    fn all_reduce_slice(&self, range: Range<usize>) -> Result<(), CollectiveError> {
        let world_size = self.topology.world_size();
        if world_size == 1 {
            return Ok(());
        }
        let order = ring_order(&self.topology, 0);

        // Phase 1: sequential reduce. order[world_size - 1] ends up holding the full sum.
        for window in order.windows(2) {
            let (prev, cur) = (window[0], window[1]);
            let parent_chunk = self.handles[prev].diff.slice(range.clone());
            self.handles[cur].parent_grads.write_slice(range.start, &parent_chunk);
            self.handles[cur].diff.add_range_in_place(range.start, &parent_chunk);
        }

        // Phase 2: distribute the total back around the ring so every rank converges.
        let total_holder = order[world_size - 1];
        let mut cur = total_holder;
        for _ in 0..world_size - 1 {
            let next = self.topology.child(cur);
            let total_chunk = self.handles[cur].diff.slice(range.clone());
            self.handles[next].diff.write_slice(range.start, &total_chunk);
            cur = next;
        }

        let scale = T::from_usize(world_size);
        for rank in self.topology.ranks() {
            let mut chunk = self.handles[rank].diff.slice(range.clone());
            for v in chunk.iter_mut() {
                *v = divide(*v, scale);
            }
            self.handles[rank].diff.write_slice(range.start, &chunk);
            self.runtimes[rank].synchronize();
        }
        Ok(())
    }
}

/// `T: Scalar` only guarantees `Add`/`Mul`, not `Div` — recover the ratio through `f64` rather
/// than require every scalar type to supply a reciprocal.
fn divide<T: Scalar>(value: T, by: T) -> T {
    T::from_f64(value.to_f64() / by.to_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use paramsync_core::CpuRuntime;

    fn build_engine(world_size: usize, grid_dim: usize, params: &[Vec<Vec<f32>>]) -> (InHouseRingEngine<f32, CpuRuntime>, Vec<ParamBufferSet<f32, CpuRuntime>>) {
        let topology = Topology::new(world_size);
        let runtimes: Vec<_> = (0..world_size).map(CpuRuntime::new).collect();
        let sets: Vec<_> = runtimes
            .iter()
            .zip(params)
            .map(|(rt, p)| ParamBufferSet::new(rt.clone(), p).unwrap())
            .collect();
        let engine = InHouseRingEngine::new(topology, grid_dim, runtimes, &sets);
        (engine, sets)
    }

    #[test]
    fn single_rank_broadcast_and_allreduce_are_no_ops() {
        let params = vec![vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0]]];
        let (engine, sets) = build_engine(1, GRID_DIM, &params);
        engine.broadcast(0).unwrap();
        engine.all_reduce().unwrap();
        assert_eq!(sets[0].diff().to_vec(), vec![0.0; 5]);
        assert_eq!(sets[0].data().to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn broadcast_propagates_root_data_to_every_rank() {
        let root_params = vec![vec![1.0, 2.0, 3.0, 4.0]];
        let other_params = vec![vec![9.0, 9.0, 9.0, 9.0]];
        let params = vec![root_params, other_params];
        let (engine, sets) = build_engine(2, GRID_DIM, &params);
        engine.broadcast(0).unwrap();
        assert_eq!(sets[0].data().to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(sets[1].data().to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn all_reduce_averages_two_workers() {
        let params = vec![vec![vec![0.0; 4]], vec![vec![0.0; 4]]];
        let (engine, sets) = build_engine(2, GRID_DIM, &params);
        sets[0].diff().write_from(&[2.0, 4.0, 6.0, 8.0]);
        sets[1].diff().write_from(&[10.0, 20.0, 30.0, 40.0]);
        engine.all_reduce().unwrap();
        assert_eq!(sets[0].diff().to_vec(), vec![6.0, 12.0, 18.0, 24.0]);
        assert_eq!(sets[1].diff().to_vec(), vec![6.0, 12.0, 18.0, 24.0]);
    }

    #[test]
    fn all_reduce_averages_three_workers() {
        let params = vec![vec![vec![0.0; 2]], vec![vec![0.0; 2]], vec![vec![0.0; 2]]];
        let (engine, sets) = build_engine(3, GRID_DIM, &params);
        sets[0].diff().write_from(&[1.0, 1.0]);
        sets[1].diff().write_from(&[2.0, 2.0]);
        sets[2].diff().write_from(&[3.0, 3.0]);
        engine.all_reduce().unwrap();
        for set in &sets {
            assert_eq!(set.diff().to_vec(), vec![2.0, 2.0]);
        }
    }

    #[test]
    fn fallback_copy_path_matches_peer_access_path() {
        let params = vec![vec![vec![1.0, 2.0, 3.0, 4.0]], vec![vec![9.0, 9.0, 9.0, 9.0]]];
        let topology = Topology::new(2);
        let runtimes: Vec<_> = (0..2).map(CpuRuntime::new).collect();
        runtimes[1].deny_peer(0);
        let sets: Vec<_> = runtimes
            .iter()
            .zip(&params)
            .map(|(rt, p)| ParamBufferSet::new(rt.clone(), p).unwrap())
            .collect();
        let engine = InHouseRingEngine::new(topology, GRID_DIM, runtimes, &sets);
        engine.broadcast(0).unwrap();
        assert_eq!(sets[1].data().to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn all_reduce_slice_only_touches_requested_range() {
        let params = vec![vec![vec![0.0; 4]], vec![vec![0.0; 4]]];
        let (engine, sets) = build_engine(2, GRID_DIM, &params);
        sets[0].diff().write_from(&[2.0, 2.0, 100.0, 100.0]);
        sets[1].diff().write_from(&[4.0, 4.0, 100.0, 100.0]);
        engine.all_reduce_slice(0..2).unwrap();
        assert_eq!(sets[0].diff().to_vec(), vec![3.0, 3.0, 100.0, 100.0]);
        assert_eq!(sets[1].diff().to_vec(), vec![3.0, 3.0, 100.0, 100.0]);
    }

    #[test]
    fn broadcast_detects_invalid_progress_transition() {
        let params = vec![vec![vec![1.0, 2.0, 3.0, 4.0]], vec![vec![9.0, 9.0, 9.0, 9.0]]];
        let (engine, _sets) = build_engine(2, GRID_DIM, &params);
        // Simulate a chunk slot left mid-transfer by a previous, unfinished round instead of
        // reset back to -1: the next broadcast into that slot must refuse to overwrite it.
        engine.handles[1].offset.write_slice(0, &[0]);
        let err = engine.broadcast(0).unwrap_err();
        assert!(matches!(
            err,
            CollectiveError::InvalidProgress {
                chunk: 0,
                expected: -1,
                found: 0,
            }
        ));
    }
}
