//! Vendor collective backend: routes broadcast/all-reduce through an accelerator's own NCCL
//! communicator instead of the in-house ring (`in_house.rs`), gated behind the `parallelism`
//! Cargo feature.
#![cfg(feature = "parallelism")]

use std::ops::Range;
use std::sync::{Arc, Mutex};

use paramsync_core::{DeviceRuntime, ParamBufferSet, Scalar, Topology};
use tch::{CStore, CNCCL, Device, Kind, Tensor};
use tracing::{debug, warn};

use crate::engine::CollectiveEngine;
use crate::error::CollectiveError;

#[derive(Clone)]
pub enum CommunicatorId {
    NCCL(CStore),
}

pub struct Communicator {
    inner: Mutex<CNCCL>,
}

/// Whether a reduction sums or averages; in-house always sums then scales separately, the vendor
/// library can do either directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceType {
    Sum,
    Mean,
}

/// The vendor backend's view of one rank: its device, its communicator, and the packed buffers
/// staged to/from `tch::Tensor` on every call. The buffers themselves are still the crate's
/// ordinary [`paramsync_core::DeviceBuffer`] so `ParamBufferSet` stays identical across backends;
/// only this boundary layer knows about `tch`.
pub struct VendorRank<T: Scalar, R: DeviceRuntime<T>> {
    pub device: Device,
    pub communicator: Arc<Communicator>,
    pub runtime: Arc<R>,
}

pub struct VendorNcclEngine<T: Scalar, R: DeviceRuntime<T>> {
    topology: Topology,
    ranks: Vec<VendorRank<T, R>>,
    sets: Vec<ParamBufferSet<T, R>>,
    kind: Kind,
}

impl<T: Scalar, R: DeviceRuntime<T>> VendorNcclEngine<T, R> {
    /// Batched communicator init for all `world_size` ranks in one `ncclCommInitAll`-style call,
    /// with each rank retaining only its own handle.
    pub fn new(
        topology: Topology,
        id: CommunicatorId,
        devices: Vec<Device>,
        runtimes: Vec<Arc<R>>,
        sets: Vec<ParamBufferSet<T, R>>,
        kind: Kind,
    ) -> Result<Self, CollectiveError> {
        let CommunicatorId::NCCL(cstore) = id;
        let world_size = topology.world_size() as i64;
        let mut ranks = Vec::with_capacity(devices.len());
        for (rank, (device, runtime)) in devices.into_iter().zip(runtimes).enumerate() {
            let comm = CNCCL::new(cstore.clone(), rank as i64, world_size, device)
                .map_err(|e| CollectiveError::VendorFailure(e.to_string()))?;
            ranks.push(VendorRank {
                device,
                communicator: Arc::new(Communicator {
                    inner: Mutex::new(comm),
                }),
                runtime,
            });
        }
        Ok(Self {
            topology,
            ranks,
            sets,
            kind,
        })
    }

    fn stage_tensor(&self, rank: usize, range: Range<usize>) -> Tensor {
        let host: Vec<f32> = self.sets[rank]
            .diff()
            .slice(range.clone())
            .into_iter()
            .map(|v| v.to_f64() as f32)
            .collect();
        Tensor::from_slice(&host)
            .to_kind(self.kind)
            .to_device(self.ranks[rank].device)
    }

    fn unstage_tensor(&self, rank: usize, range: Range<usize>, tensor: &Tensor) {
        let host: Vec<f32> = Vec::try_from(tensor.to_kind(Kind::Float).to_device(Device::Cpu))
            .expect("staged collective tensor is always 1-D contiguous float");
        let values: Vec<T> = host.into_iter().map(|v| T::from_f64(v as f64)).collect();
        self.sets[rank].diff().write_slice(range.start, &values);
    }
}

impl<T: Scalar, R: DeviceRuntime<T>> CollectiveEngine<T> for VendorNcclEngine<T, R> {
    fn broadcast(&self, root: usize) -> Result<(), CollectiveError> {
        if self.topology.world_size() == 1 {
            return Ok(());
        }
        let total = self.sets[root].data().len();
        for rank in self.topology.ranks() {
            let host: Vec<f32> = self.sets[rank]
                .data()
                .slice(0..total)
                .into_iter()
                .map(|v| v.to_f64() as f32)
                .collect();
            let mut tensor = Tensor::from_slice(&host).to_kind(self.kind).to_device(self.ranks[rank].device);
            let comm = self.ranks[rank].communicator.inner.lock().unwrap();
            tensor
                .broadcast_(&*comm, root as i64)
                .map_err(|e| CollectiveError::VendorFailure(e.to_string()))?;
            drop(comm);
            let host: Vec<f32> = Vec::try_from(tensor.to_kind(Kind::Float).to_device(Device::Cpu)).unwrap();
            let values: Vec<T> = host.into_iter().map(|v| T::from_f64(v as f64)).collect();
            self.sets[rank].data().write_slice(0, &values);
        }
        debug!(root, "vendor broadcast complete");
        Ok(())
    }

    fn all_reduce(&self) -> Result<(), CollectiveError> {
        let total = self.sets[0].diff().len();
        self.all_reduce_slice(0..total)
    }

    fn all_reduce_slice(&self, range: Range<usize>) -> Result<(), CollectiveError> {
        if self.topology.world_size() == 1 {
            return Ok(());
        }
        for rank in self.topology.ranks() {
            let mut tensor = self.stage_tensor(rank, range.clone());
            let comm = self.ranks[rank].communicator.inner.lock().unwrap();
            tensor
                .all_reduce_(&*comm, ReduceType::Sum as i32)
                .map_err(|e| CollectiveError::VendorFailure(e.to_string()))?;
            drop(comm);
            let scale = 1.0 / self.topology.world_size() as f64;
            let tensor = tensor * scale;
            self.unstage_tensor(rank, range.clone(), &tensor);
        }
        warn!("vendor all_reduce stages through host memory per rank; a tensor-parallel \
               deployment should prefer device-resident buffers end to end");
        Ok(())
    }
}
