use std::sync::Arc;

use crate::device::{DeviceBuffer, DeviceRuntime};
use crate::error::ParamBufferError;
use crate::scalar::Scalar;

/// Which side of a parameter's storage a [`BindOp`] targets. The tagged variant this crate uses
/// in place of separate boolean flags, per the binding operation described in the collective
/// engine's source material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOp {
    /// Copy the solver's current value into the packed buffer at bind time.
    CopyInitial,
    /// Rewire the parameter's value storage onto the packed `data` buffer, in place.
    ReplaceData,
    /// Rewire the parameter's gradient storage onto the packed `diff` buffer, in place.
    ReplaceDiff,
}

/// One parameter's placement inside the packed buffers: `[offset, offset + count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSlice {
    pub offset: usize,
    pub count: usize,
}

/// Device-resident packed storage for every learnable parameter's value (`data`) and gradient
/// (`diff`), plus the offset table mapping parameter index to its slice of each buffer.
///
/// Construction copies the root solver's current parameter values into `data` and zeroes `diff`.
/// `S` (the total element count) is fixed for the lifetime of the set; offsets tile `[0, S)`
/// exactly, with no holes or overlaps.
pub struct ParamBufferSet<T: Scalar, R: DeviceRuntime<T>> {
    runtime: Arc<R>,
    data: DeviceBuffer<T>,
    diff: DeviceBuffer<T>,
    slices: Vec<ParamSlice>,
}

impl<T: Scalar, R: DeviceRuntime<T>> ParamBufferSet<T, R> {
    /// `param_values` holds one `Vec<T>` per learnable parameter, in solver order.
    pub fn new(runtime: Arc<R>, param_values: &[Vec<T>]) -> Result<Self, ParamBufferError> {
        if param_values.is_empty() {
            return Err(ParamBufferError::Empty);
        }

        let mut slices = Vec::with_capacity(param_values.len());
        let mut offset = 0usize;
        for values in param_values {
            slices.push(ParamSlice {
                offset,
                count: values.len(),
            });
            offset += values.len();
        }
        let total = offset;

        let data = runtime.alloc(total);
        let diff = runtime.alloc(total);
        for (slice, values) in slices.iter().zip(param_values) {
            data.write_slice(slice.offset, values);
        }

        Ok(Self {
            runtime,
            data,
            diff,
            slices,
        })
    }

    pub fn total_len(&self) -> usize {
        self.slices.last().map_or(0, |s| s.offset + s.count)
    }

    pub fn slices(&self) -> &[ParamSlice] {
        &self.slices
    }

    pub fn data(&self) -> &DeviceBuffer<T> {
        &self.data
    }

    pub fn diff(&self) -> &DeviceBuffer<T> {
        &self.diff
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Rebind a solver's parameter views onto this packed storage. `apply` is called once per
    /// parameter with its `ParamSlice`, so the caller can rewire whatever solver-internal
    /// parameter-tensor abstraction it's using (see `BindOp`).
    pub fn bind(&self, param_count: usize, mut apply: impl FnMut(usize, ParamSlice, BindOp)) -> Result<(), ParamBufferError> {
        if param_count != self.slices.len() {
            return Err(ParamBufferError::ParamCountMismatch {
                solver: param_count,
                buffer: self.slices.len(),
            });
        }
        for (i, slice) in self.slices.iter().enumerate() {
            apply(i, *slice, BindOp::ReplaceData);
            apply(i, *slice, BindOp::ReplaceDiff);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuRuntime;

    #[test]
    fn offsets_tile_the_buffer_exactly() {
        let rt = CpuRuntime::new(0);
        let params: Vec<Vec<f32>> = vec![vec![0.0; 3], vec![0.0; 2], vec![0.0; 5]];
        let set = ParamBufferSet::new(rt, &params).unwrap();
        assert_eq!(set.total_len(), 10);
        assert_eq!(set.slices()[0], ParamSlice { offset: 0, count: 3 });
        assert_eq!(set.slices()[1], ParamSlice { offset: 3, count: 2 });
        assert_eq!(set.slices()[2], ParamSlice { offset: 5, count: 5 });
    }

    #[test]
    fn construction_copies_initial_values_into_data_and_zeroes_diff() {
        let rt = CpuRuntime::new(0);
        let params: Vec<Vec<f32>> = vec![vec![1.0, 2.0], vec![3.0]];
        let set = ParamBufferSet::new(rt, &params).unwrap();
        assert_eq!(set.data().to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(set.diff().to_vec(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn empty_parameter_list_is_rejected() {
        let rt = CpuRuntime::new(0);
        let params: Vec<Vec<f32>> = vec![];
        let err = ParamBufferSet::new(rt, &params).unwrap_err();
        assert_eq!(err, ParamBufferError::Empty);
    }

    #[test]
    fn bind_rejects_mismatched_parameter_count() {
        let rt = CpuRuntime::new(0);
        let params: Vec<Vec<f32>> = vec![vec![1.0], vec![2.0]];
        let set = ParamBufferSet::new(rt, &params).unwrap();
        let err = set.bind(3, |_, _, _| {}).unwrap_err();
        assert_eq!(
            err,
            ParamBufferError::ParamCountMismatch {
                solver: 3,
                buffer: 2
            }
        );
    }
}
