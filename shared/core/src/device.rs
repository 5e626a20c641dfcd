use std::sync::{Arc, Mutex};

use crate::scalar::Scalar;

/// A "device-resident" allocation of `T`. On the CPU reference runtime this is literally shared
/// process memory guarded by a mutex; a GPU-backed [`DeviceRuntime`] would hand out a buffer type
/// wrapping a real device pointer instead, but every caller above this layer (ParamBufferSet,
/// Worker, the in-house collective engine) only ever goes through the trait, never the
/// representation.
#[derive(Clone)]
pub struct DeviceBuffer<T> {
    inner: Arc<Mutex<Vec<T>>>,
}

impl<T: Scalar> DeviceBuffer<T> {
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.inner.lock().unwrap().clone()
    }

    pub fn read_into(&self, dst: &mut [T]) {
        let guard = self.inner.lock().unwrap();
        dst.copy_from_slice(&guard);
    }

    pub fn write_from(&self, src: &[T]) {
        let mut guard = self.inner.lock().unwrap();
        guard.copy_from_slice(src);
    }

    pub fn slice(&self, range: std::ops::Range<usize>) -> Vec<T> {
        self.inner.lock().unwrap()[range].to_vec()
    }

    pub fn write_slice(&self, offset: usize, src: &[T]) {
        let mut guard = self.inner.lock().unwrap();
        guard[offset..offset + src.len()].copy_from_slice(src);
    }

    /// Copy `len` elements from `src[src_off..]` into `self[dst_off..]`. Models a device-to-device
    /// `memcpy`; on the CPU runtime this is a plain slice copy, possibly between two different
    /// buffers (peer write) or within the same one.
    pub fn copy_range_from(&self, dst_off: usize, src: &DeviceBuffer<T>, src_off: usize, len: usize) {
        let chunk = src.slice(src_off..src_off + len);
        self.write_slice(dst_off, &chunk);
    }

    pub fn set_zero(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.iter_mut().for_each(|v| *v = T::default());
    }

    pub fn scale_in_place(&self, factor: T) {
        let mut guard = self.inner.lock().unwrap();
        guard.iter_mut().for_each(|v| *v = *v * factor);
    }

    pub fn add_range_in_place(&self, offset: usize, addend: &[T]) {
        let mut guard = self.inner.lock().unwrap();
        for (dst, add) in guard[offset..offset + addend.len()].iter_mut().zip(addend) {
            *dst += *add;
        }
    }
}

/// The device-runtime capability this crate's algorithms are written against (allocate, zero,
/// copy, synchronize, probe/enable peer access).
pub trait DeviceRuntime<T: Scalar>: Send + Sync {
    fn device_id(&self) -> usize;
    fn alloc(&self, len: usize) -> DeviceBuffer<T>;
    fn can_access_peer(&self, peer: usize) -> bool;
    fn enable_peer_access(&self, peer: usize);
    fn disable_peer_access(&self, peer: usize);
    /// Join on whatever stream(s) this runtime issues asynchronous work onto. A no-op when, as on
    /// the CPU reference runtime, every operation above already executed synchronously.
    fn synchronize(&self);
}

/// The reference `DeviceRuntime` implementation: every "device" is just this process, every
/// buffer is shared heap memory, peer access is unconditionally available, and every operation
/// already completed by the time its call returns. This is what the in-house collective engine
/// runs against in tests, and what a single-process CPU-only training run would use in
/// production.
pub struct CpuRuntime {
    device_id: usize,
    peer_access_disabled: Mutex<std::collections::HashSet<usize>>,
}

impl CpuRuntime {
    pub fn new(device_id: usize) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            peer_access_disabled: Mutex::new(std::collections::HashSet::new()),
        })
    }

    /// Test hook: force `can_access_peer` to report `false` for `peer`, to exercise the in-house
    /// engine's fallback-copy path.
    pub fn deny_peer(&self, peer: usize) {
        self.peer_access_disabled.lock().unwrap().insert(peer);
    }
}

impl<T: Scalar> DeviceRuntime<T> for CpuRuntime {
    fn device_id(&self) -> usize {
        self.device_id
    }

    fn alloc(&self, len: usize) -> DeviceBuffer<T> {
        DeviceBuffer {
            inner: Arc::new(Mutex::new(vec![T::default(); len.max(1)])),
        }
    }

    fn can_access_peer(&self, peer: usize) -> bool {
        !self.peer_access_disabled.lock().unwrap().contains(&peer)
    }

    fn enable_peer_access(&self, peer: usize) {
        self.peer_access_disabled.lock().unwrap().remove(&peer);
    }

    fn disable_peer_access(&self, peer: usize) {
        self.peer_access_disabled.lock().unwrap().insert(peer);
    }

    fn synchronize(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_zeroed_and_at_least_length_one() {
        let rt = CpuRuntime::new(0);
        let buf: DeviceBuffer<f32> = DeviceRuntime::<f32>::alloc(&*rt, 0);
        assert_eq!(buf.len(), 1);
        let buf: DeviceBuffer<f32> = DeviceRuntime::<f32>::alloc(&*rt, 4);
        assert_eq!(buf.to_vec(), vec![0.0; 4]);
    }

    #[test]
    fn copy_range_moves_data_between_buffers() {
        let rt = CpuRuntime::new(0);
        let src: DeviceBuffer<f32> = DeviceRuntime::<f32>::alloc(&*rt, 4);
        src.write_from(&[1.0, 2.0, 3.0, 4.0]);
        let dst: DeviceBuffer<f32> = DeviceRuntime::<f32>::alloc(&*rt, 4);
        dst.copy_range_from(1, &src, 1, 2);
        assert_eq!(dst.to_vec(), vec![0.0, 2.0, 3.0, 0.0]);
    }

    #[test]
    fn peer_access_can_be_denied_and_restored() {
        let rt = CpuRuntime::new(0);
        assert!(DeviceRuntime::<f32>::can_access_peer(&*rt, 1));
        rt.deny_peer(1);
        assert!(!DeviceRuntime::<f32>::can_access_peer(&*rt, 1));
        DeviceRuntime::<f32>::enable_peer_access(&*rt, 1);
        assert!(DeviceRuntime::<f32>::can_access_peer(&*rt, 1));
    }
}
