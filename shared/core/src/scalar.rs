use bytemuck::{Pod, Zeroable};
use std::fmt::Debug;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul};

/// The element type a [`ParamBufferSet`](crate::param_buffer::ParamBufferSet) is made of.
///
/// Collectives only ever need to sum, scale and zero-fill buffers of `T`, so the bound is kept
/// to exactly that instead of pulling in a full numeric trait hierarchy.
pub trait Scalar:
    Pod + Zeroable + Copy + Default + Debug + Send + Sync + AddAssign + Add<Output = Self> + Mul<Output = Self> + Sum + 'static
{
    fn from_usize(v: usize) -> Self;
    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
}

impl Scalar for f32 {
    fn from_usize(v: usize) -> Self {
        v as f32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl Scalar for f64 {
    fn from_usize(v: usize) -> Self {
        v as f64
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(v: f64) -> Self {
        v
    }
}

/// `i64` is not used for gradient math but reuses the same `DeviceBuffer<T>` machinery for the
/// in-house collective engine's progress vectors (see `paramsync_collectives::in_house`).
impl Scalar for i64 {
    fn from_usize(v: usize) -> Self {
        v as i64
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(v: f64) -> Self {
        v as i64
    }
}
