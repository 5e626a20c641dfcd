use std::ops::Range;

use paramsync_core::Scalar;

use crate::error::CollectiveError;

/// The capability both collective backends implement. A trait rather than an enum switch so
/// tests can exercise either backend without conditional compilation.
pub trait CollectiveEngine<T: Scalar>: Send + Sync {
    /// Broadcast `root`'s `data` buffer to every other rank.
    fn broadcast(&self, root: usize) -> Result<(), CollectiveError>;

    /// Sum-reduce every rank's whole `diff` buffer and scale the result by `1 / world_size`.
    fn all_reduce(&self) -> Result<(), CollectiveError>;

    /// Sum-reduce and scale only `range` of every rank's `diff` buffer — the per-parameter
    /// overlapped form.
    fn all_reduce_slice(&self, range: Range<usize>) -> Result<(), CollectiveError>;
}
