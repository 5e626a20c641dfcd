pub mod engine;
pub mod error;
pub mod in_house;
pub mod vendor;

pub use engine::CollectiveEngine;
pub use error::CollectiveError;
pub use in_house::{InHouseRingEngine, RingHandles, GRID_DIM};

#[cfg(feature = "parallelism")]
pub use vendor::{Communicator, CommunicatorId, ReduceType, VendorNcclEngine};

/// Confirms the vendor collective backend is available in this build. A caller that wants the
/// vendor backend without the `parallelism` feature enabled should call this and propagate its
/// error rather than silently falling back to the in-house ring.
#[cfg(not(feature = "parallelism"))]
pub fn require_vendor_backend() -> Result<(), CollectiveError> {
    Err(CollectiveError::VendorBackendNotEnabled)
}

#[cfg(feature = "parallelism")]
pub fn require_vendor_backend() -> Result<(), CollectiveError> {
    Ok(())
}
