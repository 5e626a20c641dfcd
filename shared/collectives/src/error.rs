use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectiveError {
    #[error("vendor collective library reported a failure: {0}")]
    VendorFailure(String),
    #[error("in-house ring collective observed an invalid progress marker at chunk {chunk} (expected {expected}, found {found})")]
    InvalidProgress {
        chunk: usize,
        expected: i64,
        found: i64,
    },
    #[error("this build was not compiled with the `parallelism` feature, so the vendor collective backend is unavailable")]
    VendorBackendNotEnabled,
}
