use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamBufferError {
    #[error("parameter list is empty, nothing to pack")]
    Empty,
    #[error("solver parameter count {solver} does not match the count used to size this buffer set ({buffer})")]
    ParamCountMismatch { solver: usize, buffer: usize },
}
