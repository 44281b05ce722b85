// Engine-level error type. Non-fatal conditions (too-short reads, ambiguous
// bases) are flagged on the Read and never surface here; everything in this
// enum aborts the owning worker and is reported after join.

use thiserror::Error;

use crate::kvstore::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("index load failed: {0}")]
    IndexLoad(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;
