//! Errors raised by the simulation harness.

use thiserror::Error;
use v2v_core::V2vError;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("scenario setup failed: {0}")]
    Setup(#[from] V2vError),

    #[error("export I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("export serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
