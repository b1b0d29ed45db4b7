//! Error types for the parking occupancy system

use thiserror::Error;

/// Validation errors for core domain values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid lot id: {0:?}")]
    InvalidLotId(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
