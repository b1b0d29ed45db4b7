//! Monitoring error types

use parking_core::{CoreError, LotId};
use parking_cv::CvError;
use parking_db::DbError;
use thiserror::Error;

/// Errors surfaced to callers of the supervisor
///
/// Failures inside a running cycle never appear here; they are recorded in
/// the lot's occupancy result instead.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Lot already exists: {0}")]
    AlreadyExists(LotId),

    #[error("Lot not found: {0}")]
    NotFound(LotId),

    #[error("Stream source unreachable for lot {lot_id}: {source_url}")]
    SourceUnreachable { lot_id: LotId, source_url: String },

    #[error("Invalid lot id: {0:?}")]
    InvalidLotId(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    #[error("Vision error: {0}")]
    Vision(#[from] CvError),

    #[error("Monitor supervisor is shut down")]
    ShutDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MonitorError {
    pub fn source_unreachable(lot_id: LotId, source_url: impl Into<String>) -> Self {
        Self::SourceUnreachable {
            lot_id,
            source_url: source_url.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<CoreError> for MonitorError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidLotId(id) => Self::InvalidLotId(id),
        }
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
