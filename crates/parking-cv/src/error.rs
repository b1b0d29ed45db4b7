//! Error types for the CV module

use thiserror::Error;

/// Errors that can occur in CV operations
#[derive(Error, Debug)]
pub enum CvError {
    #[error("OpenCV error: {0}")]
    OpenCV(String),

    #[error("Stream unavailable: {0}")]
    StreamUnavailable(String),

    #[error("Stream {address} ended after {frames_read} frames")]
    StreamEnded { address: String, frames_read: usize },

    #[error("Stream sample timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Stream read cancelled: {0}")]
    Cancelled(String),

    #[error("Frame processing error: {0}")]
    FrameProcessing(String),

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Image encoding error: {0}")]
    Encoding(String),
}

impl CvError {
    pub fn stream_unavailable(source: impl Into<String>) -> Self {
        Self::StreamUnavailable(source.into())
    }

    pub fn frame_processing(msg: impl Into<String>) -> Self {
        Self::FrameProcessing(msg.into())
    }

    pub fn detection(msg: impl Into<String>) -> Self {
        Self::Detection(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for CvError {
    fn from(err: opencv::Error) -> Self {
        Self::OpenCV(err.to_string())
    }
}

impl From<image::ImageError> for CvError {
    fn from(err: image::ImageError) -> Self {
        Self::Encoding(err.to_string())
    }
}

pub type CvResult<T> = Result<T, CvError>;
