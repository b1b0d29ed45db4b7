//! OpenCV-backed stream capture

use crate::{CvError, CvResult, Frame, FrameReader, FrameSource};
use image::RgbImage;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use tracing::{debug, warn};

/// Opens RTSP URLs, files and anything else `VideoCapture` accepts
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCvSource;

impl FrameSource for OpenCvSource {
    fn open(&self, address: &str) -> CvResult<Box<dyn FrameReader>> {
        let capture = VideoCapture::from_file(address, videoio::CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(CvError::stream_unavailable(address));
        }
        debug!(address, "Opened video capture");

        Ok(Box::new(OpenCvReader {
            capture,
            address: address.to_string(),
        }))
    }
}

struct OpenCvReader {
    capture: VideoCapture,
    address: String,
}

impl FrameReader for OpenCvReader {
    fn read(&mut self) -> CvResult<Option<Frame>> {
        let mut bgr = Mat::default();
        if !self.capture.read(&mut bgr)? || bgr.empty() {
            return Ok(None);
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        let bytes = rgb.data_bytes()?.to_vec();
        let image = RgbImage::from_raw(width, height, bytes)
            .ok_or_else(|| CvError::frame_processing("frame buffer size mismatch"))?;

        Ok(Some(Frame::new(image, self.address.clone())))
    }
}

impl Drop for OpenCvReader {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            warn!(address = %self.address, "Failed to release capture: {}", e);
        }
    }
}
