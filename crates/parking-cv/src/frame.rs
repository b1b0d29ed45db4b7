//! Decoded video frames

use crate::CvResult;
use chrono::{DateTime, Utc};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// A single decoded RGB frame and where it came from
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Address of the stream the frame was read from
    pub source: String,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbImage, source: impl Into<String>) -> Self {
        Self {
            image,
            source: source.into(),
            captured_at: Utc::now(),
        }
    }

    /// Uniformly filled frame
    pub fn blank(width: u32, height: u32, color: [u8; 3], source: impl Into<String>) -> Self {
        Self::new(RgbImage::from_pixel(width, height, Rgb(color)), source)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encode the frame as PNG
    pub fn encode_png(&self) -> CvResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.image.write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }
}
