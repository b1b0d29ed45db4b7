//! Configuration for the CV module

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the CV pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CvConfig {
    /// Vehicle detection settings
    pub detection: DetectionConfig,
    /// Stream sampling settings
    pub stream: StreamConfig,
    /// Snapshot rendering settings
    pub rendering: RenderingConfig,
}

/// Vehicle detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Path to the ONNX model used by the YOLO detector
    pub model_path: String,
    /// Square network input size in pixels
    pub input_size: i32,
    /// Detections below this score are discarded
    pub min_confidence: f32,
    /// IoU threshold for non-maximum suppression
    pub nms_threshold: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8n.onnx".to_string(),
            input_size: 640,
            min_confidence: 0.25,
            nms_threshold: 0.45,
        }
    }
}

/// Stream sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Frames discarded after opening a stream before one is kept
    pub warmup_frames: usize,
    /// Upper bound on opening plus reading a single sample
    pub sample_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            warmup_frames: 15,
            sample_timeout_secs: 30,
        }
    }
}

impl StreamConfig {
    pub fn sample_timeout(&self) -> Duration {
        Duration::from_secs(self.sample_timeout_secs)
    }
}

/// Snapshot rendering configuration, colors are RGB
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingConfig {
    pub spot_color: [u8; 3],
    pub occupied_color: [u8; 3],
    pub point_color: [u8; 3],
    /// Outline thickness in pixels
    pub line_thickness: u32,
    /// Radius of the dot drawn at each reference point
    pub point_radius: u32,
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            spot_color: [0, 255, 0],
            occupied_color: [255, 0, 0],
            point_color: [255, 0, 0],
            line_thickness: 2,
            point_radius: 3,
        }
    }
}

impl CvConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> crate::CvResult<()> {
        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            return Err(crate::CvError::invalid_config(format!(
                "min_confidence must be within [0, 1], got {}",
                self.detection.min_confidence
            )));
        }
        if self.detection.input_size <= 0 {
            return Err(crate::CvError::invalid_config("input_size must be positive"));
        }
        if self.stream.sample_timeout_secs == 0 {
            return Err(crate::CvError::invalid_config("sample_timeout_secs must be positive"));
        }
        Ok(())
    }

    /// Settings for fast local runs against scripted streams
    pub fn fast_sampling() -> Self {
        Self {
            stream: StreamConfig {
                warmup_frames: 0,
                sample_timeout_secs: 5,
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CvConfig::default();
        assert_eq!(config.stream.warmup_frames, 15);
        assert_eq!(config.stream.sample_timeout(), Duration::from_secs(30));
        assert_eq!(config.detection.min_confidence, 0.25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_confidence() {
        let mut config = CvConfig::default();
        config.detection.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }
}
