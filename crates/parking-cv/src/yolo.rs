//! YOLO vehicle detection through the OpenCV DNN module
//!
//! Expects a YOLOv8-style ONNX export: one output of shape
//! `[1, 4 + classes, candidates]` holding center-form boxes followed by
//! per-class scores.

use crate::{CvConfig, CvError, CvResult, Detector, Frame, RawDetection};
use opencv::{
    core::{self, Mat, Rect, Scalar, Size, Vector},
    dnn,
    prelude::*,
};
use parking_core::BoundingBox;
use parking_lot::Mutex;
use tracing::{debug, info};

pub struct YoloDetector {
    net: Mutex<dnn::Net>,
    input_size: i32,
    score_threshold: f32,
    nms_threshold: f32,
}

impl YoloDetector {
    /// Load the ONNX model named in the configuration
    pub fn from_config(config: &CvConfig) -> CvResult<Self> {
        let detection = &config.detection;
        let mut net = dnn::read_net_from_onnx(&detection.model_path)?;
        net.set_preferable_backend(dnn::DNN_BACKEND_OPENCV)?;
        net.set_preferable_target(dnn::DNN_TARGET_CPU)?;

        info!(model = %detection.model_path, "Loaded YOLO model");

        Ok(Self {
            net: Mutex::new(net),
            input_size: detection.input_size,
            score_threshold: detection.min_confidence,
            nms_threshold: detection.nms_threshold,
        })
    }
}

/// Copy an RGB frame into a three channel Mat
fn frame_to_mat(frame: &Frame) -> CvResult<Mat> {
    let flat = Mat::from_slice(frame.image.as_raw())?;
    let shaped = flat.reshape(3, frame.height() as i32)?;
    Ok(shaped.try_clone()?)
}

impl Detector for YoloDetector {
    fn detect(&self, frame: &Frame) -> CvResult<Vec<RawDetection>> {
        let mat = frame_to_mat(frame)?;
        let size = self.input_size;

        // frame is already RGB, no channel swap
        let blob = dnn::blob_from_image(
            &mat,
            1.0 / 255.0,
            Size::new(size, size),
            Scalar::default(),
            false,
            false,
            core::CV_32F,
        )?;

        let output = {
            let mut net = self.net.lock();
            net.set_input(&blob, "", 1.0, Scalar::default())?;
            let names = net.get_unconnected_out_layers_names()?;
            let mut outputs = Vector::<Mat>::new();
            net.forward(&mut outputs, &names)?;
            outputs.get(0)?
        };

        let dims = output.mat_size();
        if dims.len() != 3 {
            return Err(CvError::detection(format!("unexpected output rank {}", dims.len())));
        }
        let rows = dims[1] as usize;
        let candidates = dims[2] as usize;
        if rows <= 4 {
            return Err(CvError::detection(format!("unexpected output rows {rows}")));
        }
        let data = output.data_typed::<f32>()?;

        let scale_x = frame.width() as f32 / size as f32;
        let scale_y = frame.height() as f32 / size as f32;

        let mut boxes = Vector::<Rect>::new();
        let mut scores = Vector::<f32>::new();
        let mut classes = Vec::new();

        for i in 0..candidates {
            let (class_id, score) = (4..rows)
                .map(|r| (r - 4, data[r * candidates + i]))
                .fold((0, f32::MIN), |best, c| if c.1 > best.1 { c } else { best });

            if score < self.score_threshold {
                continue;
            }

            let cx = data[i] * scale_x;
            let cy = data[candidates + i] * scale_y;
            let w = data[2 * candidates + i] * scale_x;
            let h = data[3 * candidates + i] * scale_y;

            boxes.push(Rect::new((cx - w / 2.0) as i32, (cy - h / 2.0) as i32, w as i32, h as i32));
            scores.push(score);
            classes.push(class_id);
        }

        let mut keep = Vector::<i32>::new();
        dnn::nms_boxes(&boxes, &scores, self.score_threshold, self.nms_threshold, &mut keep, 1.0, 0)?;

        let mut detections = Vec::with_capacity(keep.len());
        for idx in keep.iter() {
            let idx = idx as usize;
            let rect = boxes.get(idx)?;
            detections.push(RawDetection::new(
                BoundingBox::from_xywh(rect.x as f32, rect.y as f32, rect.width as f32, rect.height as f32),
                classes[idx],
                scores.get(idx)?,
            ));
        }

        debug!(candidates, kept = detections.len(), "YOLO inference");
        Ok(detections)
    }

    fn name(&self) -> &str {
        "yolo"
    }
}
