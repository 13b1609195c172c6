//! 单图检测响应 (JSON Responder)
//!
//! 一张图只跑一次 适配器 → 过滤器, 没有时间历史所以不做平滑.

use std::time::Duration;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::detection::{filter, Detection, DetectionAdapter, DetectionSet, Frame};
use crate::error::InferenceError;
use crate::utils::resize_frame;

/// 响应中的单个检测
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: String,
    pub class: String,
    pub confidence: f32,
    pub bbox: [i32; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u32>,
}

impl DetectionRecord {
    pub fn from_detection(det: &Detection, position: usize) -> Self {
        Self {
            id: det.unique_id(position),
            class: det.class_name.clone(),
            confidence: (det.confidence * 1000.0).round() / 1000.0,
            bbox: det.bbox.to_pixels(),
            track_id: det.track_id,
        }
    }
}

/// `/detect` 响应体
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectResponse {
    pub total_detections: usize,
    pub detections: Vec<DetectionRecord>,
    pub fps: f64,
}

impl DetectResponse {
    /// 瞬时 FPS = 推理耗时的倒数
    pub fn new(detections: &DetectionSet, latency: Duration) -> Self {
        let records: Vec<DetectionRecord> = detections
            .iter()
            .enumerate()
            .map(|(pos, det)| DetectionRecord::from_detection(det, pos))
            .collect();
        let secs = latency.as_secs_f64().max(1e-6);
        Self {
            total_detections: records.len(),
            detections: records,
            fps: 1.0 / secs,
        }
    }
}

#[derive(Clone)]
pub struct JsonResponder {
    adapter: DetectionAdapter,
}

impl JsonResponder {
    pub fn new(adapter: DetectionAdapter) -> Self {
        Self { adapter }
    }

    pub fn respond(
        &self,
        image: RgbImage,
        config: &PipelineConfig,
    ) -> Result<DetectResponse, InferenceError> {
        let frame = Frame::new(0, image);
        if frame.width() == 0 || frame.height() == 0 {
            return Err(InferenceError::InvalidFrame("empty image".into()));
        }
        let frame = resize_frame(frame, config.frame_resize_limits);
        let (raw, latency) = self.adapter.infer_timed(&frame, config)?;
        let kept = filter(&raw, config);
        Ok(DetectResponse::new(&kept, latency))
    }
}
