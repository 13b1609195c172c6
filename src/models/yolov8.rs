// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! YOLOv8 检测模型 (ONNX Runtime)
//!
//! 输入 `images`: [1, 3, S, S], 左上角对齐的 letterbox
//! 输出 `output0`: [1, 4 + nc, anchors], 每列 (cx, cy, w, h, class scores...)

use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{Array4, Axis};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tracing::debug;

use super::{DetectionModel, ModelInfo, RawDetection, Thresholds};
use crate::detection::{BBox, Frame};

const CXYWH_OFFSET: usize = 4;

pub struct YOLOv8 {
    session: Session,
    name: String,
    input_size: u32,
    classes: Vec<String>,
}

impl YOLOv8 {
    pub fn new(path: impl AsRef<Path>, input_size: u32, classes: Vec<String>) -> Result<Self> {
        let path = path.as_ref();
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)
            .with_context(|| format!("failed to load onnx model {}", path.display()))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "yolov8".to_string());
        Ok(Self {
            session,
            name,
            input_size,
            classes,
        })
    }

    fn scale_wh(&self, w0: f32, h0: f32) -> (f32, u32, u32) {
        let s = self.input_size as f32;
        let r = (s / w0).min(s / h0);
        (r, (w0 * r).round().max(1.0) as u32, (h0 * r).round().max(1.0) as u32)
    }

    /// 预处理: 等比缩放, 右下填充灰色, 归一化到 [0, 1]
    fn preprocess(&self, image: &RgbImage) -> (Array4<f32>, f32) {
        let size = self.input_size as usize;
        let (ratio, w_new, h_new) = self.scale_wh(image.width() as f32, image.height() as f32);
        let resized = image::imageops::resize(image, w_new, h_new, FilterType::Triangle);

        let mut input = Array4::from_elem((1, 3, size, size), 144.0 / 255.0);
        for (x, y, rgb) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = rgb.0;
            input[[0, 0, y, x]] = r as f32 / 255.0;
            input[[0, 1, y, x]] = g as f32 / 255.0;
            input[[0, 2, y, x]] = b as f32 / 255.0;
        }
        (input, ratio)
    }
}

impl DetectionModel for YOLOv8 {
    fn infer(&mut self, frame: &Frame, thresholds: Thresholds) -> Result<Vec<RawDetection>> {
        let t_pre = Instant::now();
        let (input, ratio) = self.preprocess(&frame.image);
        debug!("[Model Preprocess]: {:?}", t_pre.elapsed());

        let t_run = Instant::now();
        let nc = self.classes.len();
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs!["images" => tensor])
            .context("yolov8 inference failed")?;
        let preds: ndarray::ArrayViewD<f32> = outputs["output0"]
            .try_extract_array()
            .context("failed to extract output0")?;
        debug!("[Model Inference]: {:?}", t_run.elapsed());

        let shape = preds.shape().to_vec();
        if shape.len() != 3 || shape[1] != CXYWH_OFFSET + nc {
            bail!("unexpected output shape {:?} for {} classes", shape, nc);
        }

        let (w0, h0) = (frame.width() as f32, frame.height() as f32);
        let mut candidates: Vec<RawDetection> = Vec::new();
        for pred in preds.index_axis(Axis(0), 0).axis_iter(Axis(1)) {
            let Some((class_id, confidence)) = pred
                .iter()
                .skip(CXYWH_OFFSET)
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                continue;
            };
            if confidence < thresholds.confidence {
                continue;
            }

            let cx = pred[0] / ratio;
            let cy = pred[1] / ratio;
            let w = pred[2] / ratio;
            let h = pred[3] / ratio;
            let bbox = BBox::from_cxcywh(cx, cy, w, h).clip(w0 as u32, h0 as u32);
            if let Some(bbox) = bbox {
                candidates.push(RawDetection {
                    bbox: [bbox.x1, bbox.y1, bbox.x2, bbox.y2],
                    class_id: class_id as u32,
                    confidence,
                    track_id: None,
                });
            }
        }

        Ok(non_max_suppression(candidates, thresholds.iou))
    }

    fn class_names(&self) -> &[String] {
        &self.classes
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: self.name.clone(),
            task: "detect".to_string(),
            input_size: self.input_size,
            num_classes: self.classes.len(),
            classes: self.classes.clone(),
            tracking: false,
        }
    }
}

/// 同类别NMS, 输出按置信度降序
fn non_max_suppression(mut xs: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<RawDetection> = Vec::with_capacity(xs.len());
    for x in xs {
        let bbox = BBox::from_array(x.bbox);
        let drop = kept
            .iter()
            .any(|k| k.class_id == x.class_id && BBox::from_array(k.bbox).iou(&bbox) > iou_threshold);
        if !drop {
            kept.push(x);
        }
    }
    kept
}
