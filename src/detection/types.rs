/// 检测管线数据结构定义
/// Data structures shared by every pipeline stage
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

// ========== 数据结构 ==========

/// 检测框 (Detection bounding box), 像素坐标, `x1 < x2`, `y1 < y2`
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_array([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 中心点 + 宽高
    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// 坐标有限且顺序正确
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x1 < self.x2
            && self.y1 < self.y2
    }

    /// 计算IOU (Intersection over Union)
    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// 裁剪到 `width x height` 画面内, 完全在画面外返回 None
    pub fn clip(&self, width: u32, height: u32) -> Option<BBox> {
        let (w, h) = (width as f32, height as f32);
        let clipped = BBox {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        };
        clipped.is_valid().then_some(clipped)
    }

    /// 按比例缩放 (帧缩放后坐标映射)
    pub fn scale(&self, sx: f32, sy: f32) -> BBox {
        BBox {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
        }
    }

    /// 整数像素坐标 `[x1, y1, x2, y2]`
    pub fn to_pixels(&self) -> [i32; 4] {
        [
            self.x1.round() as i32,
            self.y1.round() as i32,
            self.x2.round() as i32,
            self.y2.round() as i32,
        ]
    }
}

/// 单个检测结果 (Detection)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class_id: u32,
    pub class_name: String,
    /// 跟踪ID, 跨帧稳定
    pub track_id: Option<u32>,
    /// 由平滑器补出的框 (本帧未检测到)
    #[serde(default)]
    pub interpolated: bool,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f32, class_id: u32, class_name: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
            class_name: class_name.into(),
            track_id: None,
            interpolated: false,
        }
    }

    pub fn with_track(mut self, track_id: u32) -> Self {
        self.track_id = Some(track_id);
        self
    }

    /// 展示用唯一标识: `ID-7-P` (有跟踪ID) / `DET-0-C` (按序号)
    pub fn unique_id(&self, position: usize) -> String {
        let initial = self
            .class_name
            .chars()
            .next()
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or('?');
        match self.track_id {
            Some(id) => format!("ID-{id}-{initial}"),
            None => format!("DET-{position}-{initial}"),
        }
    }
}

/// 一帧的检测结果集合 (有序)
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionSet {
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    pub detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new(frame_index: u64, timestamp: DateTime<Utc>, detections: Vec<Detection>) -> Self {
        Self {
            frame_index,
            timestamp,
            detections,
        }
    }

    /// 同帧元数据, 新的检测列表
    pub fn with_detections(&self, detections: Vec<Detection>) -> Self {
        Self {
            frame_index: self.frame_index,
            timestamp: self.timestamp,
            detections,
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    /// 按类别计数
    pub fn counts_by_class(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for det in &self.detections {
            *counts.entry(det.class_name.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// 当前活跃的唯一标识列表
    pub fn active_ids(&self) -> Vec<String> {
        self.detections
            .iter()
            .enumerate()
            .map(|(pos, det)| det.unique_id(pos))
            .collect()
    }
}

/// 视频帧 (Frame), 下游只读
#[derive(Clone, Debug)]
pub struct Frame {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self {
            index,
            timestamp: Utc::now(),
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// 每帧统计 (FPS + 类别计数)
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub fps: f64,
    pub detection_count: usize,
    pub counts_by_class: BTreeMap<String, usize>,
}

impl PipelineStats {
    pub fn new(fps: f64, detections: &DetectionSet) -> Self {
        Self {
            fps,
            detection_count: detections.len(),
            counts_by_class: detections.counts_by_class(),
        }
    }
}
