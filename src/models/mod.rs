/// 模型统一接口与实现
///
/// # 架构说明
///
/// 管线只依赖 [`DetectionModel`] trait: 给定一帧和阈值, 返回原始候选框.
/// 具体实现:
/// - **ReplayModel**: 回放录制好的检测结果 (JSON), 离线调试与测试用
/// - **YOLOv8**: ONNX Runtime 推理 (`onnx` feature)
///
/// ## 使用示例
/// ```no_run
/// use morph1x::config::ModelSection;
/// use morph1x::models;
///
/// let model = models::load_model(&ModelSection::default()).unwrap();
/// let shared = models::shared(model);
/// ```
///
/// 跟踪不属于模型: 每条管线在自己的 `DetectionAdapter` 上开启.
use std::sync::Arc;

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ModelKind, ModelSection};
use crate::detection::Frame;

pub mod replay;
#[cfg(feature = "onnx")]
pub mod yolov8;

pub use replay::ReplayModel;
#[cfg(feature = "onnx")]
pub use yolov8::YOLOv8;

/// 推理阈值
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub confidence: f32,
    pub iou: f32,
}

/// 模型原始输出 (未校验)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// `[x1, y1, x2, y2]` 像素坐标
    pub bbox: [f32; 4],
    pub class_id: u32,
    pub confidence: f32,
    #[serde(default)]
    pub track_id: Option<u32>,
}

/// 模型元信息
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub task: String,
    pub input_size: u32,
    pub num_classes: usize,
    pub classes: Vec<String>,
    pub tracking: bool,
}

/// 检测模型能力接口
///
/// 实现方不必线程安全, 共享时由 [`SharedModel`] 串行化调用.
pub trait DetectionModel: Send {
    /// 单帧推理
    fn infer(&mut self, frame: &Frame, thresholds: Thresholds) -> Result<Vec<RawDetection>>;

    /// 类别表
    fn class_names(&self) -> &[String];

    fn info(&self) -> ModelInfo;

    fn class_name(&self, class_id: u32) -> Option<&str> {
        self.class_names().get(class_id as usize).map(String::as_str)
    }
}

/// 多个管线共享一个模型实例, 调用经互斥锁串行化
pub type SharedModel = Arc<Mutex<Box<dyn DetectionModel>>>;

pub fn shared(model: Box<dyn DetectionModel>) -> SharedModel {
    Arc::new(Mutex::new(model))
}

/// 根据配置加载模型
pub fn load_model(section: &ModelSection) -> Result<Box<dyn DetectionModel>> {
    let classes = section.classes.clone().unwrap_or_else(|| COCO_CLASSES.clone());

    let model: Box<dyn DetectionModel> = match section.kind {
        ModelKind::Replay => {
            let replay = match &section.path {
                Some(path) => ReplayModel::from_json_file(path)?,
                None => ReplayModel::empty(&section.name, classes.clone()),
            };
            Box::new(replay)
        }
        ModelKind::Onnx => load_onnx(section, classes.clone())?,
    };

    let info = model.info();
    info!(
        "✅ 模型已加载: {} ({} 类, 跟踪: {})",
        info.name,
        info.num_classes,
        info.tracking || section.tracking
    );
    Ok(model)
}

#[cfg(feature = "onnx")]
fn load_onnx(section: &ModelSection, classes: Vec<String>) -> Result<Box<dyn DetectionModel>> {
    let Some(path) = &section.path else {
        bail!("onnx model requires a path");
    };
    Ok(Box::new(YOLOv8::new(path, section.input_size, classes)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(_section: &ModelSection, _classes: Vec<String>) -> Result<Box<dyn DetectionModel>> {
    bail!("onnx support not compiled in, rebuild with --features onnx")
}

/// 默认 COCO 80 类
pub static COCO_CLASSES: Lazy<Vec<String>> = Lazy::new(|| {
    [
        "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
        "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
        "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
        "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
        "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
        "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
        "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
        "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
        "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
        "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
        "toothbrush",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coco_table() {
        assert_eq!(COCO_CLASSES.len(), 80);
        assert_eq!(COCO_CLASSES[0], "person");
        assert_eq!(COCO_CLASSES[79], "toothbrush");
    }

    #[test]
    fn test_load_default_replay() {
        let model = load_model(&ModelSection::default()).unwrap();
        let info = model.info();
        assert!(!info.tracking);
        assert_eq!(info.num_classes, 80);
        assert_eq!(model.class_name(2), Some("car"));
        assert_eq!(model.class_name(200), None);
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_onnx_requires_feature() {
        let section = ModelSection {
            kind: ModelKind::Onnx,
            ..Default::default()
        };
        assert!(load_model(&section).is_err());
    }
}
