//! 回放模型 (Replay model)
//!
//! 按帧序号回放录制好的检测结果, 不做任何推理.
//!
//! 文件格式:
//! ```json
//! {
//!   "name": "street-cam",
//!   "classes": ["person", "bicycle", "car"],
//!   "frames": [
//!     { "frame": 0, "detections": [ { "bbox": [10, 20, 50, 80], "class_id": 0, "confidence": 0.91, "track_id": 1 } ] }
//!   ],
//!   "fail_frames": [42]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::{DetectionModel, ModelInfo, RawDetection, Thresholds, COCO_CLASSES};
use crate::detection::Frame;

#[derive(Deserialize)]
struct ReplayFile {
    #[serde(default = "default_name")]
    name: String,
    #[serde(default)]
    classes: Option<Vec<String>>,
    #[serde(default)]
    frames: Vec<ReplayFrame>,
    #[serde(default)]
    fail_frames: BTreeSet<u64>,
}

#[derive(Deserialize)]
struct ReplayFrame {
    frame: u64,
    #[serde(default)]
    detections: Vec<RawDetection>,
}

fn default_name() -> String {
    "replay".to_string()
}

/// 回放模型
#[derive(Clone, Debug)]
pub struct ReplayModel {
    name: String,
    classes: Vec<String>,
    frames: BTreeMap<u64, Vec<RawDetection>>,
    fail_frames: BTreeSet<u64>,
    delay: Option<Duration>,
    calls: u64,
}

impl ReplayModel {
    /// 不产生任何检测
    pub fn empty(name: &str, classes: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            classes,
            frames: BTreeMap::new(),
            fail_frames: BTreeSet::new(),
            delay: None,
            calls: 0,
        }
    }

    /// 第 i 个元素对应帧序号 i
    pub fn scripted(frames: Vec<Vec<RawDetection>>) -> Self {
        let mut model = Self::empty("scripted", COCO_CLASSES.clone());
        model.frames = frames.into_iter().enumerate().map(|(i, d)| (i as u64, d)).collect();
        model
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: ReplayFile = serde_json::from_str(json).context("invalid replay file")?;
        let mut model = Self::empty(&file.name, file.classes.unwrap_or_else(|| COCO_CLASSES.clone()));
        for frame in file.frames {
            model.frames.entry(frame.frame).or_default().extend(frame.detections);
        }
        model.fail_frames = file.fail_frames;
        Ok(model)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("cannot read replay file {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn with_classes(mut self, classes: Vec<String>) -> Self {
        self.classes = classes;
        self
    }

    /// 指定帧推理失败
    pub fn with_failure(mut self, frame: u64) -> Self {
        self.fail_frames.insert(frame);
        self
    }

    /// 每次推理额外耗时
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已被调用的次数
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectionModel for ReplayModel {
    fn infer(&mut self, frame: &Frame, _thresholds: Thresholds) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.fail_frames.contains(&frame.index) {
            bail!("replay failure injected at frame {}", frame.index);
        }
        // 录制结果原样返回, 阈值由下游过滤器处理
        Ok(self.frames.get(&frame.index).cloned().unwrap_or_default())
    }

    fn class_names(&self) -> &[String] {
        &self.classes
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: self.name.clone(),
            task: "detect".to_string(),
            input_size: 0,
            num_classes: self.classes.len(),
            classes: self.classes.clone(),
            tracking: false,
        }
    }
}
