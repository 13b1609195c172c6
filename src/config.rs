//! 运行配置 - 通过JSON文件调整参数, 运行时原子替换
//!
//! [`PipelineConfig`] 是不可变快照. 运行时更新先克隆再校验,
//! 校验通过后整体替换 [`ConfigHandle`] 中的 `Arc`, 读者永远看不到半更新状态.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::Rgb;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConfigError, ConfigValidationError};
use crate::renderer::palette;

/// 轨迹最大存活帧数上限
pub const MAX_TRACK_AGE_LIMIT: u32 = 1000;

/// 帧尺寸上限 (超过则等比缩小, 不放大)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeLimits {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for ResizeLimits {
    fn default() -> Self {
        Self {
            max_width: 1280,
            max_height: 720,
        }
    }
}

/// 调色板类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Palette {
    /// 固定高亮色表 (10色)
    #[default]
    Bright,
    /// 黄金角度采样
    GoldenAngle,
}

/// 类别配色 (Color assignment)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorAssignment {
    pub palette: Palette,
    /// 类别名 → RGB, 优先于调色板
    pub overrides: BTreeMap<String, [u8; 3]>,
}

impl ColorAssignment {
    /// 同一类别在一次运行中永远同色
    pub fn color_for(&self, class_id: u32, class_name: &str) -> Rgb<u8> {
        if let Some(rgb) = self.overrides.get(class_name) {
            return Rgb(*rgb);
        }
        match self.palette {
            Palette::Bright => palette::bright(class_id),
            Palette::GoldenAngle => palette::golden_angle(class_id),
        }
    }
}

/// 管线参数快照 (PipelineConfig)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // === 检测过滤 ===
    #[serde(alias = "conf_threshold")]
    pub confidence_threshold: f32, // 置信度阈值
    pub iou_threshold: f32,          // 同类去重IOU阈值
    pub allowed_classes: BTreeSet<String>, // 空 = 不限类别
    pub max_detections: usize,       // 去重后最多保留

    // === 轨迹平滑 ===
    pub max_track_age: u32,       // 丢失多少帧后删除轨迹
    pub max_track_history: usize, // 每条轨迹保留的历史框

    // === 渲染 / 统计 ===
    pub frame_resize_limits: ResizeLimits,
    pub color_assignment: ColorAssignment,
    pub fps_window: usize,
    pub font_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            allowed_classes: BTreeSet::new(),
            max_detections: 300,
            max_track_age: 5,
            max_track_history: 5,
            frame_resize_limits: ResizeLimits::default(),
            color_assignment: ColorAssignment::default(),
            fps_window: 30,
            font_path: None,
        }
    }
}

fn check_unit(field: &'static str, value: f32) -> Result<(), ConfigValidationError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ConfigValidationError::new(
            field,
            format!("{value} is outside [0, 1]"),
        ));
    }
    Ok(())
}

impl PipelineConfig {
    /// 校验全部字段
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        check_unit("confidence_threshold", self.confidence_threshold)?;
        check_unit("iou_threshold", self.iou_threshold)?;
        if self.max_track_age > MAX_TRACK_AGE_LIMIT {
            return Err(ConfigValidationError::new(
                "max_track_age",
                format!("{} exceeds {MAX_TRACK_AGE_LIMIT}", self.max_track_age),
            ));
        }
        if self.max_track_history == 0 {
            return Err(ConfigValidationError::new("max_track_history", "must be >= 1"));
        }
        if self.max_detections == 0 {
            return Err(ConfigValidationError::new("max_detections", "must be >= 1"));
        }
        let limits = self.frame_resize_limits;
        if limits.max_width == 0 || limits.max_height == 0 {
            return Err(ConfigValidationError::new(
                "frame_resize_limits",
                "width and height must be > 0",
            ));
        }
        if self.fps_window < 2 {
            return Err(ConfigValidationError::new("fps_window", "must be >= 2"));
        }
        Ok(())
    }

    /// 类别是否通过白名单
    pub fn allows(&self, class_name: &str) -> bool {
        self.allowed_classes.is_empty() || self.allowed_classes.contains(class_name)
    }

    /// 生成应用了更新的新快照, 自身不变
    pub fn with_update(&self, update: &ConfigUpdate) -> Result<Self, ConfigValidationError> {
        let mut next = self.clone();
        if let Some(v) = update.confidence_threshold {
            next.confidence_threshold = v;
        }
        if let Some(v) = update.iou_threshold {
            next.iou_threshold = v;
        }
        if let Some(classes) = &update.allowed_classes {
            next.allowed_classes = classes.clone();
        }
        if let Some(v) = update.max_track_age {
            next.max_track_age = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// 运行时配置更新 (全部可选)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigUpdate {
    #[serde(alias = "conf_threshold")]
    pub confidence_threshold: Option<f32>,
    pub iou_threshold: Option<f32>,
    pub allowed_classes: Option<BTreeSet<String>>,
    pub max_track_age: Option<u32>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.confidence_threshold.is_none()
            && self.iou_threshold.is_none()
            && self.allowed_classes.is_none()
            && self.max_track_age.is_none()
    }
}

/// 共享配置句柄, 克隆开销为一个 `Arc`
#[derive(Clone, Debug)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<PipelineConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigValidationError> {
        config.validate()?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        })
    }

    /// 当前快照 (每帧开始时取一次)
    pub fn snapshot(&self) -> Arc<PipelineConfig> {
        Arc::clone(&self.current.read())
    }

    /// 校验后整体替换; 失败时旧快照继续生效
    pub fn update(&self, update: &ConfigUpdate) -> Result<Arc<PipelineConfig>, ConfigValidationError> {
        let mut guard = self.current.write();
        let next = Arc::new(guard.with_update(update)?);
        *guard = Arc::clone(&next);
        info!(
            "🎛️  配置已更新: conf={:.2} iou={:.2} classes={:?} max_age={}",
            next.confidence_threshold,
            next.iou_threshold,
            next.allowed_classes,
            next.max_track_age
        );
        Ok(next)
    }
}

/// 模型类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// 回放录制好的检测结果 (JSON)
    #[default]
    Replay,
    /// ONNX Runtime YOLOv8 (需要 `onnx` feature)
    Onnx,
}

/// 模型配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub name: String,
    pub kind: ModelKind,
    pub path: Option<PathBuf>,
    pub input_size: u32,
    /// 覆盖默认 COCO 类别表
    pub classes: Option<Vec<String>>,
    /// 为模型补充 IOU 跟踪器分配的 track id
    pub tracking: bool,
    pub inference_timeout_ms: Option<u64>,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            name: "yolov8n".to_string(),
            kind: ModelKind::Replay,
            path: None,
            input_size: 640,
            classes: None,
            tracking: true,
            inference_timeout_ms: None,
        }
    }
}

/// 部署配置 (API / 视频源 / 推流)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub environment: String,
    pub host: String,
    pub port: u16,
    /// `/stream` 使用的视频源
    pub source: String,
    pub output: Option<PathBuf>,
    pub jpeg_quality: u8,
    pub broadcast_capacity: usize,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            source: "0".to_string(),
            output: None,
            jpeg_quality: 80,
            broadcast_capacity: 4,
        }
    }
}

/// 配置文件整体
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelSection,
    pub pipeline: PipelineConfig,
    pub deployment: DeploymentConfig,
}

impl AppConfig {
    /// 读取配置文件, 不存在时返回 `None` 且不写任何文件
    ///
    /// 内容无法解析或校验失败时记录警告并使用默认值, 原文件保持不动.
    pub fn read(path: impl AsRef<Path>) -> Result<Option<Self>, ConfigError> {
        let path = path.as_ref();
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config = match serde_json::from_str::<AppConfig>(&json) {
            Ok(config) => match config.pipeline.validate() {
                Ok(()) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置校验失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                Self::default()
            }
        };
        Ok(Some(config))
    }

    /// 从文件加载, 文件不存在则写出默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if let Some(config) = Self::read(path)? {
            return Ok(config);
        }
        info!("📝 配置文件不存在,创建默认配置...");
        let config = Self::default();
        if let Err(e) = config.save(path) {
            warn!("❌ 保存配置失败: {}", e);
        }
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    pub fn print_summary(&self) {
        let p = &self.pipeline;
        info!("🎛️  当前配置:");
        info!("  模型: {} ({:?})", self.model.name, self.model.kind);
        info!("  检测置信度: {:.2}", p.confidence_threshold);
        info!("  去重IOU: {:.2}", p.iou_threshold);
        if p.allowed_classes.is_empty() {
            info!("  类别白名单: (全部)");
        } else {
            info!("  类别白名单: {:?}", p.allowed_classes);
        }
        info!("  轨迹最大丢失帧: {}", p.max_track_age);
        info!(
            "  帧尺寸上限: {}x{}",
            p.frame_resize_limits.max_width, p.frame_resize_limits.max_height
        );
        info!("  视频源: {}", self.deployment.source);
    }
}
