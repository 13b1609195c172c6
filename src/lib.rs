#![allow(clippy::type_complexity)]
//! Morph1x: 实时检测管线
//!
//! 帧源 → 检测适配器 → 结果过滤 → 轨迹平滑 → HUD 渲染 → 输出端,
//! 由 [`pipeline::Pipeline`] 以状态机驱动; [`server`] 提供 HTTP 接口.
pub mod config; // 配置与运行时快照
pub mod detection; // 检测 / 过滤 / 平滑 / 跟踪
pub mod error; // 错误类型
pub mod input; // 帧源
pub mod logging;
pub mod models; // 模型接口与具体实现
pub mod pipeline; // 管线编排
pub mod renderer; // HUD 渲染
pub mod server; // HTTP API
pub mod sinks; // 输出端
pub mod utils;

pub use crate::config::{AppConfig, ConfigHandle, ConfigUpdate, PipelineConfig};
pub use crate::detection::{BBox, Detection, DetectionAdapter, DetectionSet, Frame, PipelineStats};
pub use crate::error::{
    ConfigError, ConfigValidationError, DimensionMismatchError, FrameReadError, InferenceError,
    PipelineError, SinkError, SourceOpenError,
};
pub use crate::models::{DetectionModel, RawDetection, SharedModel};
pub use crate::pipeline::{Command, Pipeline, PipelineState, RunSummary, StopReason};
pub use crate::renderer::HudRenderer;
