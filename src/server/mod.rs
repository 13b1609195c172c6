/// HTTP 接口 (axum)
///
/// | 路径 | 方法 | 说明 |
/// |---|---|---|
/// | `/` | GET | 应用信息与接口索引 |
/// | `/health` | GET | 存活检查 |
/// | `/detect` | POST | 单张图片检测 (multipart, 字段 `file`) |
/// | `/stream` | GET | Motion-JPEG 推流 |
/// | `/model/info` | GET | 模型元信息 |
/// | `/config/model` | GET | 模型配置 + 当前管线配置快照 |
/// | `/config/deployment` | GET | 部署配置 |
/// | `/config/update` | POST | 运行时更新阈值 |
pub mod handlers;
pub mod hub;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::warn;

pub use hub::{SourceFactory, StreamHub};

use crate::config::{AppConfig, ConfigHandle};
use crate::detection::DetectionAdapter;
use crate::error::{ConfigValidationError, InferenceError, SourceOpenError};
use crate::models::SharedModel;
use crate::renderer::HudRenderer;

/// 所有请求共享的状态
#[derive(Clone)]
pub struct AppState {
    pub app: Arc<AppConfig>,
    pub config: ConfigHandle,
    pub adapter: DetectionAdapter,
    pub hub: StreamHub,
}

impl AppState {
    pub fn new(app: AppConfig, model: SharedModel) -> Result<Self, ConfigValidationError> {
        let config = ConfigHandle::new(app.pipeline.clone())?;
        let timeout = app
            .model
            .inference_timeout_ms
            .map(std::time::Duration::from_millis);
        // /detect 与每条推流管线各有一份跟踪状态
        let adapter = DetectionAdapter::new(model)
            .with_timeout(timeout)
            .with_tracking(app.model.tracking);
        let renderer = HudRenderer::from_config(&app.pipeline);
        let hub = StreamHub::new(
            app.deployment.source.clone(),
            adapter.clone(),
            config.clone(),
            renderer,
        )
        .with_capacity(app.deployment.broadcast_capacity)
        .with_quality(app.deployment.jpeg_quality);
        Ok(Self {
            app: Arc::new(app),
            config,
            adapter,
            hub,
        })
    }

    pub fn with_hub(mut self, hub: StreamHub) -> Self {
        self.hub = hub;
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/detect", post(handlers::detect))
        .route("/stream", get(handlers::stream))
        .route("/model/info", get(handlers::model_info))
        .route("/config/model", get(handlers::model_config))
        .route("/config/deployment", get(handlers::deployment_config))
        .route("/config/update", post(handlers::update_config))
        .with_state(state)
}

/// JSON 错误响应 `{error, detail}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>, detail: impl ToString) -> Self {
        Self {
            status,
            error: error.into(),
            detail: detail.to_string(),
        }
    }

    pub fn bad_request(error: impl Into<String>, detail: impl ToString) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error, detail)
    }

    pub fn internal(error: impl Into<String>, detail: impl ToString) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("⚠️  请求失败 ({}): {}: {}", self.status, self.error, self.detail);
        let body = json!({ "error": self.error, "detail": self.detail });
        (self.status, Json(body)).into_response()
    }
}

impl From<InferenceError> for ApiError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::InvalidFrame(_) => Self::bad_request("invalid image", e),
            _ => Self::internal("inference failed", e),
        }
    }
}

impl From<ConfigValidationError> for ApiError {
    fn from(e: ConfigValidationError) -> Self {
        Self::bad_request("invalid configuration", e)
    }
}

impl From<SourceOpenError> for ApiError {
    fn from(e: SourceOpenError) -> Self {
        match e {
            SourceOpenError::ShuttingDown => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "shutting down", e)
            }
            _ => Self::new(StatusCode::NOT_FOUND, "source not available", e),
        }
    }
}
