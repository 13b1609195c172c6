//! 路由处理函数

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use super::{ApiError, AppState};
use crate::config::{ConfigUpdate, DeploymentConfig, PipelineConfig};
use crate::models::ModelInfo;
use crate::sinks::{DetectResponse, JsonResponder, MJPEG_CONTENT_TYPE};

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn root() -> Json<Value> {
    Json(json!({
        "application": "Morph1x - Intelligent Vision System",
        "version": VERSION,
        "endpoints": {
            "GET /health": "Health check",
            "POST /detect": "Detect objects in image",
            "GET /stream": "Stream video with detections",
            "GET /model/info": "Get model information",
            "GET /config/model": "Get model configuration",
            "GET /config/deployment": "Get deployment configuration",
            "POST /config/update": "Update configuration",
        }
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let model = state.adapter.info().name;
    Json(json!({ "status": "ok", "model": model, "version": VERSION }))
}

/// 单张图片检测, 推理放到阻塞线程池
pub async fn detect(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<DetectResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request("invalid multipart body", e))?
    {
        let is_file = field.name() == Some("file") || field.file_name().is_some();
        if !is_file {
            continue;
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request("invalid multipart body", e))?;
        upload = Some(data);
        break;
    }
    let data = upload.ok_or_else(|| {
        ApiError::bad_request("missing image", "expected a multipart file field named 'file'")
    })?;

    let image = image::load_from_memory(&data)
        .map_err(|e| ApiError::bad_request("invalid image", e))?
        .to_rgb8();
    debug!("/detect {}x{}", image.width(), image.height());

    let config = state.config.snapshot();
    let responder = JsonResponder::new(state.adapter.clone());
    let response = tokio::task::spawn_blocking(move || responder.respond(image, &config))
        .await
        .map_err(|e| ApiError::internal("inference task failed", e))??;
    Ok(Json(response))
}

/// `multipart/x-mixed-replace` 推流, 所有观看者共享一条管线
pub async fn stream(State(state): State<AppState>) -> Result<Response, ApiError> {
    let rx = state.hub.subscribe()?;
    info!("👀 新的推流观看者");
    // 落后的观看者直接跳过丢失的帧
    let frames = BroadcastStream::new(rx).filter_map(|chunk| chunk.ok().map(Ok::<_, Infallible>));
    Ok((
        [(header::CONTENT_TYPE, MJPEG_CONTENT_TYPE)],
        Body::from_stream(frames),
    )
        .into_response())
}

pub async fn model_info(State(state): State<AppState>) -> Json<ModelInfo> {
    Json(state.adapter.info())
}

pub async fn model_config(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.config.snapshot();
    Json(json!({ "model": &state.app.model, "pipeline": &*snapshot }))
}

pub async fn deployment_config(State(state): State<AppState>) -> Json<DeploymentConfig> {
    Json(state.app.deployment.clone())
}

/// 校验后原子替换配置快照, 返回新快照
pub async fn update_config(
    State(state): State<AppState>,
    payload: Result<Json<ConfigUpdate>, JsonRejection>,
) -> Result<Json<PipelineConfig>, ApiError> {
    let Json(update) = payload.map_err(|e| ApiError::bad_request("invalid request body", e.body_text()))?;
    let next = state.config.update(&update)?;
    Ok(Json((*next).clone()))
}
