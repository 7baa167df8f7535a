//! Worker调用边界的HTTP承载
//!
//! 统一契约 `{连接参数, 操作, 超时} -> {输出 | 错误, 耗时}` 的
//! HTTP形态：POST /api/v1/execute。健康端点报告各实例的在途
//! 计数与池中会话数。

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, info};

use collector_core::{
    traits::{CollectionRequest, CollectionResponse},
    CollectorError, CollectorResult,
};

use crate::service::WorkerService;

/// HTTP执行面的共享状态
#[derive(Clone)]
pub struct WorkerServerState {
    services: Arc<Vec<Arc<WorkerService>>>,
}

impl WorkerServerState {
    pub fn new(services: Vec<Arc<WorkerService>>) -> Self {
        Self {
            services: Arc::new(services),
        }
    }
}

pub fn build_router(state: WorkerServerState) -> Router {
    Router::new()
        .route("/api/v1/execute", post(execute_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn execute_handler(
    State(state): State<WorkerServerState>,
    Json(request): Json<CollectionRequest>,
) -> Result<Json<CollectionResponse>, (StatusCode, String)> {
    let service = state
        .services
        .iter()
        .find(|s| s.protocol() == request.params.protocol_type)
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("本Worker不承载协议 {}", request.params.protocol_type),
            )
        })?;

    match service.execute(&request).await {
        Ok(response) => Ok(Json(response)),
        Err(e @ CollectorError::InvalidOperation(_)) => {
            Err((StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e) => {
            error!("执行请求处理失败: {e}");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn health_handler(State(state): State<WorkerServerState>) -> Json<serde_json::Value> {
    let workers: Vec<serde_json::Value> = state
        .services
        .iter()
        .map(|s| {
            json!({
                "worker_id": s.worker_id(),
                "protocol": s.protocol().as_str(),
                "in_flight": s.in_flight(),
                "active_sessions": s.active_sessions(),
            })
        })
        .collect();

    Json(json!({
        "status": "healthy",
        "service": "collector-worker",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "workers": workers,
    }))
}

/// 启动HTTP执行面，直到收到关闭信号
pub async fn serve(
    listen_addr: &str,
    state: WorkerServerState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> CollectorResult<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|e| CollectorError::Configuration(format!("监听 {listen_addr} 失败: {e}")))?;

    info!("Worker HTTP执行面监听于 {listen_addr}");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|e| CollectorError::Internal(format!("HTTP服务异常退出: {e}")))
}
