use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use collector_core::{
    models::WorkerDescriptor,
    traits::{CollectionRequest, CollectionResponse, WorkerInvoker},
    CollectorError, CollectorResult,
};

/// 经HTTP调用远端Worker的实现
///
/// 把统一的采集请求POST到Worker描述符携带的端点；
/// 请求超时在操作时限之上留出固定余量，保证调用永不无限阻塞。
pub struct HttpWorkerInvoker {
    client: reqwest::Client,
    /// 传输层在操作超时之上的余量（秒）
    grace_seconds: u64,
}

impl HttpWorkerInvoker {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            grace_seconds: 5,
        }
    }
}

impl Default for HttpWorkerInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerInvoker for HttpWorkerInvoker {
    async fn invoke(
        &self,
        worker: &WorkerDescriptor,
        request: &CollectionRequest,
    ) -> CollectorResult<CollectionResponse> {
        let endpoint = worker.endpoint.as_ref().ok_or_else(|| {
            CollectorError::Transport(format!("Worker {} 没有配置HTTP端点", worker.id))
        })?;
        let url = format!("{}/api/v1/execute", endpoint.trim_end_matches('/'));

        debug!("HTTP调用Worker {}: {}", worker.id, url);

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(
                request.timeout_seconds + self.grace_seconds,
            ))
            .json(request)
            .send()
            .await
            .map_err(|e| CollectorError::Transport(format!("调用Worker失败: {e}")))?;

        if !response.status().is_success() {
            return Err(CollectorError::Transport(format!(
                "Worker {} 返回状态码 {}",
                worker.id,
                response.status()
            )));
        }

        response
            .json::<CollectionResponse>()
            .await
            .map_err(|e| CollectorError::Transport(format!("解析Worker响应失败: {e}")))
    }
}
