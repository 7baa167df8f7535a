use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use collector_core::{
    models::{ConnectionParams, TaskOperation},
    CollectorError, CollectorResult,
};

use crate::transport::{OperationOutput, SessionTransport};

/// API采集的传输实现
///
/// HTTP请求由本进程直接发出，复用带keep-alive的客户端。
/// 会话句柄是本地生成的逻辑标识，用于统一走池化路径。
pub struct ApiTransport {
    client: reqwest::Client,
}

impl ApiTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ApiTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionTransport for ApiTransport {
    async fn open(&self, params: &ConnectionParams) -> CollectorResult<String> {
        // 无线上握手，颁发逻辑会话标识
        let session_id = format!("api-{}-{}", params.server_id, Uuid::new_v4());
        debug!("API逻辑会话建立: {}", session_id);
        Ok(session_id)
    }

    async fn run(
        &self,
        _remote_id: &str,
        _params: &ConnectionParams,
        operation: &TaskOperation,
    ) -> CollectorResult<OperationOutput> {
        let TaskOperation::ApiCall {
            url,
            method,
            headers,
            body,
        } = operation
        else {
            return Err(CollectorError::InvalidOperation(
                "API采集只支持api_call类型操作".to_string(),
            ));
        };

        let mut request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            "PATCH" => self.client.patch(url),
            "HEAD" => self.client.head(url),
            other => {
                return Err(CollectorError::InvalidOperation(format!(
                    "不支持的HTTP方法: {other}"
                )));
            }
        };

        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                CollectorError::Connection {
                    message: format!("API目标不可达: {e}"),
                }
            } else {
                CollectorError::Transport(format!("API请求失败: {e}"))
            }
        })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("读取响应体失败: {e}"));

        let output = format!(
            "HTTP {} {}\nStatus: {}\nResponse:\n{}",
            method.to_uppercase(),
            url,
            status.as_u16(),
            response_body
        );

        if status.is_success() {
            Ok(OperationOutput::ok(output))
        } else {
            Ok(OperationOutput {
                success: false,
                output: Some(output),
                error: Some(format!("HTTP请求失败，状态码: {}", status.as_u16())),
            })
        }
    }

    async fn close(&self, _remote_id: &str) {
        // 逻辑会话，无需远端断开
    }
}
