use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use collector_core::{
    models::{ConnectionParams, TaskOperation},
    CollectorError, CollectorResult,
};

use crate::transport::{OperationOutput, SessionTransport};

/// SSH族采集服务的传输实现
///
/// 三种SSH采集服务（paramiko、netmiko、原生实现）暴露相同的
/// connect/execute/disconnect契约，只是端点不同；会话句柄由
/// 远端服务颁发并在多次执行间保持。
pub struct SshServiceTransport {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ConnectReply {
    connection_id: String,
}

#[derive(Debug, Deserialize)]
struct ExecuteReply {
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    exit_status: i32,
}

impl SshServiceTransport {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl SessionTransport for SshServiceTransport {
    async fn open(&self, params: &ConnectionParams) -> CollectorResult<String> {
        let body = json!({
            "host": params.host,
            "port": params.port,
            "username": params.username,
            "password": params.password,
        });

        let response = self
            .client
            .post(self.url("/connect"))
            .json(&body)
            .send()
            .await
            .map_err(|e| CollectorError::Connection {
                message: format!("SSH采集服务不可达: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(CollectorError::Connection {
                message: format!("SSH连接建立失败 ({status}): {detail}"),
            });
        }

        let reply: ConnectReply =
            response
                .json()
                .await
                .map_err(|e| CollectorError::Connection {
                    message: format!("解析连接响应失败: {e}"),
                })?;

        debug!(
            "SSH会话建立: {}@{}:{} -> {}",
            params.username, params.host, params.port, reply.connection_id
        );
        Ok(reply.connection_id)
    }

    async fn run(
        &self,
        remote_id: &str,
        _params: &ConnectionParams,
        operation: &TaskOperation,
    ) -> CollectorResult<OperationOutput> {
        let TaskOperation::Command { command } = operation else {
            return Err(CollectorError::InvalidOperation(
                "SSH采集只支持command类型操作".to_string(),
            ));
        };

        let body = json!({
            "connection_id": remote_id,
            "command": command,
        });

        let response = self
            .client
            .post(self.url("/execute"))
            .json(&body)
            .send()
            .await
            .map_err(|e| CollectorError::Transport(format!("执行命令失败: {e}")))?;

        if !response.status().is_success() {
            return Err(CollectorError::Transport(format!(
                "SSH执行返回状态码 {}",
                response.status()
            )));
        }

        let reply: ExecuteReply = response
            .json()
            .await
            .map_err(|e| CollectorError::Transport(format!("解析执行响应失败: {e}")))?;

        if reply.exit_status == 0 {
            Ok(OperationOutput::ok(reply.output))
        } else {
            let error = if reply.error.is_empty() {
                format!("命令退出码 {}", reply.exit_status)
            } else {
                reply.error
            };
            Ok(OperationOutput {
                success: false,
                output: Some(reply.output),
                error: Some(error),
            })
        }
    }

    async fn close(&self, remote_id: &str) {
        let body = json!({ "connection_id": remote_id });
        if let Err(e) = self
            .client
            .post(self.url("/disconnect"))
            .json(&body)
            .send()
            .await
        {
            warn!("断开SSH会话 {} 失败: {}", remote_id, e);
        }
    }
}
