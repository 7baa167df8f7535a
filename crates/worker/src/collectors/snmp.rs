use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use collector_core::{
    models::{ConnectionParams, TaskOperation},
    CollectorError, CollectorResult,
};

use crate::transport::{OperationOutput, SessionTransport};

/// SNMP采集服务的传输实现
///
/// SNMP走UDP无长连接，采集服务按单次collect契约工作；
/// 会话句柄为本地逻辑标识，仅用于统一池化路径。
pub struct SnmpServiceTransport {
    base_url: String,
    client: reqwest::Client,
}

impl SnmpServiceTransport {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SessionTransport for SnmpServiceTransport {
    async fn open(&self, params: &ConnectionParams) -> CollectorResult<String> {
        let session_id = format!("snmp-{}-{}", params.server_id, Uuid::new_v4());
        debug!("SNMP逻辑会话建立: {}", session_id);
        Ok(session_id)
    }

    async fn run(
        &self,
        _remote_id: &str,
        params: &ConnectionParams,
        operation: &TaskOperation,
    ) -> CollectorResult<OperationOutput> {
        let (oid, community, port, op_name) = match operation {
            TaskOperation::SnmpGet {
                oid,
                community,
                port,
            } => (oid, community, port, "get"),
            TaskOperation::SnmpWalk {
                oid,
                community,
                port,
            } => (oid, community, port, "walk"),
            _ => {
                return Err(CollectorError::InvalidOperation(
                    "SNMP采集只支持snmp_get/snmp_walk类型操作".to_string(),
                ));
            }
        };

        let body = json!({
            "host": params.host,
            "community": community,
            "oid": oid,
            "port": port,
            "operation": op_name,
        });

        let response = self
            .client
            .post(format!("{}/collect", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| CollectorError::Connection {
                message: format!("SNMP采集服务不可达: {e}"),
            })?;

        let status = response.status();
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CollectorError::Transport(format!("解析SNMP响应失败: {e}")))?;

        if !status.is_success() {
            let error = payload
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("未知错误")
                .to_string();
            return Ok(OperationOutput::err(format!("SNMP {op_name} 失败: {error}")));
        }

        Ok(OperationOutput::ok(payload.to_string()))
    }

    async fn close(&self, _remote_id: &str) {
        // 逻辑会话，无需远端断开
    }
}
