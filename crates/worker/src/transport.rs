use async_trait::async_trait;

use collector_core::{
    models::{ConnectionParams, TaskOperation},
    CollectorResult,
};

/// 一次协议操作的原始输出
#[derive(Debug, Clone)]
pub struct OperationOutput {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl OperationOutput {
    pub fn ok(output: String) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn err(error: String) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error),
        }
    }
}

/// 会话传输层
///
/// 协议握手与线上操作委托给各协议采集服务，本系统不实现
/// 线协议本身。`open`失败应返回`CollectorError::Connection`，
/// 供上层做服务器状态联动；`close`为尽力而为，不传播错误。
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// 协议握手，返回远端会话句柄
    async fn open(&self, params: &ConnectionParams) -> CollectorResult<String>;

    /// 在既有会话上执行一次操作
    async fn run(
        &self,
        remote_id: &str,
        params: &ConnectionParams,
        operation: &TaskOperation,
    ) -> CollectorResult<OperationOutput>;

    /// 关闭会话
    async fn close(&self, remote_id: &str);
}
