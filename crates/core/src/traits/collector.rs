//! 采集执行与Worker调用边界的契约定义
//!
//! 分发器与协议采集Worker之间通过统一的请求/响应契约交互：
//! `{连接参数, 操作载荷, 超时} -> {输出 | 错误, 耗时}`。
//! 契约本身与传输方式无关，可以是进程内调用，也可以经HTTP送达
//! 远端Worker。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{
    ConnectionParams, OutcomeStatus, ProtocolType, TaskOperation, WorkerDescriptor,
    WorkerHeartbeat, WorkerRegistration,
};
use crate::CollectorResult;

/// 采集执行请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRequest {
    pub task_id: i64,
    pub params: ConnectionParams,
    pub operation: TaskOperation,
    pub timeout_seconds: u64,
}

/// 采集执行响应
///
/// 连接失败与超时在Worker边界被吸收为结局，而不是向上抛出
/// 进程级错误。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionResponse {
    pub outcome: OutcomeStatus,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub execution_time_ms: u64,
    /// 本次执行是否因连接/握手失败而失败（用于服务器状态联动）
    #[serde(default)]
    pub connection_error: bool,
}

impl CollectionResponse {
    pub fn success(output: String, elapsed_ms: u64) -> Self {
        Self {
            outcome: OutcomeStatus::Success,
            output: Some(output),
            error_message: None,
            execution_time_ms: elapsed_ms,
            connection_error: false,
        }
    }

    pub fn failed(error: String, elapsed_ms: u64, connection_error: bool) -> Self {
        Self {
            outcome: OutcomeStatus::Failed,
            output: None,
            error_message: Some(error),
            execution_time_ms: elapsed_ms,
            connection_error,
        }
    }

    pub fn timeout(timeout_seconds: u64) -> Self {
        Self {
            outcome: OutcomeStatus::Timeout,
            output: None,
            error_message: Some(format!("操作超过 {timeout_seconds}s 未返回")),
            execution_time_ms: timeout_seconds * 1000,
            connection_error: false,
        }
    }
}

/// 协议采集器接口
///
/// 对 {ssh, netmiko-ssh, native-ssh, api, snmp} 多态；每个实例
/// 拥有自己的连接池。执行过程中解析/建立池化会话、在超时约束下
/// 完成操作，并把失败归一为`CollectionResponse`结局。
#[async_trait]
pub trait ProtocolCollector: Send + Sync {
    async fn execute(&self, request: &CollectionRequest) -> CollectorResult<CollectionResponse>;

    fn protocol(&self) -> ProtocolType;

    fn name(&self) -> &str;

    /// 当前池中会话数（健康上报用）
    async fn active_sessions(&self) -> usize;
}

/// Worker侧对注册表的访问接口
///
/// 进程内模式直接由注册表实现；远端模式由HTTP客户端实现。
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn register(&self, registration: WorkerRegistration) -> CollectorResult<()>;

    async fn heartbeat(&self, heartbeat: WorkerHeartbeat) -> CollectorResult<()>;

    async fn deregister(&self, worker_id: &str) -> CollectorResult<()>;
}

/// 分发器侧的Worker调用接口
///
/// 契约是权威，传输是细节：进程内实现直接调用WorkerService，
/// HTTP实现把请求POST到descriptor的端点。
#[async_trait]
pub trait WorkerInvoker: Send + Sync {
    async fn invoke(
        &self,
        worker: &WorkerDescriptor,
        request: &CollectionRequest,
    ) -> CollectorResult<CollectionResponse>;
}
