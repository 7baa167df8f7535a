use thiserror::Error;

/// 采集调度系统错误类型定义
#[derive(Debug, Error)]
pub enum CollectorError {
    /// 协议握手或认证失败，会话未建立
    #[error("连接失败: {message}")]
    Connection { message: String },

    /// 操作超出时限，会话已被强制回收
    #[error("操作执行超时 ({timeout_seconds}s)")]
    CommandTimeout { timeout_seconds: u64 },

    /// 注册表中没有满足协议/容量要求的Worker
    #[error("没有可用的Worker: {reason}")]
    NoEligibleWorker { reason: String },

    /// 亲和性约束无法满足，属于配置错误
    #[error("亲和性约束无法满足: {reason}")]
    AffinityUnsatisfiable { reason: String },

    /// 单飞保护：任务已有在途的调度实例
    #[error("任务 {task_id} 已在调度中")]
    ConcurrentDispatch { task_id: i64 },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("服务器未找到: {id}")]
    ServerNotFound { id: i64 },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("无效的任务操作参数: {0}")]
    InvalidOperation(String),

    #[error("无效的调度配置: {0}")]
    InvalidSchedule(String),

    #[error("非法的状态迁移: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("传输层错误: {0}")]
    Transport(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl CollectorError {
    /// 是否为连接类失败（用于服务器状态联动）
    pub fn is_connection_error(&self) -> bool {
        matches!(self, CollectorError::Connection { .. })
    }
}

impl From<serde_json::Error> for CollectorError {
    fn from(e: serde_json::Error) -> Self {
        CollectorError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type CollectorResult<T> = std::result::Result<T, CollectorError>;
