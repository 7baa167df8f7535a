//! 数据仓储层接口定义
//!
//! 调度核心通过这些接口消费持久化层：读取活跃/到期任务、
//! 原子地compare-and-set任务状态、追加执行记录、维护会话状态。
//! 具体存储技术（SQLite/内存）由 `collector-infrastructure` 提供。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    CollectionTask, ConnectionSession, ExecutionResult, Server, ServerStatus, TaskStatus,
};
use crate::CollectorResult;
use uuid::Uuid;

/// 服务器仓储接口
///
/// 调度核心对服务器基本只读；`update_status` 是唯一的写路径，
/// 用于连接失败时的状态回写。
#[async_trait]
pub trait ServerRepository: Send + Sync {
    async fn create(&self, server: &Server) -> CollectorResult<Server>;

    async fn get_by_id(&self, id: i64) -> CollectorResult<Option<Server>>;

    async fn list(&self) -> CollectorResult<Vec<Server>>;

    /// 连接失败/恢复时的状态回写
    async fn update_status(&self, id: i64, status: ServerStatus) -> CollectorResult<()>;
}

/// 采集任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &CollectionTask) -> CollectorResult<CollectionTask>;

    async fn get_by_id(&self, id: i64) -> CollectorResult<Option<CollectionTask>>;

    async fn update(&self, task: &CollectionTask) -> CollectorResult<()>;

    async fn delete(&self, id: i64) -> CollectorResult<()>;

    /// 全部active状态的任务（调度时钟的输入）
    async fn get_active_tasks(&self) -> CollectorResult<Vec<CollectionTask>>;

    /// 原子状态迁移原语
    ///
    /// 仅当当前状态等于`expected`且迁移表允许时写入`next`，
    /// 返回是否写入成功。单飞保证建立在该原语之上。
    async fn compare_and_set_status(
        &self,
        id: i64,
        expected: TaskStatus,
        next: TaskStatus,
    ) -> CollectorResult<bool>;

    /// 记录一次执行后的计数器与时间戳更新
    async fn record_run(
        &self,
        id: i64,
        run_count: i64,
        success_count: i64,
        error_count: i64,
        consecutive_failures: i64,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> CollectorResult<()>;

    /// 设置/清除常驻配置错误标记
    async fn set_config_error(&self, id: i64, message: Option<String>) -> CollectorResult<()>;
}

/// 执行结果仓储接口
///
/// 只追加。追加以execution_id为幂等键：重复追加返回false且
/// 不产生第二条记录。
#[async_trait]
pub trait ExecutionResultRepository: Send + Sync {
    /// 追加执行记录，已存在同execution_id时返回false
    async fn append(&self, result: &ExecutionResult) -> CollectorResult<bool>;

    async fn get_by_execution_id(
        &self,
        execution_id: Uuid,
    ) -> CollectorResult<Option<ExecutionResult>>;

    async fn list_by_task(&self, task_id: i64, limit: i64) -> CollectorResult<Vec<ExecutionResult>>;
}

/// 连接会话仓储接口
///
/// 连接池将会话状态镜像到这里供管理层观测，以session_id为键upsert。
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn upsert(&self, session: &ConnectionSession) -> CollectorResult<()>;

    async fn get_by_session_id(
        &self,
        session_id: &str,
    ) -> CollectorResult<Option<ConnectionSession>>;

    async fn list_by_server(&self, server_id: i64) -> CollectorResult<Vec<ConnectionSession>>;

    async fn delete(&self, session_id: &str) -> CollectorResult<()>;
}
