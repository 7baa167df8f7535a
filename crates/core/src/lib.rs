//! 采集调度系统核心crate
//!
//! 定义领域模型、错误类型、配置以及仓储/采集器抽象接口。
//! 具体的调度逻辑位于 `collector-dispatcher`，协议采集位于
//! `collector-worker`，持久化实现位于 `collector-infrastructure`。

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::{CollectorError, CollectorResult};
pub use models::{
    CollectionTask, ConnectionIdentity, ConnectionSession, ExecutionResult, IntervalSpec,
    IntervalUnit, ManagementType, OutcomeStatus, PlacementRule, ProtocolType, ScheduleConfig,
    Server, ServerStatus, SessionStatus, TaskOperation, TaskStatus, TaskType, WorkerDescriptor,
    WorkerHeartbeat, WorkerRegistration,
};
pub use traits::{
    CollectionRequest, CollectionResponse, ExecutionResultRepository, ProtocolCollector,
    RegistryClient, ServerRepository, SessionRepository, TaskRepository, WorkerInvoker,
};
