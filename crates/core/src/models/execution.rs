use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 执行结局
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutcomeStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "timeout")]
    Timeout,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Timeout => "timeout",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(OutcomeStatus::Success),
            "failed" => Some(OutcomeStatus::Failed),
            "timeout" => Some(OutcomeStatus::Timeout),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeStatus::Success)
    }
}

/// 单次分发的执行记录
///
/// 以execution_id为幂等键，只追加，创建后永不更新。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: i64,
    pub task_id: i64,
    pub server_id: i64,
    pub execution_id: Uuid,
    pub outcome: OutcomeStatus,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub execution_time_ms: u64,
    pub collected_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn new(task_id: i64, server_id: i64, outcome: OutcomeStatus) -> Self {
        Self {
            id: 0, // 将由存储层生成
            task_id,
            server_id,
            execution_id: Uuid::new_v4(),
            outcome,
            output: None,
            error_message: None,
            execution_time_ms: 0,
            collected_at: Utc::now(),
        }
    }

    pub fn success(task_id: i64, server_id: i64, output: String, elapsed_ms: u64) -> Self {
        let mut result = Self::new(task_id, server_id, OutcomeStatus::Success);
        result.output = Some(output);
        result.execution_time_ms = elapsed_ms;
        result
    }

    pub fn failed(task_id: i64, server_id: i64, error: String, elapsed_ms: u64) -> Self {
        let mut result = Self::new(task_id, server_id, OutcomeStatus::Failed);
        result.error_message = Some(error);
        result.execution_time_ms = elapsed_ms;
        result
    }

    pub fn timeout(task_id: i64, server_id: i64, timeout_seconds: u64) -> Self {
        let mut result = Self::new(task_id, server_id, OutcomeStatus::Timeout);
        result.error_message = Some(format!("操作超过 {timeout_seconds}s 未返回"));
        result.execution_time_ms = timeout_seconds * 1000;
        result
    }
}
