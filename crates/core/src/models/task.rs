use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CollectorError, CollectorResult};

/// 采集任务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskType {
    #[serde(rename = "command")]
    Command,
    #[serde(rename = "api_call")]
    ApiCall,
    #[serde(rename = "snmp_get")]
    SnmpGet,
    #[serde(rename = "snmp_walk")]
    SnmpWalk,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Command => "command",
            TaskType::ApiCall => "api_call",
            TaskType::SnmpGet => "snmp_get",
            TaskType::SnmpWalk => "snmp_walk",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "command" => Some(TaskType::Command),
            "api_call" => Some(TaskType::ApiCall),
            "snmp_get" => Some(TaskType::SnmpGet),
            "snmp_walk" => Some(TaskType::SnmpWalk),
            _ => None,
        }
    }
}

/// 任务状态
///
/// 状态迁移由显式迁移表约束，所有写入都通过仓储层的
/// compare-and-set原语完成，以机械化保证单飞语义。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "inactive")]
    Inactive,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Inactive => "inactive",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TaskStatus::Active),
            "inactive" => Some(TaskStatus::Inactive),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// 状态迁移表
    ///
    /// active -> running/inactive, running -> active/completed/failed,
    /// inactive -> active, failed -> active（人工恢复）。
    /// completed为终态。
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Active, Running)
                | (Active, Inactive)
                | (Running, Active)
                | (Running, Completed)
                | (Running, Failed)
                | (Inactive, Active)
                | (Failed, Active)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 调度间隔单位
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IntervalUnit {
    #[serde(rename = "seconds")]
    Seconds,
    #[serde(rename = "minutes")]
    Minutes,
    #[serde(rename = "hours")]
    Hours,
    #[serde(rename = "days")]
    Days,
}

/// 调度间隔：单位 + 数值
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntervalSpec {
    pub unit: IntervalUnit,
    pub value: u32,
}

impl IntervalSpec {
    pub fn minutes(value: u32) -> Self {
        Self {
            unit: IntervalUnit::Minutes,
            value,
        }
    }

    pub fn seconds(value: u32) -> Self {
        Self {
            unit: IntervalUnit::Seconds,
            value,
        }
    }

    /// 换算为时长
    pub fn as_duration(&self) -> Duration {
        let value = i64::from(self.value);
        match self.unit {
            IntervalUnit::Seconds => Duration::seconds(value),
            IntervalUnit::Minutes => Duration::minutes(value),
            IntervalUnit::Hours => Duration::hours(value),
            IntervalUnit::Days => Duration::days(value),
        }
    }
}

/// 放置约束：亲和与反亲和
///
/// `worker`/`group` 限定任务只能落在指定Worker或分组；
/// `exclusion_tags` 标记互斥域，携带相同标签的任务不会在
/// 同一Worker上并发执行。
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PlacementRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusion_tags: Vec<String>,
}

impl PlacementRule {
    pub fn is_empty(&self) -> bool {
        self.worker.is_none() && self.group.is_none() && self.exclusion_tags.is_empty()
    }
}

/// 调度配置
///
/// 附加到任务后不可变，编辑时整体替换。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub interval: IntervalSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<PlacementRule>,
}

impl ScheduleConfig {
    pub fn every_minutes(value: u32) -> Self {
        Self {
            interval: IntervalSpec::minutes(value),
            placement: None,
        }
    }

    pub fn validate(&self) -> CollectorResult<()> {
        if self.interval.value == 0 {
            return Err(CollectorError::InvalidSchedule(
                "间隔数值必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 任务操作载荷
///
/// 按任务类型标签化的强类型参数集，任务创建时校验，
/// 替代松散的开放式配置记录。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum TaskOperation {
    #[serde(rename = "command")]
    Command { command: String },
    #[serde(rename = "api_call")]
    ApiCall {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        headers: Vec<(String, String)>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
    #[serde(rename = "snmp_get")]
    SnmpGet {
        oid: String,
        community: String,
        #[serde(default = "default_snmp_port")]
        port: u16,
    },
    #[serde(rename = "snmp_walk")]
    SnmpWalk {
        oid: String,
        community: String,
        #[serde(default = "default_snmp_port")]
        port: u16,
    },
}

fn default_http_method() -> String {
    "GET".to_string()
}

fn default_snmp_port() -> u16 {
    161
}

impl TaskOperation {
    /// 操作载荷对应的任务类型
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskOperation::Command { .. } => TaskType::Command,
            TaskOperation::ApiCall { .. } => TaskType::ApiCall,
            TaskOperation::SnmpGet { .. } => TaskType::SnmpGet,
            TaskOperation::SnmpWalk { .. } => TaskType::SnmpWalk,
        }
    }

    /// 创建期校验，避免把参数错误留到分发时刻
    pub fn validate(&self) -> CollectorResult<()> {
        match self {
            TaskOperation::Command { command } => {
                if command.trim().is_empty() {
                    return Err(CollectorError::InvalidOperation(
                        "command不能为空".to_string(),
                    ));
                }
            }
            TaskOperation::ApiCall { url, method, .. } => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(CollectorError::InvalidOperation(format!(
                        "无效的URL: {url}"
                    )));
                }
                let m = method.to_uppercase();
                if !matches!(m.as_str(), "GET" | "POST" | "PUT" | "DELETE" | "PATCH" | "HEAD") {
                    return Err(CollectorError::InvalidOperation(format!(
                        "不支持的HTTP方法: {method}"
                    )));
                }
            }
            TaskOperation::SnmpGet { oid, community, .. }
            | TaskOperation::SnmpWalk { oid, community, .. } => {
                if oid.trim().is_empty() {
                    return Err(CollectorError::InvalidOperation("oid不能为空".to_string()));
                }
                if community.trim().is_empty() {
                    return Err(CollectorError::InvalidOperation(
                        "community不能为空".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// 数据采集任务
///
/// 每个任务归属唯一的服务器；计数器与时间戳仅由分发器和
/// 结果聚合器修改，同一任务绝不并发修改（单飞不变量）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionTask {
    pub id: i64,
    pub name: String,
    pub server_id: i64,
    pub task_type: TaskType,
    pub operation: TaskOperation,
    pub schedule_config: Option<ScheduleConfig>,
    /// 单任务超时覆盖（秒）；缺省取全局配置
    pub timeout_seconds: Option<u64>,
    pub status: TaskStatus,
    pub run_count: i64,
    pub success_count: i64,
    pub error_count: i64,
    /// 连续失败计数，成功后归零
    pub consecutive_failures: i64,
    /// 配置类错误的常驻标记（如亲和性无法满足），区别于瞬时执行失败
    pub config_error: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CollectionTask {
    pub fn new(name: String, server_id: i64, operation: TaskOperation) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由存储层生成
            name,
            server_id,
            task_type: operation.task_type(),
            operation,
            schedule_config: None,
            timeout_seconds: None,
            status: TaskStatus::Active,
            run_count: 0,
            success_count: 0,
            error_count: 0,
            consecutive_failures: 0,
            config_error: None,
            last_run_at: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule_config = Some(schedule);
        self
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, TaskStatus::Active)
    }

    /// 一次性任务：没有调度配置，执行后进入终态
    pub fn is_one_shot(&self) -> bool {
        self.schedule_config.is_none()
    }

    /// 本任务的放置约束（缺省无约束）
    pub fn placement(&self) -> PlacementRule {
        self.schedule_config
            .as_ref()
            .and_then(|s| s.placement.clone())
            .unwrap_or_default()
    }

    /// 有效超时：任务覆盖值或全局默认
    pub fn effective_timeout(&self, default_seconds: u64) -> u64 {
        self.timeout_seconds.unwrap_or(default_seconds)
    }

    /// 创建期整体校验
    pub fn validate(&self) -> CollectorResult<()> {
        if self.task_type != self.operation.task_type() {
            return Err(CollectorError::InvalidOperation(format!(
                "任务类型 {} 与操作载荷不匹配",
                self.task_type.as_str()
            )));
        }
        self.operation.validate()?;
        if let Some(schedule) = &self.schedule_config {
            schedule.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transition_table() {
        use TaskStatus::*;
        assert!(Active.can_transition_to(Running));
        assert!(Running.can_transition_to(Active));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Active));

        // 非法迁移
        assert!(!Active.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Inactive.can_transition_to(Running));
        assert!(!Active.can_transition_to(Failed));
    }

    #[test]
    fn test_operation_validation() {
        assert!(TaskOperation::Command {
            command: "uname -a".to_string()
        }
        .validate()
        .is_ok());

        assert!(TaskOperation::Command {
            command: "  ".to_string()
        }
        .validate()
        .is_err());

        assert!(TaskOperation::ApiCall {
            url: "ftp://x".to_string(),
            method: "GET".to_string(),
            headers: vec![],
            body: None,
        }
        .validate()
        .is_err());

        assert!(TaskOperation::SnmpGet {
            oid: "1.3.6.1.2.1.1.1.0".to_string(),
            community: "public".to_string(),
            port: 161,
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn test_interval_duration() {
        assert_eq!(
            IntervalSpec::minutes(5).as_duration(),
            Duration::minutes(5)
        );
        assert_eq!(
            IntervalSpec {
                unit: IntervalUnit::Hours,
                value: 2
            }
            .as_duration(),
            Duration::hours(2)
        );
    }

    #[test]
    fn test_operation_serde_tagging() {
        let op = TaskOperation::SnmpWalk {
            oid: "1.3.6.1.2.1.2.2".to_string(),
            community: "public".to_string(),
            port: 161,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "snmp_walk");
        let parsed: TaskOperation = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, op);
    }
}
