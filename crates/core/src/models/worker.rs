use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::server::ProtocolType;

/// Worker状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerStatus {
    #[serde(rename = "alive")]
    Alive,
    #[serde(rename = "down")]
    Down,
}

/// Worker实例描述
///
/// 由注册表基于注册/心跳即时重建，属瞬态数据，不落库。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    pub id: String,
    pub protocol_type: ProtocolType,
    /// 亲和分组
    pub group: Option<String>,
    /// HTTP调用端点；进程内模式为空
    pub endpoint: Option<String>,
    pub max_concurrent: i32,
    pub in_flight: i32,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl WorkerDescriptor {
    pub fn is_alive(&self) -> bool {
        matches!(self.status, WorkerStatus::Alive)
    }

    /// 是否还能接收指定协议的任务
    pub fn can_accept(&self, protocol: ProtocolType) -> bool {
        self.is_alive() && self.protocol_type == protocol && self.in_flight < self.max_concurrent
    }

    /// 心跳是否超出存活窗口
    pub fn heartbeat_expired(&self, now: DateTime<Utc>, window_seconds: i64) -> bool {
        (now - self.last_heartbeat).num_seconds() > window_seconds
    }
}

/// Worker注册请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: String,
    pub protocol_type: ProtocolType,
    pub group: Option<String>,
    pub endpoint: Option<String>,
    pub max_concurrent: i32,
}

/// Worker心跳
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub in_flight: i32,
    pub timestamp: DateTime<Utc>,
}

impl WorkerDescriptor {
    pub fn from_registration(registration: WorkerRegistration) -> Self {
        let now = Utc::now();
        Self {
            id: registration.worker_id,
            protocol_type: registration.protocol_type,
            group: registration.group,
            endpoint: registration.endpoint,
            max_concurrent: registration.max_concurrent,
            in_flight: 0,
            status: WorkerStatus::Alive,
            last_heartbeat: now,
            registered_at: now,
        }
    }
}
