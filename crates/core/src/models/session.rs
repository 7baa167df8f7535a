use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::server::{ConnectionParams, ProtocolType};

/// 连接会话状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionStatus {
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "disconnected")]
    Disconnected,
    #[serde(rename = "error")]
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Connected => "connected",
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Error => "error",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "connected" => Some(SessionStatus::Connected),
            "disconnected" => Some(SessionStatus::Disconnected),
            "error" => Some(SessionStatus::Error),
            _ => None,
        }
    }
}

/// 连接池的键：host + port + username + protocol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub protocol_type: ProtocolType,
}

impl ConnectionIdentity {
    pub fn from_params(params: &ConnectionParams) -> Self {
        Self {
            host: params.host.clone(),
            port: params.port,
            username: params.username.clone(),
            protocol_type: params.protocol_type,
        }
    }
}

impl std::fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.protocol_type
        )
    }
}

/// 池化的活动连接
///
/// 一个会话可以顺序服务多次执行，但绝不并发服务两次执行。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSession {
    pub session_id: String,
    pub server_id: i64,
    pub protocol_type: ProtocolType,
    pub status: SessionStatus,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl ConnectionSession {
    pub fn new(session_id: String, server_id: i64, protocol_type: ProtocolType) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            server_id,
            protocol_type,
            status: SessionStatus::Connected,
            connected_at: now,
            last_activity_at: now,
            error_message: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.status, SessionStatus::Connected)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }

    /// 自最近活动起是否已闲置超过TTL
    pub fn idle_longer_than(&self, now: DateTime<Utc>, ttl_seconds: i64) -> bool {
        (now - self.last_activity_at).num_seconds() > ttl_seconds
    }
}
