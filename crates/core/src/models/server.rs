use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 采集协议类型
///
/// ssh族的三个变体对应三种不同实现的SSH采集服务（paramiko、netmiko、
/// 原生Go实现），对外暴露相同的连接/执行契约。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProtocolType {
    #[serde(rename = "ssh")]
    Ssh,
    #[serde(rename = "netmiko-ssh")]
    NetmikoSsh,
    #[serde(rename = "native-ssh")]
    NativeSsh,
    #[serde(rename = "api")]
    Api,
    #[serde(rename = "snmp")]
    Snmp,
}

impl ProtocolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolType::Ssh => "ssh",
            ProtocolType::NetmikoSsh => "netmiko-ssh",
            ProtocolType::NativeSsh => "native-ssh",
            ProtocolType::Api => "api",
            ProtocolType::Snmp => "snmp",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "ssh" => Some(ProtocolType::Ssh),
            "netmiko-ssh" => Some(ProtocolType::NetmikoSsh),
            "native-ssh" => Some(ProtocolType::NativeSsh),
            "api" => Some(ProtocolType::Api),
            "snmp" => Some(ProtocolType::Snmp),
            _ => None,
        }
    }

    /// 是否为SSH族协议（共享连接/执行/断开三段式契约）
    pub fn is_ssh_family(&self) -> bool {
        matches!(
            self,
            ProtocolType::Ssh | ProtocolType::NetmikoSsh | ProtocolType::NativeSsh
        )
    }
}

impl std::fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 服务器管理方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ManagementType {
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "scheduled")]
    Scheduled,
}

impl ManagementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagementType::Manual => "manual",
            ManagementType::Scheduled => "scheduled",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(ManagementType::Manual),
            "scheduled" => Some(ManagementType::Scheduled),
            _ => None,
        }
    }
}

/// 服务器状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServerStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "inactive")]
    Inactive,
    #[serde(rename = "error")]
    Error,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Active => "active",
            ServerStatus::Inactive => "inactive",
            ServerStatus::Error => "error",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ServerStatus::Active),
            "inactive" => Some(ServerStatus::Inactive),
            "error" => Some(ServerStatus::Error),
            _ => None,
        }
    }
}

/// 被采集的远端设备
///
/// 归管理层所有；调度核心只读，唯一的例外是连接失败时的状态回写。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub protocol_type: ProtocolType,
    pub device_type: String,
    pub management_type: ManagementType,
    pub status: ServerStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Server {
    pub fn new(name: String, host: String, port: u16, username: String, password: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由存储层生成
            name,
            host,
            port,
            username,
            password,
            protocol_type: ProtocolType::Ssh,
            device_type: "linux".to_string(),
            management_type: ManagementType::Manual,
            status: ServerStatus::Active,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, ServerStatus::Active)
    }

    /// 提取执行采集所需的连接参数
    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            server_id: self.id,
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            protocol_type: self.protocol_type,
            device_type: self.device_type.clone(),
        }
    }
}

/// 采集执行的目标连接参数
///
/// 随采集请求跨越Worker调用边界传递，与`Server`解耦以便契约序列化。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub server_id: i64,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub protocol_type: ProtocolType,
    pub device_type: String,
}
