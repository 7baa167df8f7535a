//! 应用配置
//!
//! 从TOML文件加载，`COLLECTOR_*`环境变量可逐项覆盖。
//! 所有字段都有默认值，零配置即可以嵌入式模式启动。

use serde::{Deserialize, Serialize};

use crate::errors::{CollectorError, CollectorResult};

/// 应用配置树
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub collectors: CollectorEndpoints,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://collector.db".to_string(),
        }
    }
}

/// 分发器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 调度扫描周期（秒）
    pub poll_interval_seconds: u64,
    /// 未指定单任务超时时的默认执行超时（秒）
    pub default_timeout_seconds: u64,
    /// 单轮并发分发上限
    pub max_concurrent_dispatches: usize,
    /// 连续失败多少次后任务进入failed终态
    pub max_consecutive_failures: i64,
    /// Worker心跳存活窗口（秒），超窗即被注册表驱逐
    pub liveness_window_seconds: i64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: 10,
            default_timeout_seconds: 30,
            max_concurrent_dispatches: 16,
            max_consecutive_failures: 5,
            liveness_window_seconds: 90,
        }
    }
}

/// Worker配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// Worker标识；为空时运行期取主机名派生
    pub worker_id: String,
    /// 亲和分组
    pub group: Option<String>,
    /// 本Worker承载的协议列表
    pub protocols: Vec<String>,
    pub max_concurrent: i32,
    pub heartbeat_interval_seconds: u64,
    /// HTTP执行面监听地址；留空则仅进程内调用
    pub listen_addr: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_id: String::new(),
            group: None,
            protocols: vec![
                "ssh".to_string(),
                "netmiko-ssh".to_string(),
                "native-ssh".to_string(),
                "api".to_string(),
                "snmp".to_string(),
            ],
            max_concurrent: 5,
            heartbeat_interval_seconds: 30,
            listen_addr: None,
        }
    }
}

/// 连接池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// 空闲会话TTL（秒）
    pub idle_ttl_seconds: i64,
    /// 后台清扫周期（秒）
    pub sweep_interval_seconds: u64,
    /// 按连接身份分片的条带数
    pub shard_count: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_ttl_seconds: 300,
            sweep_interval_seconds: 60,
            shard_count: 16,
        }
    }
}

/// 各协议采集服务端点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorEndpoints {
    pub ssh_url: String,
    pub netmiko_ssh_url: String,
    pub native_ssh_url: String,
    pub snmp_url: String,
}

impl Default for CollectorEndpoints {
    fn default() -> Self {
        Self {
            ssh_url: "http://localhost:8010".to_string(),
            netmiko_ssh_url: "http://localhost:8020".to_string(),
            native_ssh_url: "http://localhost:8030".to_string(),
            snmp_url: "http://localhost:8050".to_string(),
        }
    }
}

impl AppConfig {
    /// 加载配置：文件（可缺省）+ 环境变量覆盖
    pub fn load(config_path: Option<&str>) -> CollectorResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("COLLECTOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CollectorError::Configuration(e.to_string()))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| CollectorError::Configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CollectorResult<()> {
        if self.dispatcher.poll_interval_seconds == 0 {
            return Err(CollectorError::Configuration(
                "dispatcher.poll_interval_seconds必须大于0".to_string(),
            ));
        }
        if self.dispatcher.default_timeout_seconds == 0 {
            return Err(CollectorError::Configuration(
                "dispatcher.default_timeout_seconds必须大于0".to_string(),
            ));
        }
        if self.dispatcher.max_consecutive_failures <= 0 {
            return Err(CollectorError::Configuration(
                "dispatcher.max_consecutive_failures必须大于0".to_string(),
            ));
        }
        if self.worker.max_concurrent <= 0 {
            return Err(CollectorError::Configuration(
                "worker.max_concurrent必须大于0".to_string(),
            ));
        }
        if self.pool.shard_count == 0 {
            return Err(CollectorError::Configuration(
                "pool.shard_count必须大于0".to_string(),
            ));
        }
        for protocol in &self.worker.protocols {
            if crate::models::ProtocolType::parse_str(protocol).is_none() {
                return Err(CollectorError::Configuration(format!(
                    "未知的协议类型: {protocol}"
                )));
            }
        }
        Ok(())
    }
}
