//! 协议采集器
//!
//! 所有协议变体共享同一套池化执行骨架，协议差异全部收敛在
//! 传输层实现里。每个采集器实例拥有独立的连接池。

pub mod api;
pub mod snmp;
pub mod ssh;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use collector_core::{
    config::{CollectorEndpoints, PoolConfig},
    models::{ConnectionIdentity, ConnectionSession, ProtocolType, SessionStatus},
    traits::{CollectionRequest, CollectionResponse, ProtocolCollector, SessionRepository},
    CollectorError, CollectorResult,
};

use crate::pool::{ConnectionPool, PooledSession, SessionLease};
use crate::transport::{OperationOutput, SessionTransport};

pub use api::ApiTransport;
pub use snmp::SnmpServiceTransport;
pub use ssh::SshServiceTransport;

/// 池化协议采集器
pub struct PooledCollector {
    name: String,
    protocol: ProtocolType,
    transport: Arc<dyn SessionTransport>,
    pool: Arc<ConnectionPool>,
}

impl PooledCollector {
    pub fn new(
        name: String,
        protocol: ProtocolType,
        transport: Arc<dyn SessionTransport>,
        pool_config: &PoolConfig,
        session_repo: Arc<dyn SessionRepository>,
    ) -> Self {
        Self {
            name,
            protocol,
            transport,
            pool: Arc::new(ConnectionPool::new(pool_config, session_repo)),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn transport(&self) -> &Arc<dyn SessionTransport> {
        &self.transport
    }

    /// 解析或建立会话后执行操作
    ///
    /// 既有会话处于error/disconnected时先拆除再重新握手；
    /// 握手失败以`Connection`错误向上传播，不留下会话。
    async fn execute_on_lease(
        &self,
        lease: &mut SessionLease,
        request: &CollectionRequest,
    ) -> CollectorResult<OperationOutput> {
        let reusable = lease
            .session()
            .map(|s| s.info.is_connected())
            .unwrap_or(false);

        if !reusable {
            if let Some(stale) = lease
                .evict(SessionStatus::Disconnected, Some("会话失效重建".to_string()))
                .await
            {
                self.transport.close(&stale.remote_id).await;
            }

            let remote_id = self.transport.open(&request.params).await?;
            let info = ConnectionSession::new(
                remote_id.clone(),
                request.params.server_id,
                self.protocol,
            );
            lease
                .install(PooledSession { info, remote_id })
                .await?;
        } else {
            debug!("复用池化会话: {}", lease.identity());
        }

        let remote_id = lease
            .session()
            .map(|s| s.remote_id.clone())
            .ok_or_else(|| CollectorError::Internal("会话安放后意外为空".to_string()))?;

        self.transport
            .run(&remote_id, &request.params, &request.operation)
            .await
    }
}

#[async_trait]
impl ProtocolCollector for PooledCollector {
    async fn execute(&self, request: &CollectionRequest) -> CollectorResult<CollectionResponse> {
        let started = Instant::now();
        let identity = ConnectionIdentity::from_params(&request.params);
        let mut lease = self.pool.acquire(&identity).await;

        let deadline = Duration::from_secs(request.timeout_seconds);
        let outcome = tokio::time::timeout(
            deadline,
            self.execute_on_lease(&mut lease, request),
        )
        .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(output)) => {
                if let Err(e) = lease.touch().await {
                    warn!("刷新会话活动时间失败: {e}");
                }
                if output.success {
                    Ok(CollectionResponse::success(
                        output.output.unwrap_or_default(),
                        elapsed_ms,
                    ))
                } else {
                    Ok(CollectionResponse::failed(
                        output.error.unwrap_or_else(|| "操作失败".to_string()),
                        elapsed_ms,
                        false,
                    ))
                }
            }
            Ok(Err(e)) => {
                // 连接失败时没有会话可拆；执行错误则保守拆除会话
                let connection_error = e.is_connection_error();
                if let Some(broken) = lease
                    .evict(SessionStatus::Error, Some(e.to_string()))
                    .await
                {
                    self.transport.close(&broken.remote_id).await;
                }
                warn!("{} 执行失败: {}", self.name, e);
                Ok(CollectionResponse::failed(
                    e.to_string(),
                    elapsed_ms,
                    connection_error,
                ))
            }
            Err(_) => {
                // 超时：强制拆除会话并逐出池，避免中毒复用
                if let Some(hung) = lease
                    .evict(
                        SessionStatus::Error,
                        Some(format!("操作超过 {}s 未返回", request.timeout_seconds)),
                    )
                    .await
                {
                    self.transport.close(&hung.remote_id).await;
                }
                warn!(
                    "{} 执行超时 ({}s)，会话已回收: {}",
                    self.name, request.timeout_seconds, identity
                );
                Ok(CollectionResponse::timeout(request.timeout_seconds))
            }
        }
    }

    fn protocol(&self) -> ProtocolType {
        self.protocol
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn active_sessions(&self) -> usize {
        self.pool.active_sessions()
    }
}

/// 按协议构建采集器实例
pub fn build_collector(
    protocol: ProtocolType,
    endpoints: &CollectorEndpoints,
    pool_config: &PoolConfig,
    session_repo: Arc<dyn SessionRepository>,
) -> Arc<PooledCollector> {
    let (name, transport): (&str, Arc<dyn SessionTransport>) = match protocol {
        ProtocolType::Ssh => (
            "ssh-collector",
            Arc::new(SshServiceTransport::new(endpoints.ssh_url.clone())),
        ),
        ProtocolType::NetmikoSsh => (
            "netmiko-ssh-collector",
            Arc::new(SshServiceTransport::new(endpoints.netmiko_ssh_url.clone())),
        ),
        ProtocolType::NativeSsh => (
            "native-ssh-collector",
            Arc::new(SshServiceTransport::new(endpoints.native_ssh_url.clone())),
        ),
        ProtocolType::Api => ("api-collector", Arc::new(ApiTransport::new())),
        ProtocolType::Snmp => (
            "snmp-collector",
            Arc::new(SnmpServiceTransport::new(endpoints.snmp_url.clone())),
        ),
    };

    Arc::new(PooledCollector::new(
        name.to_string(),
        protocol,
        transport,
        pool_config,
        session_repo,
    ))
}
