use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use collector_core::{
    config::{AppConfig, WorkerConfig},
    models::{ProtocolType, WorkerDescriptor, WorkerHeartbeat, WorkerRegistration},
    traits::{
        CollectionRequest, CollectionResponse, ProtocolCollector, RegistryClient, SessionRepository,
        WorkerInvoker,
    },
    CollectorError, CollectorResult,
};

use crate::collectors::{build_collector, PooledCollector};

/// 单协议采集Worker实例
///
/// 一个实例只承载一种协议；进程可按配置启动多个实例。
/// 实例负责向注册表注册自身、维持心跳、受理执行请求。
pub struct WorkerService {
    worker_id: String,
    protocol: ProtocolType,
    group: Option<String>,
    endpoint: Option<String>,
    max_concurrent: i32,
    heartbeat_interval_seconds: u64,
    collector: Arc<PooledCollector>,
    registry: Arc<dyn RegistryClient>,
    in_flight: Arc<AtomicI32>,
}

impl WorkerService {
    pub fn new(
        worker_id: String,
        protocol: ProtocolType,
        worker_config: &WorkerConfig,
        collector: Arc<PooledCollector>,
        registry: Arc<dyn RegistryClient>,
    ) -> Self {
        Self {
            worker_id,
            protocol,
            group: worker_config.group.clone(),
            endpoint: worker_config
                .listen_addr
                .as_ref()
                .map(|addr| format!("http://{addr}")),
            max_concurrent: worker_config.max_concurrent,
            heartbeat_interval_seconds: worker_config.heartbeat_interval_seconds,
            collector,
            registry,
            in_flight: Arc::new(AtomicI32::new(0)),
        }
    }

    /// 按配置构建本进程的全部Worker实例
    ///
    /// worker_id缺省时以主机名派生，每个协议一个实例，
    /// id形如 `{base}-{protocol}`。
    pub fn build_all(
        config: &AppConfig,
        registry: Arc<dyn RegistryClient>,
        session_repo: Arc<dyn SessionRepository>,
    ) -> CollectorResult<Vec<Arc<WorkerService>>> {
        let base_id = if config.worker.worker_id.is_empty() {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "collector-worker".to_string())
        } else {
            config.worker.worker_id.clone()
        };

        let mut services = Vec::new();
        for protocol_name in &config.worker.protocols {
            let protocol = ProtocolType::parse_str(protocol_name).ok_or_else(|| {
                CollectorError::Configuration(format!("未知的协议类型: {protocol_name}"))
            })?;
            let collector = build_collector(
                protocol,
                &config.collectors,
                &config.pool,
                Arc::clone(&session_repo),
            );
            services.push(Arc::new(WorkerService::new(
                format!("{base_id}-{protocol}"),
                protocol,
                &config.worker,
                collector,
                Arc::clone(&registry),
            )));
        }
        Ok(services)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn protocol(&self) -> ProtocolType {
        self.protocol
    }

    pub fn in_flight(&self) -> i32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn active_sessions(&self) -> usize {
        self.collector.pool().active_sessions()
    }

    fn registration(&self) -> WorkerRegistration {
        WorkerRegistration {
            worker_id: self.worker_id.clone(),
            protocol_type: self.protocol,
            group: self.group.clone(),
            endpoint: self.endpoint.clone(),
            max_concurrent: self.max_concurrent,
        }
    }

    /// 受理一次采集执行
    pub async fn execute(&self, request: &CollectionRequest) -> CollectorResult<CollectionResponse> {
        if request.params.protocol_type != self.protocol {
            return Err(CollectorError::InvalidOperation(format!(
                "Worker {} 只承载协议 {}，收到 {}",
                self.worker_id, self.protocol, request.params.protocol_type
            )));
        }

        let _guard = InFlightGuard::enter(Arc::clone(&self.in_flight));
        debug!(
            "Worker {} 受理任务 {} (在途: {})",
            self.worker_id,
            request.task_id,
            self.in_flight()
        );
        self.collector.execute(request).await
    }

    /// 注册并启动心跳与连接池清扫
    pub async fn start(
        self: Arc<Self>,
        sweep_interval_seconds: u64,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> CollectorResult<()> {
        self.registry.register(self.registration()).await?;

        let transport = Arc::clone(self.collector.transport());
        crate::pool::ConnectionPool::spawn_sweeper(
            Arc::clone(self.collector.pool()),
            sweep_interval_seconds,
            shutdown_rx.resubscribe(),
            move |session| {
                let transport = Arc::clone(&transport);
                async move {
                    transport.close(&session.remote_id).await;
                }
            },
        );

        info!(
            "Worker {} 已启动 (协议: {}, 并发上限: {})",
            self.worker_id, self.protocol, self.max_concurrent
        );
        Self::spawn_heartbeat(self, shutdown_rx);
        Ok(())
    }

    /// 心跳协程：周期上报在途计数；被注册表遗忘时重新注册
    fn spawn_heartbeat(service: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(service.heartbeat_interval_seconds));
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let heartbeat = WorkerHeartbeat {
                            worker_id: service.worker_id.clone(),
                            in_flight: service.in_flight(),
                            timestamp: Utc::now(),
                        };
                        match service.registry.heartbeat(heartbeat).await {
                            Ok(()) => {}
                            Err(CollectorError::WorkerNotFound { .. }) => {
                                warn!("Worker {} 被注册表遗忘，重新注册", service.worker_id);
                                if let Err(e) = service.registry.register(service.registration()).await {
                                    error!("Worker {} 重新注册失败: {}", service.worker_id, e);
                                }
                            }
                            Err(e) => error!("Worker {} 心跳失败: {}", service.worker_id, e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Worker {} 心跳协程退出", service.worker_id);
                        break;
                    }
                }
            }
        });
    }

    /// 注销（优雅关闭时调用）
    pub async fn stop(&self) {
        if let Err(e) = self.registry.deregister(&self.worker_id).await {
            warn!("Worker {} 注销失败: {}", self.worker_id, e);
        }
    }
}

/// 在途计数守卫，Drop时无条件递减
struct InFlightGuard {
    counter: Arc<AtomicI32>,
}

impl InFlightGuard {
    fn enter(counter: Arc<AtomicI32>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 进程内Worker调用实现
///
/// 统一契约的进程内传输：按Worker描述符的id路由到本进程内的
/// WorkerService实例。
pub struct LocalWorkerInvoker {
    workers: HashMap<String, Arc<WorkerService>>,
}

impl LocalWorkerInvoker {
    pub fn new(services: &[Arc<WorkerService>]) -> Self {
        let workers = services
            .iter()
            .map(|s| (s.worker_id().to_string(), Arc::clone(s)))
            .collect();
        Self { workers }
    }
}

#[async_trait]
impl WorkerInvoker for LocalWorkerInvoker {
    async fn invoke(
        &self,
        worker: &WorkerDescriptor,
        request: &CollectionRequest,
    ) -> CollectorResult<CollectionResponse> {
        let service = self
            .workers
            .get(&worker.id)
            .ok_or_else(|| CollectorError::WorkerNotFound {
                id: worker.id.clone(),
            })?;
        service.execute(request).await
    }
}
