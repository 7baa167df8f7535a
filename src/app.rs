use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{info, warn};

use collector_core::{
    traits::{
        ExecutionResultRepository, RegistryClient, ServerRepository, SessionRepository,
        TaskRepository, WorkerInvoker,
    },
    AppConfig,
};
use collector_dispatcher::{HttpWorkerInvoker, ResultAggregator, TaskDispatcher, WorkerRegistry};
use collector_infrastructure::{
    database::connect_sqlite, InMemoryExecutionResultRepository, InMemoryServerRepository,
    InMemorySessionRepository, InMemoryTaskRepository, SqliteExecutionResultRepository,
    SqliteServerRepository, SqliteSessionRepository, SqliteTaskRepository,
};
use collector_worker::{server as worker_server, LocalWorkerInvoker, WorkerService};

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行调度分发器
    Dispatcher,
    /// 仅运行采集Worker（经HTTP暴露执行契约）
    Worker,
    /// 单进程内同时运行两者（嵌入式）
    All,
}

/// 仓储集合
struct Repositories {
    servers: Arc<dyn ServerRepository>,
    tasks: Arc<dyn TaskRepository>,
    results: Arc<dyn ExecutionResultRepository>,
    sessions: Arc<dyn SessionRepository>,
}

/// 应用实例：按模式完成全部组件装配
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    dispatcher: Option<Arc<TaskDispatcher>>,
    workers: Vec<Arc<WorkerService>>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        let repos = Self::build_repositories(&config).await?;
        let registry = Arc::new(WorkerRegistry::new(
            config.dispatcher.liveness_window_seconds,
        ));

        let run_worker = matches!(mode, AppMode::Worker | AppMode::All);
        let run_dispatcher = matches!(mode, AppMode::Dispatcher | AppMode::All);

        let workers = if run_worker {
            WorkerService::build_all(
                &config,
                Arc::clone(&registry) as Arc<dyn RegistryClient>,
                Arc::clone(&repos.sessions),
            )
            .context("构建Worker实例失败")?
        } else {
            Vec::new()
        };

        let dispatcher = if run_dispatcher {
            // 嵌入模式走进程内调用；独立分发器经HTTP调用远端Worker
            let invoker: Arc<dyn WorkerInvoker> = if mode == AppMode::All {
                Arc::new(LocalWorkerInvoker::new(&workers))
            } else {
                Arc::new(HttpWorkerInvoker::new())
            };

            let aggregator = Arc::new(ResultAggregator::new(
                Arc::clone(&repos.tasks),
                Arc::clone(&repos.servers),
                Arc::clone(&repos.results),
                config.dispatcher.max_consecutive_failures,
            ));

            Some(Arc::new(TaskDispatcher::new(
                Arc::clone(&repos.tasks),
                Arc::clone(&repos.servers),
                Arc::clone(&registry),
                invoker,
                aggregator,
                config.dispatcher.clone(),
            )))
        } else {
            None
        };

        Ok(Self {
            config,
            mode,
            dispatcher,
            workers,
        })
    }

    /// 按数据库URL选择仓储实现；`memory://`为零配置内存模式
    async fn build_repositories(config: &AppConfig) -> Result<Repositories> {
        if config.database.url.starts_with("memory://") {
            info!("使用内存仓储（零配置模式），重启后数据不保留");
            return Ok(Repositories {
                servers: Arc::new(InMemoryServerRepository::new()),
                tasks: Arc::new(InMemoryTaskRepository::new()),
                results: Arc::new(InMemoryExecutionResultRepository::new()),
                sessions: Arc::new(InMemorySessionRepository::new()),
            });
        }

        let pool = connect_sqlite(&config.database.url)
            .await
            .with_context(|| format!("连接数据库失败: {}", config.database.url))?;
        Ok(Repositories {
            servers: Arc::new(SqliteServerRepository::new(pool.clone())),
            tasks: Arc::new(SqliteTaskRepository::new(pool.clone())),
            results: Arc::new(SqliteExecutionResultRepository::new(pool.clone())),
            sessions: Arc::new(SqliteSessionRepository::new(pool)),
        })
    }

    /// 启动全部组件，阻塞到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        for worker in &self.workers {
            Arc::clone(worker)
                .start(
                    self.config.pool.sweep_interval_seconds,
                    shutdown_rx.resubscribe(),
                )
                .await
                .with_context(|| format!("启动Worker {} 失败", worker.worker_id()))?;
        }

        // Worker模式要求HTTP执行面；嵌入模式按配置可选
        if !self.workers.is_empty() {
            match (&self.config.worker.listen_addr, self.mode) {
                (Some(addr), _) => {
                    let state =
                        worker_server::WorkerServerState::new(self.workers.clone());
                    let addr = addr.clone();
                    let server_shutdown = shutdown_rx.resubscribe();
                    tokio::spawn(async move {
                        if let Err(e) = worker_server::serve(&addr, state, server_shutdown).await {
                            warn!("Worker HTTP执行面退出: {e}");
                        }
                    });
                }
                (None, AppMode::Worker) => {
                    anyhow::bail!("worker模式需要配置 worker.listen_addr");
                }
                (None, _) => {}
            }
        }

        match &self.dispatcher {
            Some(dispatcher) => {
                Arc::clone(dispatcher).run(shutdown_rx).await;
            }
            None => {
                // 纯Worker进程：等待关闭信号
                let mut rx = shutdown_rx;
                let _ = rx.recv().await;
            }
        }

        for worker in &self.workers {
            worker.stop().await;
        }

        info!("应用组件已全部停止");
        Ok(())
    }
}
