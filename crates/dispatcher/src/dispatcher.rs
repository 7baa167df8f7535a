use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use collector_core::{
    config::DispatcherConfig,
    models::{CollectionTask, ExecutionResult, TaskStatus},
    traits::{
        CollectionRequest, CollectionResponse, ServerRepository, TaskRepository, WorkerInvoker,
    },
    CollectorError, CollectorResult,
};

use crate::aggregator::ResultAggregator;
use crate::clock::ScheduleClock;
use crate::placement::{PlacementConstraints, PlacementPolicy};
use crate::registry::WorkerRegistry;

/// 调用超时之上的外层保护余量（秒）
///
/// Worker自身负责操作级超时；外层时限只兜底传输异常，
/// 保证分发流程永不无限阻塞。
const INVOKE_GRACE_SECONDS: u64 = 5;

/// 任务分发器
///
/// 编排循环：拉取到期任务，向放置策略要Worker，调用Worker的
/// 统一执行契约，把结局交给结果聚合器。active->running的原子
/// 迁移是同一任务不被并发分发的唯一闸门。
pub struct TaskDispatcher {
    task_repo: Arc<dyn TaskRepository>,
    server_repo: Arc<dyn ServerRepository>,
    clock: ScheduleClock,
    placement: PlacementPolicy,
    registry: Arc<WorkerRegistry>,
    invoker: Arc<dyn WorkerInvoker>,
    aggregator: Arc<ResultAggregator>,
    config: DispatcherConfig,
}

impl TaskDispatcher {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        server_repo: Arc<dyn ServerRepository>,
        registry: Arc<WorkerRegistry>,
        invoker: Arc<dyn WorkerInvoker>,
        aggregator: Arc<ResultAggregator>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            clock: ScheduleClock::new(task_repo.clone()),
            placement: PlacementPolicy::new(registry.clone()),
            task_repo,
            server_repo,
            registry,
            invoker,
            aggregator,
            config,
        }
    }

    /// 分发单个任务
    ///
    /// 任务不处于active（含已有在途实例）时CAS失败，以
    /// `ConcurrentDispatch`结束且不产生任何计数。分发中途失败
    /// （无可用Worker等）时任务回到active，next_run_at保持不变，
    /// 等待下轮扫描重试。
    pub async fn dispatch(&self, task: &CollectionTask) -> CollectorResult<ExecutionResult> {
        let claimed = self
            .task_repo
            .compare_and_set_status(task.id, TaskStatus::Active, TaskStatus::Running)
            .await?;
        if !claimed {
            debug!("任务 {} 不在active状态，跳过本次分发", task.id);
            return Err(CollectorError::ConcurrentDispatch { task_id: task.id });
        }

        match self.dispatch_claimed(task).await {
            Ok(result) => Ok(result),
            Err(e) => {
                // 归还running占用；聚合器已回写过状态时此CAS落空，无副作用
                let _ = self
                    .task_repo
                    .compare_and_set_status(task.id, TaskStatus::Running, TaskStatus::Active)
                    .await;
                Err(e)
            }
        }
    }

    /// 手动触发一次分发（不看next_run_at）
    pub async fn trigger(&self, task_id: i64) -> CollectorResult<ExecutionResult> {
        let task = self
            .task_repo
            .get_by_id(task_id)
            .await?
            .ok_or(CollectorError::TaskNotFound { id: task_id })?;
        info!("手动触发任务 {} ({})", task.id, task.name);
        self.dispatch(&task).await
    }

    async fn dispatch_claimed(&self, task: &CollectionTask) -> CollectorResult<ExecutionResult> {
        let server = self
            .server_repo
            .get_by_id(task.server_id)
            .await?
            .ok_or(CollectorError::ServerNotFound { id: task.server_id })?;

        let constraints = PlacementConstraints::for_task(task, &server);
        let (worker, lease) = match self.placement.select(&constraints) {
            Ok(selected) => selected,
            Err(e @ CollectorError::AffinityUnsatisfiable { .. }) => {
                // 配置类错误：挂常驻标记供管理层处置，避免无声地永久重试
                self.task_repo
                    .set_config_error(task.id, Some(e.to_string()))
                    .await?;
                metrics::counter!("collector_placement_failures_total", "kind" => "affinity")
                    .increment(1);
                return Err(e);
            }
            Err(e) => {
                metrics::counter!("collector_placement_failures_total", "kind" => "no_worker")
                    .increment(1);
                return Err(e);
            }
        };

        if task.config_error.is_some() {
            self.task_repo.set_config_error(task.id, None).await?;
        }

        let timeout_seconds = task.effective_timeout(self.config.default_timeout_seconds);
        let request = CollectionRequest {
            task_id: task.id,
            params: server.connection_params(),
            operation: task.operation.clone(),
            timeout_seconds,
        };

        debug!(
            "任务 {} 分发至Worker {} (超时: {}s)",
            task.id,
            lease.worker_id(),
            timeout_seconds
        );

        let invoke = self.invoker.invoke(&worker, &request);
        let response = match tokio::time::timeout(
            Duration::from_secs(timeout_seconds + INVOKE_GRACE_SECONDS),
            invoke,
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("任务 {} 调用Worker失败: {}", task.id, e);
                let connection_error = e.is_connection_error();
                CollectionResponse::failed(e.to_string(), 0, connection_error)
            }
            Err(_) => {
                warn!(
                    "任务 {} 的Worker调用超出外层保护时限，按timeout记录",
                    task.id
                );
                CollectionResponse::timeout(timeout_seconds)
            }
        };

        // 在途占位随租约释放，无论结局如何
        drop(lease);

        let mut result = ExecutionResult::new(task.id, task.server_id, response.outcome);
        result.output = response.output.clone();
        result.error_message = response.error_message.clone();
        result.execution_time_ms = response.execution_time_ms;

        self.aggregator
            .record(task, &result, response.connection_error)
            .await?;

        Ok(result)
    }

    /// 扫描到期任务并并发分发，返回完成分发的数量
    pub async fn poll_and_dispatch(self: Arc<Self>) -> CollectorResult<usize> {
        let now = Utc::now();
        let due_tasks = self.clock.poll(now).await?;
        if due_tasks.is_empty() {
            return Ok(0);
        }

        info!("本轮扫描到 {} 个到期任务", due_tasks.len());

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_dispatches));
        let mut join_set = JoinSet::new();

        for task in due_tasks {
            let dispatcher = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return false;
                };
                match dispatcher.dispatch(&task).await {
                    Ok(result) => {
                        debug!(
                            "任务 {} 分发完成: {}",
                            task.id,
                            result.outcome.as_str()
                        );
                        true
                    }
                    Err(CollectorError::ConcurrentDispatch { task_id }) => {
                        // 单飞冲突：静默丢弃，只留日志
                        debug!("任务 {} 单飞冲突，本次分发丢弃", task_id);
                        false
                    }
                    Err(CollectorError::NoEligibleWorker { reason }) => {
                        warn!("任务 {} 暂无可用Worker: {}，下轮重试", task.id, reason);
                        false
                    }
                    Err(e) => {
                        error!("任务 {} 分发失败: {}", task.id, e);
                        false
                    }
                }
            });
        }

        let mut dispatched = 0;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(e) => error!("分发协程异常退出: {e}"),
            }
        }

        metrics::counter!("collector_dispatch_rounds_total").increment(1);
        Ok(dispatched)
    }

    /// 调度主循环：周期扫描 + Worker存活清理，直到收到关闭信号
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut tick =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_seconds));
        info!(
            "分发器启动，扫描周期 {}s",
            self.config.poll_interval_seconds
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.registry.evict_stale();
                    match Arc::clone(&self).poll_and_dispatch().await {
                        Ok(count) if count > 0 => {
                            info!("本轮完成 {} 个任务的分发", count);
                        }
                        Ok(_) => {}
                        Err(e) => error!("调度扫描失败: {e}"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("分发器收到关闭信号，停止调度");
                    break;
                }
            }
        }
    }
}
