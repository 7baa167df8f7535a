use std::sync::Arc;

use tracing::{debug, info, warn};

use collector_core::{
    models::{CollectionTask, ExecutionResult, ServerStatus, TaskStatus},
    traits::{ExecutionResultRepository, ServerRepository, TaskRepository},
    CollectorResult,
};

use crate::clock::ScheduleClock;

/// 结果聚合器
///
/// 把执行结局落为不可变的执行记录，更新任务计数器与下次调度
/// 时间，并维护 run_count = success_count + error_count 不变量
/// （超时计入error_count）。
pub struct ResultAggregator {
    task_repo: Arc<dyn TaskRepository>,
    server_repo: Arc<dyn ServerRepository>,
    result_repo: Arc<dyn ExecutionResultRepository>,
    /// 连续失败阈值，达到后周期任务进入failed终态
    max_consecutive_failures: i64,
}

impl ResultAggregator {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        server_repo: Arc<dyn ServerRepository>,
        result_repo: Arc<dyn ExecutionResultRepository>,
        max_consecutive_failures: i64,
    ) -> Self {
        Self {
            task_repo,
            server_repo,
            result_repo,
            max_consecutive_failures,
        }
    }

    /// 记录一次执行结局，返回更新后的任务
    ///
    /// 追加以execution_id为幂等键：重放同一条记录不会二次累加
    /// 计数器。`connection_error`为真时把目标服务器置为error。
    pub async fn record(
        &self,
        task: &CollectionTask,
        result: &ExecutionResult,
        connection_error: bool,
    ) -> CollectorResult<CollectionTask> {
        let inserted = self.result_repo.append(result).await?;
        if !inserted {
            debug!(
                "执行记录 {} 已存在，跳过计数器更新",
                result.execution_id
            );
            return self
                .task_repo
                .get_by_id(task.id)
                .await?
                .ok_or(collector_core::CollectorError::TaskNotFound { id: task.id });
        }

        let success = result.outcome.is_success();
        let run_count = task.run_count + 1;
        let success_count = task.success_count + i64::from(success);
        let error_count = task.error_count + i64::from(!success);
        let consecutive_failures = if success {
            0
        } else {
            task.consecutive_failures + 1
        };

        let next_status = self.next_status(task, success, consecutive_failures);
        let completed_at = result.collected_at;
        let next_run_at = match (next_status, &task.schedule_config) {
            (TaskStatus::Active, Some(schedule)) => {
                Some(ScheduleClock::next_run_after(schedule, completed_at))
            }
            _ => None,
        };

        self.task_repo
            .record_run(
                task.id,
                run_count,
                success_count,
                error_count,
                consecutive_failures,
                completed_at,
                next_run_at,
            )
            .await?;

        // running -> active/completed/failed；CAS失败说明状态被外部
        // 改动（如任务被停用），记录后以仓储中的现值为准
        let transitioned = self
            .task_repo
            .compare_and_set_status(task.id, TaskStatus::Running, next_status)
            .await?;
        if !transitioned {
            warn!(
                "任务 {} 状态回写失败: 期望running，实际已被修改",
                task.id
            );
        }

        self.sync_server_status(task.server_id, success, connection_error)
            .await?;

        if next_status == TaskStatus::Failed && !task.is_one_shot() {
            warn!(
                "任务 {} 连续失败 {} 次，已达到阈值 {}，转入failed",
                task.id, consecutive_failures, self.max_consecutive_failures
            );
        }

        metrics::counter!(
            "collector_executions_total",
            "outcome" => result.outcome.as_str()
        )
        .increment(1);
        metrics::histogram!("collector_execution_duration_ms")
            .record(result.execution_time_ms as f64);

        info!(
            "任务 {} 执行记录完成: outcome={}, run={}, success={}, error={}",
            task.id,
            result.outcome.as_str(),
            run_count,
            success_count,
            error_count
        );

        self.task_repo
            .get_by_id(task.id)
            .await?
            .ok_or(collector_core::CollectorError::TaskNotFound { id: task.id })
    }

    /// 执行结束后的任务状态
    ///
    /// 一次性任务直接进入终态；周期任务回到active按自然间隔
    /// 重试，连续失败达到阈值后转入failed。
    fn next_status(
        &self,
        task: &CollectionTask,
        success: bool,
        consecutive_failures: i64,
    ) -> TaskStatus {
        if task.is_one_shot() {
            if success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            }
        } else if !success && consecutive_failures >= self.max_consecutive_failures {
            TaskStatus::Failed
        } else {
            TaskStatus::Active
        }
    }

    /// 服务器状态联动：连接失败置error，成功执行恢复active
    async fn sync_server_status(
        &self,
        server_id: i64,
        success: bool,
        connection_error: bool,
    ) -> CollectorResult<()> {
        if connection_error {
            warn!("服务器 {} 连接失败，状态置为error", server_id);
            self.server_repo
                .update_status(server_id, ServerStatus::Error)
                .await?;
        } else if success {
            if let Some(server) = self.server_repo.get_by_id(server_id).await? {
                if server.status == ServerStatus::Error {
                    info!("服务器 {} 采集恢复，状态置回active", server_id);
                    self.server_repo
                        .update_status(server_id, ServerStatus::Active)
                        .await?;
                }
            }
        }
        Ok(())
    }
}
