use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use collector_core::{
    models::{CollectionTask, ScheduleConfig, TaskStatus},
    traits::TaskRepository,
    CollectorResult,
};

/// 调度时钟
///
/// 根据任务的调度配置与上次执行时间计算下次到期时间，并从
/// 活跃任务中选出当前到期的任务。`running`状态的任务无论时间
/// 戳如何都不会被选中，防止慢执行期间的重入分发。
pub struct ScheduleClock {
    task_repo: Arc<dyn TaskRepository>,
}

impl ScheduleClock {
    pub fn new(task_repo: Arc<dyn TaskRepository>) -> Self {
        Self { task_repo }
    }

    /// next_run_at = 完成时间 + 间隔
    ///
    /// 以实际完成时间为基准，避免执行延迟逐轮累积漂移。
    pub fn next_run_after(schedule: &ScheduleConfig, completed_at: DateTime<Utc>) -> DateTime<Utc> {
        completed_at + schedule.interval.as_duration()
    }

    /// 任务是否到期
    ///
    /// 从未执行过的任务立即到期；否则以next_run_at <= now判定。
    pub fn is_due(task: &CollectionTask, now: DateTime<Utc>) -> bool {
        if task.status != TaskStatus::Active {
            return false;
        }
        if task.last_run_at.is_none() {
            return true;
        }
        match task.next_run_at {
            Some(next) => next <= now,
            // 有执行历史但无下次时间：一次性任务不再到期
            None => false,
        }
    }

    /// 扫描当前到期的任务，按next_run_at升序返回（最早到期优先）
    pub async fn poll(&self, now: DateTime<Utc>) -> CollectorResult<Vec<CollectionTask>> {
        let active_tasks = self.task_repo.get_active_tasks().await?;
        let total = active_tasks.len();

        let mut due: Vec<CollectionTask> = active_tasks
            .into_iter()
            .filter(|task| Self::is_due(task, now))
            .collect();

        // 从未执行的任务视为最早到期
        due.sort_by_key(|task| (task.next_run_at.unwrap_or(DateTime::<Utc>::MIN_UTC), task.id));

        debug!("调度扫描: 活跃任务 {} 个，到期 {} 个", total, due.len());
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use collector_core::models::TaskOperation;

    fn command_task(id: i64) -> CollectionTask {
        let mut task = CollectionTask::new(
            format!("task-{id}"),
            1,
            TaskOperation::Command {
                command: "uptime".to_string(),
            },
        );
        task.id = id;
        task
    }

    #[test]
    fn test_next_run_is_completion_plus_interval() {
        let schedule = ScheduleConfig::every_minutes(5);
        let completed_at = Utc::now();
        assert_eq!(
            ScheduleClock::next_run_after(&schedule, completed_at),
            completed_at + Duration::minutes(5)
        );
    }

    #[test]
    fn test_never_run_task_is_due() {
        let task = command_task(1);
        assert!(task.last_run_at.is_none());
        assert!(ScheduleClock::is_due(&task, Utc::now()));
    }

    #[test]
    fn test_due_by_next_run_at() {
        let now = Utc::now();
        let mut task = command_task(1);
        task.last_run_at = Some(now - Duration::minutes(10));

        task.next_run_at = Some(now - Duration::seconds(1));
        assert!(ScheduleClock::is_due(&task, now));

        task.next_run_at = Some(now + Duration::seconds(30));
        assert!(!ScheduleClock::is_due(&task, now));
    }

    #[test]
    fn test_running_task_never_due() {
        let now = Utc::now();
        let mut task = command_task(1);
        task.status = TaskStatus::Running;
        task.next_run_at = Some(now - Duration::minutes(5));
        assert!(!ScheduleClock::is_due(&task, now));
    }

    #[test]
    fn test_inactive_task_never_due() {
        let mut task = command_task(1);
        task.status = TaskStatus::Inactive;
        assert!(!ScheduleClock::is_due(&task, Utc::now()));
    }
}
