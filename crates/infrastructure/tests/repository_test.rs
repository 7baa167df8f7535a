use std::sync::Arc;

use chrono::{Duration, Utc};
use collector_core::{
    models::{
        CollectionTask, ConnectionSession, ExecutionResult, OutcomeStatus, ProtocolType,
        ScheduleConfig, Server, ServerStatus, SessionStatus, TaskOperation, TaskStatus,
    },
    traits::{
        ExecutionResultRepository, ServerRepository, SessionRepository, TaskRepository,
    },
};
use collector_infrastructure::{
    database::connect_sqlite, InMemoryTaskRepository, SqliteExecutionResultRepository,
    SqliteServerRepository, SqliteSessionRepository, SqliteTaskRepository,
};

struct SqliteFixture {
    _dir: tempfile::TempDir,
    servers: SqliteServerRepository,
    tasks: SqliteTaskRepository,
    results: SqliteExecutionResultRepository,
    sessions: SqliteSessionRepository,
}

async fn sqlite_fixture() -> SqliteFixture {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let pool = connect_sqlite(&url).await.unwrap();
    SqliteFixture {
        _dir: dir,
        servers: SqliteServerRepository::new(pool.clone()),
        tasks: SqliteTaskRepository::new(pool.clone()),
        results: SqliteExecutionResultRepository::new(pool.clone()),
        sessions: SqliteSessionRepository::new(pool),
    }
}

fn sample_server() -> Server {
    let mut server = Server::new(
        "edge-1".to_string(),
        "192.0.2.40".to_string(),
        22,
        "ops".to_string(),
        "secret".to_string(),
    );
    server.protocol_type = ProtocolType::NetmikoSsh;
    server.description = Some("机房边缘节点".to_string());
    server
}

fn sample_task(server_id: i64) -> CollectionTask {
    let mut task = CollectionTask::new(
        "daily-uptime".to_string(),
        server_id,
        TaskOperation::Command {
            command: "uptime".to_string(),
        },
    );
    task.schedule_config = Some(ScheduleConfig::every_minutes(5));
    task.timeout_seconds = Some(20);
    task
}

#[tokio::test]
async fn test_server_roundtrip_and_status_update() {
    let f = sqlite_fixture().await;
    let created = f.servers.create(&sample_server()).await.unwrap();
    assert!(created.id > 0);

    let loaded = f.servers.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "edge-1");
    assert_eq!(loaded.protocol_type, ProtocolType::NetmikoSsh);
    assert_eq!(loaded.port, 22);
    assert_eq!(loaded.description.as_deref(), Some("机房边缘节点"));

    f.servers
        .update_status(created.id, ServerStatus::Error)
        .await
        .unwrap();
    let loaded = f.servers.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ServerStatus::Error);
}

#[tokio::test]
async fn test_task_roundtrip_preserves_operation_and_schedule() {
    let f = sqlite_fixture().await;
    let server = f.servers.create(&sample_server()).await.unwrap();
    let created = f.tasks.create(&sample_task(server.id)).await.unwrap();

    let loaded = f.tasks.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(loaded.task_type.as_str(), "command");
    assert_eq!(
        loaded.operation,
        TaskOperation::Command {
            command: "uptime".to_string()
        }
    );
    assert_eq!(loaded.schedule_config, Some(ScheduleConfig::every_minutes(5)));
    assert_eq!(loaded.timeout_seconds, Some(20));
    assert_eq!(loaded.status, TaskStatus::Active);
}

#[tokio::test]
async fn test_compare_and_set_status_semantics() {
    let f = sqlite_fixture().await;
    let server = f.servers.create(&sample_server()).await.unwrap();
    let task = f.tasks.create(&sample_task(server.id)).await.unwrap();

    // active -> running 成功；重复CAS失败（单飞闸门）
    assert!(f
        .tasks
        .compare_and_set_status(task.id, TaskStatus::Active, TaskStatus::Running)
        .await
        .unwrap());
    assert!(!f
        .tasks
        .compare_and_set_status(task.id, TaskStatus::Active, TaskStatus::Running)
        .await
        .unwrap());

    // 迁移表外的写入被拒绝（active -> completed 非法）
    assert!(f
        .tasks
        .compare_and_set_status(task.id, TaskStatus::Running, TaskStatus::Active)
        .await
        .unwrap());
    assert!(!f
        .tasks
        .compare_and_set_status(task.id, TaskStatus::Active, TaskStatus::Completed)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_record_run_and_active_scan() {
    let f = sqlite_fixture().await;
    let server = f.servers.create(&sample_server()).await.unwrap();
    let task = f.tasks.create(&sample_task(server.id)).await.unwrap();

    let now = Utc::now();
    let next = now + Duration::minutes(5);
    f.tasks
        .record_run(task.id, 3, 2, 1, 1, now, Some(next))
        .await
        .unwrap();

    let loaded = f.tasks.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.run_count, 3);
    assert_eq!(loaded.success_count, 2);
    assert_eq!(loaded.error_count, 1);
    assert_eq!(loaded.consecutive_failures, 1);
    // 时间戳按毫秒粒度比较，避开存储编码的亚毫秒精度差异
    assert_eq!(
        loaded.last_run_at.map(|t| t.timestamp_millis()),
        Some(now.timestamp_millis())
    );
    assert_eq!(
        loaded.next_run_at.map(|t| t.timestamp_millis()),
        Some(next.timestamp_millis())
    );

    let active = f.tasks.get_active_tasks().await.unwrap();
    assert_eq!(active.len(), 1);

    // inactive后不再出现在活跃扫描中
    f.tasks
        .compare_and_set_status(task.id, TaskStatus::Active, TaskStatus::Inactive)
        .await
        .unwrap();
    assert!(f.tasks.get_active_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_execution_result_append_is_idempotent() {
    let f = sqlite_fixture().await;
    let server = f.servers.create(&sample_server()).await.unwrap();
    let task = f.tasks.create(&sample_task(server.id)).await.unwrap();

    let result = ExecutionResult::success(task.id, server.id, "ok".to_string(), 15);
    assert!(f.results.append(&result).await.unwrap());
    // 同一execution_id重放：不插入第二条
    assert!(!f.results.append(&result).await.unwrap());

    let loaded = f
        .results
        .get_by_execution_id(result.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.outcome, OutcomeStatus::Success);
    assert_eq!(loaded.execution_time_ms, 15);

    let history = f.results.list_by_task(task.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_session_upsert_and_delete() {
    let f = sqlite_fixture().await;

    let mut session = ConnectionSession::new("sess-1".to_string(), 7, ProtocolType::Ssh);
    f.sessions.upsert(&session).await.unwrap();

    // upsert更新状态与活动时间
    session.status = SessionStatus::Error;
    session.error_message = Some("命令超时".to_string());
    f.sessions.upsert(&session).await.unwrap();

    let loaded = f.sessions.get_by_session_id("sess-1").await.unwrap().unwrap();
    assert_eq!(loaded.status, SessionStatus::Error);
    assert_eq!(loaded.server_id, 7);

    let by_server = f.sessions.list_by_server(7).await.unwrap();
    assert_eq!(by_server.len(), 1);

    f.sessions.delete("sess-1").await.unwrap();
    assert!(f
        .sessions
        .get_by_session_id("sess-1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_memory_repository_cas_parity() {
    // 内存实现与SQLite实现的CAS语义一致
    let tasks = Arc::new(InMemoryTaskRepository::new());
    let task = tasks
        .create(&sample_task(1))
        .await
        .unwrap();

    assert!(tasks
        .compare_and_set_status(task.id, TaskStatus::Active, TaskStatus::Running)
        .await
        .unwrap());
    assert!(!tasks
        .compare_and_set_status(task.id, TaskStatus::Active, TaskStatus::Running)
        .await
        .unwrap());
    assert!(!tasks
        .compare_and_set_status(task.id, TaskStatus::Running, TaskStatus::Inactive)
        .await
        .unwrap());
}
