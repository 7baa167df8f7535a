//! 嵌入式SQLite仓储实现
//!
//! 枚举按线名串存储，操作与调度配置按JSON文本存储；
//! 执行记录表在execution_id上建唯一索引实现幂等追加。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use collector_core::{
    models::{
        CollectionTask, ConnectionSession, ExecutionResult, ManagementType, OutcomeStatus,
        ProtocolType, ScheduleConfig, Server, ServerStatus, SessionStatus, TaskOperation,
        TaskStatus, TaskType,
    },
    traits::{ExecutionResultRepository, ServerRepository, SessionRepository, TaskRepository},
    CollectorError, CollectorResult,
};

fn db_err(e: sqlx::Error) -> CollectorError {
    CollectorError::Database(e.to_string())
}

fn decode_err(message: String) -> CollectorError {
    CollectorError::Database(message)
}

/// 建表与索引
pub async fn run_migrations(pool: &SqlitePool) -> CollectorResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS servers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL DEFAULT 22,
            username TEXT NOT NULL,
            password TEXT NOT NULL,
            protocol_type TEXT NOT NULL DEFAULT 'ssh',
            device_type TEXT NOT NULL DEFAULT 'linux',
            management_type TEXT NOT NULL DEFAULT 'manual',
            status TEXT NOT NULL DEFAULT 'active',
            description TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collection_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            server_id INTEGER NOT NULL,
            task_type TEXT NOT NULL,
            operation TEXT NOT NULL,
            schedule_config TEXT,
            timeout_seconds INTEGER,
            status TEXT NOT NULL DEFAULT 'active',
            run_count INTEGER NOT NULL DEFAULT 0,
            success_count INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            config_error TEXT,
            last_run_at DATETIME,
            next_run_at DATETIME,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (server_id) REFERENCES servers(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS execution_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL,
            server_id INTEGER NOT NULL,
            execution_id TEXT NOT NULL,
            outcome TEXT NOT NULL,
            output TEXT,
            error_message TEXT,
            execution_time_ms INTEGER NOT NULL DEFAULT 0,
            collected_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS connection_sessions (
            session_id TEXT PRIMARY KEY,
            server_id INTEGER NOT NULL,
            protocol_type TEXT NOT NULL,
            status TEXT NOT NULL,
            connected_at DATETIME NOT NULL,
            last_activity_at DATETIME NOT NULL,
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err)?;

    let indexes = [
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_results_execution_id ON execution_results(execution_id)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_status ON collection_tasks(status)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_server_id ON collection_tasks(server_id)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_next_run_at ON collection_tasks(next_run_at)",
        "CREATE INDEX IF NOT EXISTS idx_results_task_id ON execution_results(task_id)",
        "CREATE INDEX IF NOT EXISTS idx_sessions_server_id ON connection_sessions(server_id)",
    ];
    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await.map_err(db_err)?;
    }

    Ok(())
}

fn server_from_row(row: &sqlx::sqlite::SqliteRow) -> CollectorResult<Server> {
    let protocol: String = row.try_get("protocol_type").map_err(db_err)?;
    let management: String = row.try_get("management_type").map_err(db_err)?;
    let status: String = row.try_get("status").map_err(db_err)?;
    let port: i64 = row.try_get("port").map_err(db_err)?;

    Ok(Server {
        id: row.try_get("id").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        host: row.try_get("host").map_err(db_err)?,
        port: port as u16,
        username: row.try_get("username").map_err(db_err)?,
        password: row.try_get("password").map_err(db_err)?,
        protocol_type: ProtocolType::parse_str(&protocol)
            .ok_or_else(|| decode_err(format!("无效的协议类型: {protocol}")))?,
        device_type: row.try_get("device_type").map_err(db_err)?,
        management_type: ManagementType::parse_str(&management)
            .ok_or_else(|| decode_err(format!("无效的管理方式: {management}")))?,
        status: ServerStatus::parse_str(&status)
            .ok_or_else(|| decode_err(format!("无效的服务器状态: {status}")))?,
        description: row.try_get("description").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> CollectorResult<CollectionTask> {
    let task_type: String = row.try_get("task_type").map_err(db_err)?;
    let status: String = row.try_get("status").map_err(db_err)?;
    let operation_json: String = row.try_get("operation").map_err(db_err)?;
    let schedule_json: Option<String> = row.try_get("schedule_config").map_err(db_err)?;
    let timeout: Option<i64> = row.try_get("timeout_seconds").map_err(db_err)?;

    let operation: TaskOperation = serde_json::from_str(&operation_json)?;
    let schedule_config: Option<ScheduleConfig> = match schedule_json {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };

    Ok(CollectionTask {
        id: row.try_get("id").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        server_id: row.try_get("server_id").map_err(db_err)?,
        task_type: TaskType::parse_str(&task_type)
            .ok_or_else(|| decode_err(format!("无效的任务类型: {task_type}")))?,
        operation,
        schedule_config,
        timeout_seconds: timeout.map(|t| t as u64),
        status: TaskStatus::parse_str(&status)
            .ok_or_else(|| decode_err(format!("无效的任务状态: {status}")))?,
        run_count: row.try_get("run_count").map_err(db_err)?,
        success_count: row.try_get("success_count").map_err(db_err)?,
        error_count: row.try_get("error_count").map_err(db_err)?,
        consecutive_failures: row.try_get("consecutive_failures").map_err(db_err)?,
        config_error: row.try_get("config_error").map_err(db_err)?,
        last_run_at: row.try_get("last_run_at").map_err(db_err)?,
        next_run_at: row.try_get("next_run_at").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn result_from_row(row: &sqlx::sqlite::SqliteRow) -> CollectorResult<ExecutionResult> {
    let outcome: String = row.try_get("outcome").map_err(db_err)?;
    let execution_id: String = row.try_get("execution_id").map_err(db_err)?;
    let elapsed: i64 = row.try_get("execution_time_ms").map_err(db_err)?;

    Ok(ExecutionResult {
        id: row.try_get("id").map_err(db_err)?,
        task_id: row.try_get("task_id").map_err(db_err)?,
        server_id: row.try_get("server_id").map_err(db_err)?,
        execution_id: Uuid::parse_str(&execution_id)
            .map_err(|e| decode_err(format!("无效的execution_id: {e}")))?,
        outcome: OutcomeStatus::parse_str(&outcome)
            .ok_or_else(|| decode_err(format!("无效的执行结局: {outcome}")))?,
        output: row.try_get("output").map_err(db_err)?,
        error_message: row.try_get("error_message").map_err(db_err)?,
        execution_time_ms: elapsed as u64,
        collected_at: row.try_get("collected_at").map_err(db_err)?,
    })
}

fn session_from_row(row: &sqlx::sqlite::SqliteRow) -> CollectorResult<ConnectionSession> {
    let protocol: String = row.try_get("protocol_type").map_err(db_err)?;
    let status: String = row.try_get("status").map_err(db_err)?;

    Ok(ConnectionSession {
        session_id: row.try_get("session_id").map_err(db_err)?,
        server_id: row.try_get("server_id").map_err(db_err)?,
        protocol_type: ProtocolType::parse_str(&protocol)
            .ok_or_else(|| decode_err(format!("无效的协议类型: {protocol}")))?,
        status: SessionStatus::parse_str(&status)
            .ok_or_else(|| decode_err(format!("无效的会话状态: {status}")))?,
        connected_at: row.try_get("connected_at").map_err(db_err)?,
        last_activity_at: row.try_get("last_activity_at").map_err(db_err)?,
        error_message: row.try_get("error_message").map_err(db_err)?,
    })
}

/// SQLite服务器仓储
pub struct SqliteServerRepository {
    pool: SqlitePool,
}

impl SqliteServerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServerRepository for SqliteServerRepository {
    async fn create(&self, server: &Server) -> CollectorResult<Server> {
        let result = sqlx::query(
            r#"
            INSERT INTO servers
                (name, host, port, username, password, protocol_type, device_type,
                 management_type, status, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&server.name)
        .bind(&server.host)
        .bind(i64::from(server.port))
        .bind(&server.username)
        .bind(&server.password)
        .bind(server.protocol_type.as_str())
        .bind(&server.device_type)
        .bind(server.management_type.as_str())
        .bind(server.status.as_str())
        .bind(&server.description)
        .bind(server.created_at)
        .bind(server.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let mut created = server.clone();
        created.id = result.last_insert_rowid();
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> CollectorResult<Option<Server>> {
        let row = sqlx::query("SELECT * FROM servers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| server_from_row(&r)).transpose()
    }

    async fn list(&self) -> CollectorResult<Vec<Server>> {
        let rows = sqlx::query("SELECT * FROM servers ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(server_from_row).collect()
    }

    async fn update_status(&self, id: i64, status: ServerStatus) -> CollectorResult<()> {
        let result = sqlx::query("UPDATE servers SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(CollectorError::ServerNotFound { id });
        }
        Ok(())
    }
}

/// SQLite任务仓储
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &CollectionTask) -> CollectorResult<CollectionTask> {
        task.validate()?;

        let operation_json = serde_json::to_string(&task.operation)?;
        let schedule_json = task
            .schedule_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO collection_tasks
                (name, server_id, task_type, operation, schedule_config, timeout_seconds,
                 status, run_count, success_count, error_count, consecutive_failures,
                 config_error, last_run_at, next_run_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.name)
        .bind(task.server_id)
        .bind(task.task_type.as_str())
        .bind(operation_json)
        .bind(schedule_json)
        .bind(task.timeout_seconds.map(|t| t as i64))
        .bind(task.status.as_str())
        .bind(task.run_count)
        .bind(task.success_count)
        .bind(task.error_count)
        .bind(task.consecutive_failures)
        .bind(&task.config_error)
        .bind(task.last_run_at)
        .bind(task.next_run_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let mut created = task.clone();
        created.id = result.last_insert_rowid();
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> CollectorResult<Option<CollectionTask>> {
        let row = sqlx::query("SELECT * FROM collection_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| task_from_row(&r)).transpose()
    }

    async fn update(&self, task: &CollectionTask) -> CollectorResult<()> {
        let operation_json = serde_json::to_string(&task.operation)?;
        let schedule_json = task
            .schedule_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE collection_tasks SET
                name = ?, server_id = ?, task_type = ?, operation = ?, schedule_config = ?,
                timeout_seconds = ?, status = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&task.name)
        .bind(task.server_id)
        .bind(task.task_type.as_str())
        .bind(operation_json)
        .bind(schedule_json)
        .bind(task.timeout_seconds.map(|t| t as i64))
        .bind(task.status.as_str())
        .bind(Utc::now())
        .bind(task.id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CollectorError::TaskNotFound { id: task.id });
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> CollectorResult<()> {
        sqlx::query("DELETE FROM collection_tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_active_tasks(&self) -> CollectorResult<Vec<CollectionTask>> {
        let rows = sqlx::query("SELECT * FROM collection_tasks WHERE status = 'active' ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(task_from_row).collect()
    }

    async fn compare_and_set_status(
        &self,
        id: i64,
        expected: TaskStatus,
        next: TaskStatus,
    ) -> CollectorResult<bool> {
        if !expected.can_transition_to(next) {
            return Ok(false);
        }
        let result = sqlx::query(
            "UPDATE collection_tasks SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(Utc::now())
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_run(
        &self,
        id: i64,
        run_count: i64,
        success_count: i64,
        error_count: i64,
        consecutive_failures: i64,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> CollectorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE collection_tasks SET
                run_count = ?, success_count = ?, error_count = ?, consecutive_failures = ?,
                last_run_at = ?, next_run_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(run_count)
        .bind(success_count)
        .bind(error_count)
        .bind(consecutive_failures)
        .bind(last_run_at)
        .bind(next_run_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CollectorError::TaskNotFound { id });
        }
        Ok(())
    }

    async fn set_config_error(&self, id: i64, message: Option<String>) -> CollectorResult<()> {
        let result =
            sqlx::query("UPDATE collection_tasks SET config_error = ?, updated_at = ? WHERE id = ?")
                .bind(message)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(CollectorError::TaskNotFound { id });
        }
        Ok(())
    }
}

/// SQLite执行记录仓储
pub struct SqliteExecutionResultRepository {
    pool: SqlitePool,
}

impl SqliteExecutionResultRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionResultRepository for SqliteExecutionResultRepository {
    async fn append(&self, result: &ExecutionResult) -> CollectorResult<bool> {
        // execution_id上的唯一索引保证重放不产生第二条记录
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO execution_results
                (task_id, server_id, execution_id, outcome, output, error_message,
                 execution_time_ms, collected_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(result.task_id)
        .bind(result.server_id)
        .bind(result.execution_id.to_string())
        .bind(result.outcome.as_str())
        .bind(&result.output)
        .bind(&result.error_message)
        .bind(result.execution_time_ms as i64)
        .bind(result.collected_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(inserted.rows_affected() > 0)
    }

    async fn get_by_execution_id(
        &self,
        execution_id: Uuid,
    ) -> CollectorResult<Option<ExecutionResult>> {
        let row = sqlx::query("SELECT * FROM execution_results WHERE execution_id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| result_from_row(&r)).transpose()
    }

    async fn list_by_task(
        &self,
        task_id: i64,
        limit: i64,
    ) -> CollectorResult<Vec<ExecutionResult>> {
        let rows = sqlx::query(
            "SELECT * FROM execution_results WHERE task_id = ? ORDER BY collected_at DESC LIMIT ?",
        )
        .bind(task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(result_from_row).collect()
    }
}

/// SQLite会话仓储
pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn upsert(&self, session: &ConnectionSession) -> CollectorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO connection_sessions
                (session_id, server_id, protocol_type, status, connected_at,
                 last_activity_at, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                status = excluded.status,
                last_activity_at = excluded.last_activity_at,
                error_message = excluded.error_message
            "#,
        )
        .bind(&session.session_id)
        .bind(session.server_id)
        .bind(session.protocol_type.as_str())
        .bind(session.status.as_str())
        .bind(session.connected_at)
        .bind(session.last_activity_at)
        .bind(&session.error_message)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_by_session_id(
        &self,
        session_id: &str,
    ) -> CollectorResult<Option<ConnectionSession>> {
        let row = sqlx::query("SELECT * FROM connection_sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| session_from_row(&r)).transpose()
    }

    async fn list_by_server(&self, server_id: i64) -> CollectorResult<Vec<ConnectionSession>> {
        let rows = sqlx::query("SELECT * FROM connection_sessions WHERE server_id = ?")
            .bind(server_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(session_from_row).collect()
    }

    async fn delete(&self, session_id: &str) -> CollectorResult<()> {
        sqlx::query("DELETE FROM connection_sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
