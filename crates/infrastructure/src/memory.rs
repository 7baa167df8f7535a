//! 内存仓储实现
//!
//! 行为与SQLite实现保持一致（包括CAS与幂等追加语义），
//! 供测试和零配置嵌入模式使用。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use collector_core::{
    models::{
        CollectionTask, ConnectionSession, ExecutionResult, Server, ServerStatus, TaskStatus,
    },
    traits::{
        ExecutionResultRepository, ServerRepository, SessionRepository, TaskRepository,
    },
    CollectorError, CollectorResult,
};

/// 内存服务器仓储
#[derive(Default)]
pub struct InMemoryServerRepository {
    servers: Mutex<HashMap<i64, Server>>,
    next_id: Mutex<i64>,
}

impl InMemoryServerRepository {
    pub fn new() -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
        }
    }
}

#[async_trait]
impl ServerRepository for InMemoryServerRepository {
    async fn create(&self, server: &Server) -> CollectorResult<Server> {
        let mut servers = self.servers.lock().unwrap_or_else(|e| e.into_inner());
        let mut next_id = self.next_id.lock().unwrap_or_else(|e| e.into_inner());

        let mut created = server.clone();
        created.id = *next_id;
        *next_id += 1;
        servers.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> CollectorResult<Option<Server>> {
        let servers = self.servers.lock().unwrap_or_else(|e| e.into_inner());
        Ok(servers.get(&id).cloned())
    }

    async fn list(&self) -> CollectorResult<Vec<Server>> {
        let servers = self.servers.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Server> = servers.values().cloned().collect();
        all.sort_by_key(|s| s.id);
        Ok(all)
    }

    async fn update_status(&self, id: i64, status: ServerStatus) -> CollectorResult<()> {
        let mut servers = self.servers.lock().unwrap_or_else(|e| e.into_inner());
        let server = servers
            .get_mut(&id)
            .ok_or(CollectorError::ServerNotFound { id })?;
        server.status = status;
        server.updated_at = Utc::now();
        Ok(())
    }
}

/// 内存任务仓储
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: Mutex<HashMap<i64, CollectionTask>>,
    next_id: Mutex<i64>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
        }
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &CollectionTask) -> CollectorResult<CollectionTask> {
        task.validate()?;
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut next_id = self.next_id.lock().unwrap_or_else(|e| e.into_inner());

        let mut created = task.clone();
        created.id = *next_id;
        *next_id += 1;
        tasks.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> CollectorResult<Option<CollectionTask>> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tasks.get(&id).cloned())
    }

    async fn update(&self, task: &CollectionTask) -> CollectorResult<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.contains_key(&task.id) {
            return Err(CollectorError::TaskNotFound { id: task.id });
        }
        let mut updated = task.clone();
        updated.updated_at = Utc::now();
        tasks.insert(task.id, updated);
        Ok(())
    }

    async fn delete(&self, id: i64) -> CollectorResult<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.remove(&id);
        Ok(())
    }

    async fn get_active_tasks(&self) -> CollectorResult<Vec<CollectionTask>> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut active: Vec<CollectionTask> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|t| t.id);
        Ok(active)
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
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let task = tasks
            .get_mut(&id)
            .ok_or(CollectorError::TaskNotFound { id })?;
        if task.status != expected {
            return Ok(false);
        }
        task.status = next;
        task.updated_at = Utc::now();
        Ok(true)
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
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let task = tasks
            .get_mut(&id)
            .ok_or(CollectorError::TaskNotFound { id })?;
        task.run_count = run_count;
        task.success_count = success_count;
        task.error_count = error_count;
        task.consecutive_failures = consecutive_failures;
        task.last_run_at = Some(last_run_at);
        task.next_run_at = next_run_at;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn set_config_error(&self, id: i64, message: Option<String>) -> CollectorResult<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let task = tasks
            .get_mut(&id)
            .ok_or(CollectorError::TaskNotFound { id })?;
        task.config_error = message;
        task.updated_at = Utc::now();
        Ok(())
    }
}

/// 内存执行记录仓储（只追加，以execution_id幂等）
#[derive(Default)]
pub struct InMemoryExecutionResultRepository {
    results: Mutex<Vec<ExecutionResult>>,
    next_id: Mutex<i64>,
}

impl InMemoryExecutionResultRepository {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }

    pub fn count(&self) -> usize {
        self.results.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl ExecutionResultRepository for InMemoryExecutionResultRepository {
    async fn append(&self, result: &ExecutionResult) -> CollectorResult<bool> {
        let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        if results
            .iter()
            .any(|r| r.execution_id == result.execution_id)
        {
            return Ok(false);
        }
        let mut next_id = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
        let mut stored = result.clone();
        stored.id = *next_id;
        *next_id += 1;
        results.push(stored);
        Ok(true)
    }

    async fn get_by_execution_id(
        &self,
        execution_id: Uuid,
    ) -> CollectorResult<Option<ExecutionResult>> {
        let results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        Ok(results
            .iter()
            .find(|r| r.execution_id == execution_id)
            .cloned())
    }

    async fn list_by_task(
        &self,
        task_id: i64,
        limit: i64,
    ) -> CollectorResult<Vec<ExecutionResult>> {
        let results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        let mut matched: Vec<ExecutionResult> = results
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.collected_at.cmp(&a.collected_at));
        matched.truncate(limit as usize);
        Ok(matched)
    }
}

/// 内存会话仓储
#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: Mutex<HashMap<String, ConnectionSession>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn upsert(&self, session: &ConnectionSession) -> CollectorResult<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get_by_session_id(
        &self,
        session_id: &str,
    ) -> CollectorResult<Option<ConnectionSession>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.get(session_id).cloned())
    }

    async fn list_by_server(&self, server_id: i64) -> CollectorResult<Vec<ConnectionSession>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions
            .values()
            .filter(|s| s.server_id == server_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, session_id: &str) -> CollectorResult<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
        Ok(())
    }
}
