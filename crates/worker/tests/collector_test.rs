use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use collector_core::{
    config::PoolConfig,
    models::{
        ConnectionIdentity, ConnectionParams, OutcomeStatus, ProtocolType, TaskOperation,
    },
    traits::{CollectionRequest, ProtocolCollector},
    CollectorError, CollectorResult,
};
use collector_infrastructure::InMemorySessionRepository;
use collector_worker::{OperationOutput, PooledCollector, SessionTransport};

/// 可编排行为的模拟传输层
struct MockTransport {
    opens: AtomicUsize,
    closed: Mutex<Vec<String>>,
    fail_connect: AtomicBool,
    hang: AtomicBool,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            opens: AtomicUsize::new(0),
            closed: Mutex::new(Vec::new()),
            fail_connect: AtomicBool::new(false),
            hang: AtomicBool::new(false),
        })
    }

    fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn closed_sessions(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn open(&self, params: &ConnectionParams) -> CollectorResult<String> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(CollectorError::Connection {
                message: format!("无法连接 {}:{}", params.host, params.port),
            });
        }
        let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("mock-{n}"))
    }

    async fn run(
        &self,
        _remote_id: &str,
        _params: &ConnectionParams,
        operation: &TaskOperation,
    ) -> CollectorResult<OperationOutput> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        match operation {
            TaskOperation::Command { command } if command == "uname -a" => Ok(
                OperationOutput::ok("Linux test-host 5.15.0-generic x86_64 GNU/Linux".to_string()),
            ),
            TaskOperation::Command { command } => {
                Ok(OperationOutput::ok(format!("executed: {command}")))
            }
            _ => Ok(OperationOutput::err("不支持的操作".to_string())),
        }
    }

    async fn close(&self, remote_id: &str) {
        self.closed.lock().unwrap().push(remote_id.to_string());
    }
}

fn make_collector(transport: Arc<MockTransport>) -> PooledCollector {
    let config = PoolConfig {
        idle_ttl_seconds: 300,
        sweep_interval_seconds: 60,
        shard_count: 4,
    };
    PooledCollector::new(
        "ssh-collector".to_string(),
        ProtocolType::Ssh,
        transport,
        &config,
        Arc::new(InMemorySessionRepository::new()),
    )
}

fn make_request(command: &str, timeout_seconds: u64) -> CollectionRequest {
    CollectionRequest {
        task_id: 1,
        params: ConnectionParams {
            server_id: 1,
            host: "192.0.2.30".to_string(),
            port: 22,
            username: "ops".to_string(),
            password: "secret".to_string(),
            protocol_type: ProtocolType::Ssh,
            device_type: "linux".to_string(),
        },
        operation: TaskOperation::Command {
            command: command.to_string(),
        },
        timeout_seconds,
    }
}

fn request_identity(request: &CollectionRequest) -> ConnectionIdentity {
    ConnectionIdentity::from_params(&request.params)
}

#[tokio::test]
async fn test_command_success_returns_output() {
    let transport = MockTransport::new();
    let collector = make_collector(Arc::clone(&transport));

    let request = make_request("uname -a", 30);
    let response = collector.execute(&request).await.unwrap();

    assert_eq!(response.outcome, OutcomeStatus::Success);
    assert!(response.output.as_deref().unwrap_or("").contains("Linux"));
    assert!(!response.connection_error);
    assert_eq!(collector.active_sessions().await, 1);
}

#[tokio::test]
async fn test_session_reused_across_executions() {
    let transport = MockTransport::new();
    let collector = make_collector(Arc::clone(&transport));

    let request = make_request("uptime", 30);
    collector.execute(&request).await.unwrap();
    collector.execute(&request).await.unwrap();
    collector.execute(&request).await.unwrap();

    // 三次执行复用同一会话，握手只发生一次
    assert_eq!(transport.open_count(), 1);
    assert_eq!(collector.active_sessions().await, 1);
}

#[tokio::test]
async fn test_unreachable_server_yields_failed_without_session() {
    let transport = MockTransport::new();
    transport.fail_connect.store(true, Ordering::SeqCst);
    let collector = make_collector(Arc::clone(&transport));

    let request = make_request("uname -a", 30);
    let response = collector.execute(&request).await.unwrap();

    assert_eq!(response.outcome, OutcomeStatus::Failed);
    assert!(response.connection_error);
    // 握手失败不留下connected会话
    assert!(!collector.pool().has_connected(&request_identity(&request)));
    assert_eq!(collector.active_sessions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_evicts_session_from_pool() {
    let transport = MockTransport::new();
    transport.hang.store(true, Ordering::SeqCst);
    let collector = make_collector(Arc::clone(&transport));

    let request = make_request("sleep 600", 2);
    let response = collector.execute(&request).await.unwrap();

    assert_eq!(response.outcome, OutcomeStatus::Timeout);
    // 会话被强制拆除并逐出池，远端句柄已关闭
    assert!(!collector.pool().has_connected(&request_identity(&request)));
    assert_eq!(transport.closed_sessions(), vec!["mock-1".to_string()]);

    // 超时后的下一次执行重新握手
    transport.hang.store(false, Ordering::SeqCst);
    let response = collector.execute(&request).await.unwrap();
    assert_eq!(response.outcome, OutcomeStatus::Success);
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test]
async fn test_concurrent_same_identity_single_handshake() {
    let transport = MockTransport::new();
    let collector = Arc::new(make_collector(Arc::clone(&transport)));

    // 同一身份并发执行：槽位锁串行化，只有第一个调用者握手
    let mut handles = Vec::new();
    for _ in 0..4 {
        let collector = Arc::clone(&collector);
        handles.push(tokio::spawn(async move {
            collector.execute(&make_request("uptime", 30)).await.unwrap()
        }));
    }
    for handle in handles {
        let response = handle.await.unwrap();
        assert_eq!(response.outcome, OutcomeStatus::Success);
    }

    assert_eq!(transport.open_count(), 1);
    assert_eq!(collector.active_sessions().await, 1);
}

#[tokio::test]
async fn test_wrong_operation_type_fails_cleanly() {
    let transport = MockTransport::new();
    let collector = make_collector(transport);

    let mut request = make_request("x", 30);
    request.operation = TaskOperation::SnmpGet {
        oid: "1.3.6.1.2.1.1.1.0".to_string(),
        community: "public".to_string(),
        port: 161,
    };

    // 模拟传输对非命令操作返回失败结局，而不是进程级错误
    let response = collector.execute(&request).await.unwrap();
    assert_eq!(response.outcome, OutcomeStatus::Failed);
}
