use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use collector_core::{
    config::PoolConfig,
    models::{ConnectionIdentity, ConnectionSession, ProtocolType, SessionStatus},
    traits::SessionRepository,
};
use collector_infrastructure::InMemorySessionRepository;
use collector_worker::pool::{ConnectionPool, PooledSession};

fn pool_config(idle_ttl_seconds: i64) -> PoolConfig {
    PoolConfig {
        idle_ttl_seconds,
        sweep_interval_seconds: 60,
        shard_count: 4,
    }
}

fn identity(host: &str) -> ConnectionIdentity {
    ConnectionIdentity {
        host: host.to_string(),
        port: 22,
        username: "ops".to_string(),
        protocol_type: ProtocolType::Ssh,
    }
}

fn session(session_id: &str) -> PooledSession {
    PooledSession {
        info: ConnectionSession::new(session_id.to_string(), 1, ProtocolType::Ssh),
        remote_id: session_id.to_string(),
    }
}

#[tokio::test]
async fn test_acquire_serializes_same_identity() {
    let repo = Arc::new(InMemorySessionRepository::new());
    let pool = Arc::new(ConnectionPool::new(&pool_config(300), repo));

    let lease = pool.acquire(&identity("h1")).await;

    // 同一身份的第二次获取必须等待租约释放
    let pool_clone = Arc::clone(&pool);
    let waiter = tokio::spawn(async move {
        let _lease = pool_clone.acquire(&identity("h1")).await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    drop(lease);
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("租约释放后等待者应当获得槽位")
        .unwrap();
}

#[tokio::test]
async fn test_different_identities_do_not_block() {
    let repo = Arc::new(InMemorySessionRepository::new());
    let pool = Arc::new(ConnectionPool::new(&pool_config(300), repo));

    let _lease_a = pool.acquire(&identity("h1")).await;
    // 不同身份立即可得
    let acquired = tokio::time::timeout(Duration::from_millis(200), pool.acquire(&identity("h2")))
        .await
        .is_ok();
    assert!(acquired);
}

#[tokio::test]
async fn test_at_most_one_connected_session_per_identity() {
    let repo = Arc::new(InMemorySessionRepository::new());
    let pool = Arc::new(ConnectionPool::new(&pool_config(300), repo));
    let id = identity("h1");

    let mut lease = pool.acquire(&id).await;
    lease.install(session("s-1")).await.unwrap();
    drop(lease);

    assert!(pool.has_connected(&id));
    assert_eq!(pool.active_sessions(), 1);

    // 复用路径：安放第二个会话前必须先拆第一个
    let mut lease = pool.acquire(&id).await;
    assert!(lease.session().is_some());
    let old = lease.evict(SessionStatus::Disconnected, None).await;
    assert_eq!(old.unwrap().remote_id, "s-1");
    lease.install(session("s-2")).await.unwrap();
    drop(lease);

    assert_eq!(pool.active_sessions(), 1);
}

#[tokio::test]
async fn test_sweep_reclaims_idle_sessions() {
    let repo = Arc::new(InMemorySessionRepository::new());
    let pool = Arc::new(ConnectionPool::new(&pool_config(300), repo));
    let id = identity("h1");

    let mut stale = session("s-old");
    stale.info.last_activity_at = Utc::now() - chrono::Duration::minutes(10);
    let mut lease = pool.acquire(&id).await;
    lease.install(stale).await.unwrap();
    drop(lease);

    let reclaimed = pool.sweep_idle();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].remote_id, "s-old");
    assert_eq!(reclaimed[0].info.status, SessionStatus::Disconnected);
    assert!(!pool.has_connected(&id));
}

#[tokio::test]
async fn test_sweep_skips_fresh_and_held_sessions() {
    let repo = Arc::new(InMemorySessionRepository::new());
    let pool = Arc::new(ConnectionPool::new(&pool_config(300), repo));

    // 新鲜会话不回收
    let mut lease = pool.acquire(&identity("h1")).await;
    lease.install(session("s-fresh")).await.unwrap();
    drop(lease);
    assert!(pool.sweep_idle().is_empty());

    // 正被持有的会话即便超TTL也不回收
    let mut lease = pool.acquire(&identity("h2")).await;
    let mut stale = session("s-busy");
    stale.info.last_activity_at = Utc::now() - chrono::Duration::hours(1);
    lease.install(stale).await.unwrap();
    assert!(pool.sweep_idle().is_empty());
    drop(lease);

    // 释放后可回收
    assert_eq!(pool.sweep_idle().len(), 1);
}

#[tokio::test]
async fn test_evict_mirrors_state_to_repository() {
    let repo = Arc::new(InMemorySessionRepository::new());
    let pool = Arc::new(ConnectionPool::new(&pool_config(300), Arc::clone(&repo) as Arc<dyn SessionRepository>));
    let id = identity("h1");

    let mut lease = pool.acquire(&id).await;
    lease.install(session("s-1")).await.unwrap();
    let stored = repo.get_by_session_id("s-1").await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Connected);

    lease
        .evict(SessionStatus::Error, Some("超时拆除".to_string()))
        .await;
    let stored = repo.get_by_session_id("s-1").await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Error);
    assert!(stored.error_message.is_some());
    assert!(lease.session().is_none());
}
