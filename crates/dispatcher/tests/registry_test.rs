use std::sync::Arc;

use chrono::{Duration, Utc};
use collector_core::{
    models::{PlacementRule, ProtocolType, WorkerHeartbeat, WorkerRegistration},
    traits::RegistryClient,
    CollectorError,
};
use collector_dispatcher::WorkerRegistry;

fn registration(id: &str, protocol: ProtocolType, group: Option<&str>) -> WorkerRegistration {
    WorkerRegistration {
        worker_id: id.to_string(),
        protocol_type: protocol,
        group: group.map(|g| g.to_string()),
        endpoint: None,
        max_concurrent: 5,
    }
}

fn no_constraints() -> PlacementRule {
    PlacementRule::default()
}

#[tokio::test]
async fn test_register_and_select_by_protocol() {
    let registry = Arc::new(WorkerRegistry::new(90));
    registry
        .register(registration("w-ssh", ProtocolType::Ssh, None))
        .await
        .unwrap();
    registry
        .register(registration("w-snmp", ProtocolType::Snmp, None))
        .await
        .unwrap();

    let (worker, _lease) = registry
        .select(ProtocolType::Ssh, 1, &no_constraints())
        .unwrap();
    assert_eq!(worker.id, "w-ssh");

    // 没有api协议的Worker
    let err = registry
        .select(ProtocolType::Api, 1, &no_constraints())
        .unwrap_err();
    assert!(matches!(err, CollectorError::NoEligibleWorker { .. }));
}

#[tokio::test]
async fn test_least_loaded_with_deterministic_ties() {
    let registry = Arc::new(WorkerRegistry::new(90));
    registry
        .register(registration("w-b", ProtocolType::Ssh, None))
        .await
        .unwrap();
    registry
        .register(registration("w-a", ProtocolType::Ssh, None))
        .await
        .unwrap();

    // 平局时按id字典序
    let (first, lease_a) = registry
        .select(ProtocolType::Ssh, 1, &no_constraints())
        .unwrap();
    assert_eq!(first.id, "w-a");

    // w-a在途1，应选w-b
    let (second, _lease_b) = registry
        .select(ProtocolType::Ssh, 2, &no_constraints())
        .unwrap();
    assert_eq!(second.id, "w-b");

    // 归还w-a后重新成为最少在途（平局取id序）
    drop(lease_a);
    let (third, _lease_c) = registry
        .select(ProtocolType::Ssh, 3, &no_constraints())
        .unwrap();
    assert_eq!(third.id, "w-a");
}

#[tokio::test]
async fn test_affinity_group_enforced() {
    let registry = Arc::new(WorkerRegistry::new(90));
    registry
        .register(registration("w-1", ProtocolType::Ssh, Some("rack-a")))
        .await
        .unwrap();
    registry
        .register(registration("w-2", ProtocolType::Ssh, Some("rack-b")))
        .await
        .unwrap();

    let rule = PlacementRule {
        group: Some("rack-b".to_string()),
        ..Default::default()
    };
    let (worker, _lease) = registry.select(ProtocolType::Ssh, 1, &rule).unwrap();
    assert_eq!(worker.id, "w-2");

    // 分组不存在：配置错误而非普通无Worker
    let rule = PlacementRule {
        group: Some("rack-c".to_string()),
        ..Default::default()
    };
    let err = registry.select(ProtocolType::Ssh, 1, &rule).unwrap_err();
    assert!(matches!(err, CollectorError::AffinityUnsatisfiable { .. }));
}

#[tokio::test]
async fn test_anti_affinity_same_server_excluded() {
    let registry = Arc::new(WorkerRegistry::new(90));
    registry
        .register(registration("w-1", ProtocolType::Ssh, None))
        .await
        .unwrap();

    let (_, lease) = registry
        .select(ProtocolType::Ssh, 42, &no_constraints())
        .unwrap();

    // 同一服务器在途期间，唯一Worker被反亲和排除
    let err = registry
        .select(ProtocolType::Ssh, 42, &no_constraints())
        .unwrap_err();
    assert!(matches!(err, CollectorError::NoEligibleWorker { .. }));

    // 不同服务器不受影响
    let (_, _other) = registry
        .select(ProtocolType::Ssh, 43, &no_constraints())
        .unwrap();

    drop(lease);
    let (_, _again) = registry
        .select(ProtocolType::Ssh, 42, &no_constraints())
        .unwrap();
}

#[tokio::test]
async fn test_anti_affinity_exclusion_tags_never_overlap() {
    let registry = Arc::new(WorkerRegistry::new(90));
    registry
        .register(registration("w-1", ProtocolType::Ssh, None))
        .await
        .unwrap();
    registry
        .register(registration("w-2", ProtocolType::Ssh, None))
        .await
        .unwrap();

    let rule = PlacementRule {
        exclusion_tags: vec!["backup-window".to_string()],
        ..Default::default()
    };

    let (first, _lease_1) = registry.select(ProtocolType::Ssh, 1, &rule).unwrap();
    let (second, _lease_2) = registry.select(ProtocolType::Ssh, 2, &rule).unwrap();
    // 互斥标签在途期间两次放置绝不同Worker
    assert_ne!(first.id, second.id);

    // 两个Worker都在互斥域内，第三次放置失败
    let err = registry.select(ProtocolType::Ssh, 3, &rule).unwrap_err();
    assert!(matches!(err, CollectorError::NoEligibleWorker { .. }));
}

#[tokio::test]
async fn test_capacity_limit_excludes_full_workers() {
    let registry = Arc::new(WorkerRegistry::new(90));
    let mut reg = registration("w-1", ProtocolType::Api, None);
    reg.max_concurrent = 2;
    registry.register(reg).await.unwrap();

    let (_, _l1) = registry
        .select(ProtocolType::Api, 1, &no_constraints())
        .unwrap();
    let (_, _l2) = registry
        .select(ProtocolType::Api, 2, &no_constraints())
        .unwrap();

    let err = registry
        .select(ProtocolType::Api, 3, &no_constraints())
        .unwrap_err();
    assert!(matches!(err, CollectorError::NoEligibleWorker { .. }));
}

#[tokio::test]
async fn test_heartbeat_and_liveness_eviction() {
    let registry = Arc::new(WorkerRegistry::new(60));
    registry
        .register(registration("w-1", ProtocolType::Ssh, None))
        .await
        .unwrap();

    // 新注册的Worker心跳新鲜，不会被驱逐
    assert!(registry.evict_stale().is_empty());

    // 心跳时间倒退到窗口之外
    registry
        .heartbeat(WorkerHeartbeat {
            worker_id: "w-1".to_string(),
            in_flight: 0,
            timestamp: Utc::now() - Duration::seconds(120),
        })
        .await
        .unwrap();

    let evicted = registry.evict_stale();
    assert_eq!(evicted, vec!["w-1".to_string()]);
    assert_eq!(registry.worker_count(), 0);

    // 被驱逐后的心跳要求重新注册
    let err = registry
        .heartbeat(WorkerHeartbeat {
            worker_id: "w-1".to_string(),
            in_flight: 0,
            timestamp: Utc::now(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CollectorError::WorkerNotFound { .. }));
}

#[tokio::test]
async fn test_deregister_removes_worker() {
    let registry = Arc::new(WorkerRegistry::new(90));
    registry
        .register(registration("w-1", ProtocolType::Snmp, None))
        .await
        .unwrap();
    assert_eq!(registry.worker_count(), 1);

    registry.deregister("w-1").await.unwrap();
    assert_eq!(registry.worker_count(), 0);
}

#[tokio::test]
async fn test_required_worker_affinity() {
    let registry = Arc::new(WorkerRegistry::new(90));
    registry
        .register(registration("w-1", ProtocolType::Ssh, None))
        .await
        .unwrap();
    registry
        .register(registration("w-2", ProtocolType::Ssh, None))
        .await
        .unwrap();

    let rule = PlacementRule {
        worker: Some("w-2".to_string()),
        ..Default::default()
    };
    let (worker, _lease) = registry.select(ProtocolType::Ssh, 1, &rule).unwrap();
    assert_eq!(worker.id, "w-2");
}
