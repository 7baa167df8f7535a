use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use collector_core::{
    models::{PlacementRule, ProtocolType, WorkerDescriptor, WorkerHeartbeat, WorkerRegistration},
    traits::RegistryClient,
    CollectorError, CollectorResult,
};

/// 注册表内部条目
///
/// 描述符之外额外维护在途服务器与互斥标签的引用计数，
/// 反亲和过滤直接查这两张表。
#[derive(Debug)]
struct WorkerEntry {
    descriptor: WorkerDescriptor,
    busy_servers: HashMap<i64, u32>,
    busy_tags: HashMap<String, u32>,
}

impl WorkerEntry {
    fn new(descriptor: WorkerDescriptor) -> Self {
        Self {
            descriptor,
            busy_servers: HashMap::new(),
            busy_tags: HashMap::new(),
        }
    }
}

type RegistryMap = HashMap<String, WorkerEntry>;

/// Worker注册表
///
/// 维护各协议当前存活的Worker实例及其在途计数。Worker通过
/// 注册/心跳维持存活，超出存活窗口即被驱逐。所有计数器修改
/// 都在注册表锁内完成。
pub struct WorkerRegistry {
    inner: Arc<RwLock<RegistryMap>>,
    liveness_window_seconds: i64,
}

impl WorkerRegistry {
    pub fn new(liveness_window_seconds: i64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            liveness_window_seconds,
        }
    }

    /// 当前注册表快照（观测用）
    pub fn snapshot(&self) -> Vec<WorkerDescriptor> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.values().map(|e| e.descriptor.clone()).collect()
    }

    pub fn worker_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.len()
    }

    /// 驱逐心跳超窗的Worker，返回被驱逐的id
    pub fn evict_stale(&self) -> Vec<String> {
        let now = Utc::now();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let stale: Vec<String> = inner
            .iter()
            .filter(|(_, entry)| {
                entry
                    .descriptor
                    .heartbeat_expired(now, self.liveness_window_seconds)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            inner.remove(id);
            warn!("Worker {} 心跳超窗，已从注册表驱逐", id);
        }
        stale
    }

    /// 放置选择 + 在途计数占位，整体在写锁内完成
    ///
    /// 过滤顺序：协议 -> 亲和 -> 反亲和 -> 容量，随后在剩余
    /// 候选中取在途最少者，平局按Worker id字典序保证确定性。
    pub fn select(
        &self,
        protocol: ProtocolType,
        server_id: i64,
        placement: &PlacementRule,
    ) -> CollectorResult<(WorkerDescriptor, DispatchLease)> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let protocol_matched: Vec<String> = inner
            .iter()
            .filter(|(_, e)| e.descriptor.is_alive() && e.descriptor.protocol_type == protocol)
            .map(|(id, _)| id.clone())
            .collect();

        if protocol_matched.is_empty() {
            return Err(CollectorError::NoEligibleWorker {
                reason: format!("没有支持协议 {protocol} 的存活Worker"),
            });
        }

        // 亲和：有约束时只保留命中的Worker，全部落空属配置错误
        let affinity_matched: Vec<String> = protocol_matched
            .into_iter()
            .filter(|id| {
                let entry = &inner[id];
                if let Some(required) = &placement.worker {
                    if entry.descriptor.id != *required {
                        return false;
                    }
                }
                if let Some(group) = &placement.group {
                    if entry.descriptor.group.as_deref() != Some(group.as_str()) {
                        return false;
                    }
                }
                true
            })
            .collect();

        if affinity_matched.is_empty() {
            return Err(CollectorError::AffinityUnsatisfiable {
                reason: format!(
                    "协议 {} 的存活Worker中没有满足亲和约束 (worker={:?}, group={:?}) 的实例",
                    protocol, placement.worker, placement.group
                ),
            });
        }

        // 反亲和 + 容量
        let mut eligible: Vec<String> = affinity_matched
            .into_iter()
            .filter(|id| {
                let entry = &inner[id];
                if entry.busy_servers.contains_key(&server_id) {
                    return false;
                }
                if placement
                    .exclusion_tags
                    .iter()
                    .any(|tag| entry.busy_tags.contains_key(tag))
                {
                    return false;
                }
                entry.descriptor.in_flight < entry.descriptor.max_concurrent
            })
            .collect();

        if eligible.is_empty() {
            return Err(CollectorError::NoEligibleWorker {
                reason: format!("协议 {protocol} 的候选Worker均被反亲和排除或已满载"),
            });
        }

        // 最少在途优先，平局按id排序保证确定性
        eligible.sort();
        let chosen = eligible
            .iter()
            .min_by_key(|id| inner[id.as_str()].descriptor.in_flight)
            .cloned()
            .ok_or_else(|| CollectorError::Internal("候选列表意外为空".to_string()))?;

        let entry = inner
            .get_mut(&chosen)
            .ok_or_else(|| CollectorError::WorkerNotFound { id: chosen.clone() })?;
        entry.descriptor.in_flight += 1;
        *entry.busy_servers.entry(server_id).or_insert(0) += 1;
        for tag in &placement.exclusion_tags {
            *entry.busy_tags.entry(tag.clone()).or_insert(0) += 1;
        }

        debug!(
            "放置选择Worker: {} (在途: {})",
            chosen, entry.descriptor.in_flight
        );

        let descriptor = entry.descriptor.clone();
        let lease = DispatchLease {
            inner: Arc::clone(&self.inner),
            worker_id: chosen,
            server_id,
            tags: placement.exclusion_tags.clone(),
        };
        Ok((descriptor, lease))
    }
}

#[async_trait]
impl RegistryClient for WorkerRegistry {
    async fn register(&self, registration: WorkerRegistration) -> CollectorResult<()> {
        let descriptor = WorkerDescriptor::from_registration(registration);
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        info!(
            "Worker {} 注册 (协议: {}, 分组: {:?}, 并发上限: {})",
            descriptor.id, descriptor.protocol_type, descriptor.group, descriptor.max_concurrent
        );
        inner.insert(descriptor.id.clone(), WorkerEntry::new(descriptor));
        Ok(())
    }

    async fn heartbeat(&self, heartbeat: WorkerHeartbeat) -> CollectorResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.get_mut(&heartbeat.worker_id) {
            Some(entry) => {
                entry.descriptor.last_heartbeat = heartbeat.timestamp;
                debug!(
                    "Worker {} 心跳 (自报在途: {})",
                    heartbeat.worker_id, heartbeat.in_flight
                );
                Ok(())
            }
            // 未注册或已被驱逐：Worker收到该错误后应重新注册
            None => Err(CollectorError::WorkerNotFound {
                id: heartbeat.worker_id,
            }),
        }
    }

    async fn deregister(&self, worker_id: &str) -> CollectorResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.remove(worker_id).is_some() {
            info!("Worker {} 已注销", worker_id);
        }
        Ok(())
    }
}

/// 分发租约
///
/// 持有期间占用Worker的一个在途名额；Drop时无条件归还，
/// 无论执行正常返回、超时还是提前出错。
#[derive(Debug)]
pub struct DispatchLease {
    inner: Arc<RwLock<RegistryMap>>,
    worker_id: String,
    server_id: i64,
    tags: Vec<String>,
}

impl DispatchLease {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }
}

impl Drop for DispatchLease {
    fn drop(&mut self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        // Worker可能已在执行期间被驱逐，此时无需归还
        let Some(entry) = inner.get_mut(&self.worker_id) else {
            return;
        };
        entry.descriptor.in_flight = (entry.descriptor.in_flight - 1).max(0);
        if let Some(count) = entry.busy_servers.get_mut(&self.server_id) {
            *count -= 1;
            if *count == 0 {
                entry.busy_servers.remove(&self.server_id);
            }
        }
        for tag in &self.tags {
            if let Some(count) = entry.busy_tags.get_mut(tag) {
                *count -= 1;
                if *count == 0 {
                    entry.busy_tags.remove(tag);
                }
            }
        }
    }
}
