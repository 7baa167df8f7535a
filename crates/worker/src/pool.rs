use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use collector_core::{
    config::PoolConfig,
    models::{ConnectionIdentity, ConnectionSession, SessionStatus},
    traits::SessionRepository,
    CollectorResult,
};

/// 池中的活动会话：状态记录 + 远端会话句柄
#[derive(Debug, Clone)]
pub struct PooledSession {
    pub info: ConnectionSession,
    pub remote_id: String,
}

/// 每个连接身份对应一个槽位
///
/// 槽位互斥锁就是该身份的执行串行化点：先到者建立会话，
/// 后到者等待并复用；持锁期间会话绝不会被清扫移除。
#[derive(Default)]
pub struct SessionSlot {
    session: Option<PooledSession>,
}

type Shard = StdMutex<HashMap<ConnectionIdentity, Arc<AsyncMutex<SessionSlot>>>>;

/// 连接池
///
/// 按连接身份（host+port+username+protocol)条带化：分片锁只保护
/// 槽位表本身，拿到槽位后立即释放，实际的会话占用走槽位级
/// 异步互斥锁。每个身份最多一个活动会话。
pub struct ConnectionPool {
    shards: Vec<Shard>,
    idle_ttl_seconds: i64,
    session_repo: Arc<dyn SessionRepository>,
}

impl ConnectionPool {
    pub fn new(config: &PoolConfig, session_repo: Arc<dyn SessionRepository>) -> Self {
        let shard_count = config.shard_count.max(1);
        let shards = (0..shard_count).map(|_| StdMutex::new(HashMap::new())).collect();
        Self {
            shards,
            idle_ttl_seconds: config.idle_ttl_seconds,
            session_repo,
        }
    }

    fn shard_for(&self, identity: &ConnectionIdentity) -> &Shard {
        let mut hasher = DefaultHasher::new();
        identity.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    /// 获取身份对应的会话租约
    ///
    /// 同一身份的并发调用在槽位锁上排队：第一个调用者建立会话，
    /// 其余等待后复用，避免并发分发下的重复握手。
    pub async fn acquire(&self, identity: &ConnectionIdentity) -> SessionLease {
        let slot = {
            let mut shard = self.shard_for(identity).lock().unwrap_or_else(|e| e.into_inner());
            shard
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(SessionSlot::default())))
                .clone()
        };

        let guard = slot.lock_owned().await;
        SessionLease {
            identity: identity.clone(),
            guard,
            session_repo: Arc::clone(&self.session_repo),
        }
    }

    /// 清扫闲置超过TTL的会话，返回待关闭的会话交由调用方断开
    ///
    /// 使用try_lock跳过正被执行持有的槽位，保证不会移除在用会话；
    /// 空槽位在无人引用时顺带回收。
    pub fn sweep_idle(&self) -> Vec<PooledSession> {
        let now = Utc::now();
        let mut expired = Vec::new();

        for shard in &self.shards {
            let mut map = shard.lock().unwrap_or_else(|e| e.into_inner());
            let mut empty_keys = Vec::new();

            for (identity, slot) in map.iter() {
                let slot_ref = slot.clone();
                let Ok(mut guard) = slot_ref.try_lock_owned() else {
                    // 正在执行中，跳过
                    continue;
                };
                let idle_expired = guard
                    .session
                    .as_ref()
                    .map(|s| s.info.idle_longer_than(now, self.idle_ttl_seconds))
                    .unwrap_or(false);

                if idle_expired {
                    debug!("会话 {} 闲置超TTL，回收", identity);
                    if let Some(mut taken) = guard.session.take() {
                        taken.info.status = SessionStatus::Disconnected;
                        expired.push(taken);
                    }
                } else if guard.session.is_none() {
                    // 释放guard后仅剩map自身的引用时才回收空槽位；
                    // 分片锁持有期间无人能并发新增引用
                    drop(guard);
                    if Arc::strong_count(slot) == 1 {
                        empty_keys.push(identity.clone());
                    }
                }
            }

            for key in empty_keys {
                map.remove(&key);
            }
        }

        if !expired.is_empty() {
            info!("连接池清扫回收了 {} 个闲置会话", expired.len());
        }
        expired
    }

    /// 启动后台清扫协程
    pub fn spawn_sweeper<F, Fut>(
        pool: Arc<Self>,
        sweep_interval_seconds: u64,
        mut shutdown_rx: broadcast::Receiver<()>,
        close_session: F,
    ) where
        F: Fn(PooledSession) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(sweep_interval_seconds));
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        for session in pool.sweep_idle() {
                            if let Err(e) = pool.session_repo.upsert(&session.info).await {
                                warn!("会话状态回写失败: {e}");
                            }
                            close_session(session).await;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("连接池清扫协程退出");
                        break;
                    }
                }
            }
        });
    }

    /// 当前池中会话数（含执行中的）
    pub fn active_sessions(&self) -> usize {
        let mut count = 0;
        for shard in &self.shards {
            let map = shard.lock().unwrap_or_else(|e| e.into_inner());
            for slot in map.values() {
                match slot.try_lock() {
                    Ok(guard) => {
                        if guard.session.is_some() {
                            count += 1;
                        }
                    }
                    // 持锁即在执行中
                    Err(_) => count += 1,
                }
            }
        }
        count
    }

    /// 指定身份当前是否有connected状态的会话
    pub fn has_connected(&self, identity: &ConnectionIdentity) -> bool {
        let shard = self.shard_for(identity).lock().unwrap_or_else(|e| e.into_inner());
        let Some(slot) = shard.get(identity) else {
            return false;
        };
        let connected = match slot.try_lock() {
            Ok(guard) => guard
                .session
                .as_ref()
                .map(|s| s.info.is_connected())
                .unwrap_or(false),
            Err(_) => true,
        };
        connected
    }
}

/// 会话租约
///
/// 持有身份对应槽位的互斥锁，租约存续期间该身份上的其他执行
/// 全部排队等待。释放即还锁，池化会话留在槽位内供后续复用。
pub struct SessionLease {
    identity: ConnectionIdentity,
    guard: OwnedMutexGuard<SessionSlot>,
    session_repo: Arc<dyn SessionRepository>,
}

impl SessionLease {
    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub fn session(&self) -> Option<&PooledSession> {
        self.guard.session.as_ref()
    }

    /// 安放新建立的会话并镜像到会话仓储
    pub async fn install(&mut self, session: PooledSession) -> CollectorResult<()> {
        self.session_repo.upsert(&session.info).await?;
        self.guard.session = Some(session);
        Ok(())
    }

    /// 执行成功后刷新最近活动时间
    pub async fn touch(&mut self) -> CollectorResult<()> {
        if let Some(session) = self.guard.session.as_mut() {
            session.info.touch(Utc::now());
            self.session_repo.upsert(&session.info).await?;
        }
        Ok(())
    }

    /// 强制拆除会话（超时/错误路径），返回句柄交由调用方断开
    ///
    /// 会话以给定终态回写仓储后从池中消失，防止中毒复用。
    pub async fn evict(&mut self, status: SessionStatus, reason: Option<String>) -> Option<PooledSession> {
        let mut taken = self.guard.session.take()?;
        taken.info.status = status;
        taken.info.error_message = reason;
        if let Err(e) = self.session_repo.upsert(&taken.info).await {
            warn!("会话驱逐状态回写失败: {e}");
        }
        Some(taken)
    }
}
