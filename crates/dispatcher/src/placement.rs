use std::sync::Arc;

use tracing::debug;

use collector_core::{
    models::{CollectionTask, PlacementRule, ProtocolType, Server, WorkerDescriptor},
    CollectorResult,
};

use crate::registry::{DispatchLease, WorkerRegistry};

/// 一次放置决策的输入
#[derive(Debug, Clone)]
pub struct PlacementConstraints {
    pub protocol: ProtocolType,
    pub server_id: i64,
    pub rule: PlacementRule,
}

impl PlacementConstraints {
    /// 从任务与目标服务器推导约束
    ///
    /// 协议取自服务器；亲和/互斥规则取自任务的调度配置。
    pub fn for_task(task: &CollectionTask, server: &Server) -> Self {
        Self {
            protocol: server.protocol_type,
            server_id: server.id,
            rule: task.placement(),
        }
    }
}

/// 放置策略
///
/// 协议过滤 -> 亲和 -> 反亲和 -> 最少在途（平局按id序）。
/// 选中即在注册表中占位，返回的租约在Drop时归还。
pub struct PlacementPolicy {
    registry: Arc<WorkerRegistry>,
}

impl PlacementPolicy {
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        Self { registry }
    }

    pub fn select(
        &self,
        constraints: &PlacementConstraints,
    ) -> CollectorResult<(WorkerDescriptor, DispatchLease)> {
        let selected = self.registry.select(
            constraints.protocol,
            constraints.server_id,
            &constraints.rule,
        )?;
        debug!(
            "任务放置: server={} protocol={} -> worker={}",
            constraints.server_id,
            constraints.protocol,
            selected.0.id
        );
        Ok(selected)
    }
}
