//! 任务调度与分发引擎
//!
//! 调度时钟判定任务是否到期，放置策略在注册表中挑选Worker，
//! 分发器编排整个执行流程，结果聚合器把执行结局写回任务与
//! 执行历史。

pub mod aggregator;
pub mod clock;
pub mod dispatcher;
pub mod invoker;
pub mod placement;
pub mod registry;

pub use aggregator::ResultAggregator;
pub use clock::ScheduleClock;
pub use dispatcher::TaskDispatcher;
pub use invoker::HttpWorkerInvoker;
pub use placement::{PlacementConstraints, PlacementPolicy};
pub use registry::{DispatchLease, WorkerRegistry};
