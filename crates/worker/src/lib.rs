//! 协议采集Worker
//!
//! 每个Worker实例承载一种协议的采集执行：解析/建立池化连接、
//! 在超时约束下完成操作、把失败归一为执行结局。连接池按连接
//! 身份条带化加锁，同一身份的执行天然串行。

pub mod collectors;
pub mod pool;
pub mod server;
pub mod service;
pub mod transport;

pub use collectors::{build_collector, PooledCollector};
pub use pool::{ConnectionPool, SessionLease};
pub use service::{LocalWorkerInvoker, WorkerService};
pub use transport::{OperationOutput, SessionTransport};
