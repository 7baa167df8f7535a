pub mod execution;
pub mod server;
pub mod session;
pub mod task;
pub mod worker;

pub use execution::{ExecutionResult, OutcomeStatus};
pub use server::{ConnectionParams, ManagementType, ProtocolType, Server, ServerStatus};
pub use session::{ConnectionIdentity, ConnectionSession, SessionStatus};
pub use task::{
    CollectionTask, IntervalSpec, IntervalUnit, PlacementRule, ScheduleConfig, TaskOperation,
    TaskStatus, TaskType,
};
pub use worker::{WorkerDescriptor, WorkerHeartbeat, WorkerRegistration, WorkerStatus};
