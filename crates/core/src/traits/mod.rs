pub mod collector;
pub mod repository;

pub use collector::{
    CollectionRequest, CollectionResponse, ProtocolCollector, RegistryClient, WorkerInvoker,
};
pub use repository::{
    ExecutionResultRepository, ServerRepository, SessionRepository, TaskRepository,
};
