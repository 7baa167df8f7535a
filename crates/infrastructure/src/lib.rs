//! 持久化实现
//!
//! 仓储接口的两套实现：嵌入式SQLite（生产/嵌入模式）与
//! 纯内存（测试与零配置模式）。

pub mod database;
pub mod memory;

pub use database::sqlite::{
    SqliteExecutionResultRepository, SqliteServerRepository, SqliteSessionRepository,
    SqliteTaskRepository,
};
pub use memory::{
    InMemoryExecutionResultRepository, InMemoryServerRepository, InMemorySessionRepository,
    InMemoryTaskRepository,
};
