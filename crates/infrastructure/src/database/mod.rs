pub mod sqlite;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::debug;

use collector_core::{CollectorError, CollectorResult};

/// 创建嵌入式SQLite连接池并执行迁移
///
/// 自动建库，启用外键约束与WAL模式。
pub async fn connect_sqlite(database_url: &str) -> CollectorResult<SqlitePool> {
    debug!("连接嵌入式SQLite数据库: {database_url}");

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| CollectorError::Database(e.to_string()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| CollectorError::Database(e.to_string()))?;

    sqlite::run_migrations(&pool).await?;
    Ok(pool)
}
