use crate::config::DashboardConfig;
use crate::error::AppError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const ENV_DATA_DIR: &str = "COIN_DESK_DATA_DIR";

fn resolve_db_path(config: &DashboardConfig) -> Result<PathBuf, AppError> {
    let mut base_dir = std::env::var(ENV_DATA_DIR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&base_dir)?;
    base_dir.push(&config.db_filename);
    Ok(base_dir)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn initialize_pool_from_path(path: &Path) -> Result<SqlitePool, AppError> {
    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(connect_options).await?;
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database; the data lives as long as the pool.
pub async fn initialize_in_memory_pool() -> Result<SqlitePool, AppError> {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(connect_options)
        .await?;
    run_migrations(&pool).await?;

    Ok(pool)
}

pub async fn initialize_pool(config: &DashboardConfig) -> Result<SqlitePool, AppError> {
    let db_path = resolve_db_path(config)?;
    tracing::info!(path = %db_path.display(), "opening watchlist store");
    initialize_pool_from_path(&db_path).await
}
