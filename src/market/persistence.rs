use crate::error::AppError;
use crate::market::types::now_unix_ms;
use crate::market::watchlist::Watchlist;
use crate::market::WATCHLIST_STORAGE_KEY;
use sqlx::{Row, SqlitePool};
use tracing::warn;

pub async fn get_value(pool: &SqlitePool, key: &str) -> Result<Option<String>, AppError> {
    let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Some(row.try_get("value")?)),
        None => Ok(None),
    }
}

pub async fn put_value(pool: &SqlitePool, key: &str, value: &str) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO kv_store (key, value, updated_at_ms) VALUES (?, ?, ?) \
         ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at_ms=excluded.updated_at_ms",
    )
    .bind(key)
    .bind(value)
    .bind(now_unix_ms())
    .execute(pool)
    .await?;

    Ok(())
}

/// Loads the stored watchlist. Missing or unreadable data yields an empty list.
pub async fn load_watchlist(pool: &SqlitePool) -> Result<Watchlist, AppError> {
    let Some(raw) = get_value(pool, WATCHLIST_STORAGE_KEY).await? else {
        return Ok(Watchlist::default());
    };

    match Watchlist::from_json(&raw) {
        Ok(watchlist) => Ok(watchlist),
        Err(error) => {
            warn!(%error, "stored watchlist is unreadable, starting empty");
            Ok(Watchlist::default())
        }
    }
}

pub async fn save_watchlist(pool: &SqlitePool, watchlist: &Watchlist) -> Result<(), AppError> {
    let raw = watchlist.to_json()?;
    put_value(pool, WATCHLIST_STORAGE_KEY, &raw).await
}
