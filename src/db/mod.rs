pub mod models;
pub mod queries;
pub mod writer;

use crate::error::Result;

/// Open (creating if needed) the SQLite decision log and apply migrations.
pub async fn connect(db_path: &str) -> Result<sqlx::SqlitePool> {
    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{db_path}?mode=rwc")).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory pool; every connection of `sqlite::memory:` is a separate database.
#[cfg(test)]
pub async fn connect_in_memory() -> Result<sqlx::SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}
