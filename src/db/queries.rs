use crate::db::models::{FilterDecisionRow, FilterRunRow};
use crate::error::Result;

pub async fn recent_runs(pool: &sqlx::SqlitePool, limit: i64) -> Result<Vec<FilterRunRow>> {
    let rows = sqlx::query_as::<_, FilterRunRow>(
        r#"
        SELECT run_id, mode, total, filtered, passed, malformed, not_found, filter_rate, created_at
        FROM filter_runs
        ORDER BY created_at DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn decisions_for_product(
    pool: &sqlx::SqlitePool,
    product_id: &str,
    limit: i64,
) -> Result<Vec<FilterDecisionRow>> {
    let rows = sqlx::query_as::<_, FilterDecisionRow>(
        r#"
        SELECT id, run_id, product_id, mode, filtered, reason, error, decided_at
        FROM filter_decisions
        WHERE product_id = ?
        ORDER BY decided_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(product_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
