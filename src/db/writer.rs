use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::api::health::HealthState;
use crate::error::Result;
use crate::types::RunLogEvent;

/// Receives finished filter runs and persists them to SQLite.
/// Runs as a dedicated background task so request handlers never wait on disk.
pub struct DecisionWriter {
    pool: sqlx::SqlitePool,
    run_rx: mpsc::Receiver<RunLogEvent>,
    health: Arc<HealthState>,
}

impl DecisionWriter {
    pub fn new(
        pool: sqlx::SqlitePool,
        run_rx: mpsc::Receiver<RunLogEvent>,
        health: Arc<HealthState>,
    ) -> Self {
        Self { pool, run_rx, health }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.run_rx.recv().await {
            if let Err(e) = write_run(&self.pool, &event).await {
                error!("DB write error for run {}: {e}", event.run_id);
            }
            self.health.dec_write_queue_pending();
        }
    }
}

/// Queue a finished run for the writer. A full channel drops the run with a warning.
/// The pending counter moves before the send so the writer's decrement cannot overtake it.
pub fn enqueue_run(tx: &mpsc::Sender<RunLogEvent>, health: &HealthState, event: RunLogEvent) -> bool {
    let run_id = event.run_id.clone();
    health.inc_write_queue_pending();
    match tx.try_send(event) {
        Ok(()) => true,
        Err(e) => {
            health.dec_write_queue_pending();
            warn!("Decision log channel full, dropping run {run_id}: {e}");
            false
        }
    }
}

/// Write one run and all of its per-record decisions in a single transaction.
pub async fn write_run(pool: &sqlx::SqlitePool, event: &RunLogEvent) -> Result<()> {
    let mode = event.mode.to_string();
    let created_at = event.created_at_ns as i64;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO filter_runs (
            run_id, mode, total, filtered, passed, malformed, not_found, filter_rate, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.run_id)
    .bind(&mode)
    .bind(event.total as i64)
    .bind(event.filtered as i64)
    .bind(event.passed as i64)
    .bind(event.malformed as i64)
    .bind(event.not_found as i64)
    .bind(event.filter_rate)
    .bind(created_at)
    .execute(&mut *tx)
    .await?;

    for entry in &event.entries {
        let filtered = entry.decision.map(|d| d.filtered);
        let reason = entry.decision.map(|d| d.reason.to_string());

        sqlx::query(
            r#"
            INSERT INTO filter_decisions (
                run_id, product_id, mode, filtered, reason, error, decided_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.run_id)
        .bind(&entry.product_id)
        .bind(&mode)
        .bind(filtered)
        .bind(reason)
        .bind(&entry.error)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    debug!("Persisted run {} ({} decisions)", event.run_id, event.entries.len());
    Ok(())
}
