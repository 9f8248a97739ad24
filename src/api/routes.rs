use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::api::health::{HealthSnapshot, HealthState};
use crate::config::RECENT_RUNS_DEFAULT_LIMIT;
use crate::db::models::{FilterDecisionRow, FilterRunRow};
use crate::db::queries;
use crate::db::writer::enqueue_run;
use crate::error::AppError;
use crate::fetcher::KeepaClient;
use crate::filter::{classify_raw_batch, BatchReport};
use crate::scan::{run_scan, ScanReport};
use crate::types::{PolicyMode, RunLogEvent};

/// Upper bound on ASINs or records accepted in one request.
const MAX_BATCH: usize = 1000;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub keepa: Arc<KeepaClient>,
    pub health: Arc<HealthState>,
    pub log_tx: mpsc::Sender<RunLogEvent>,
    pub default_mode: PolicyMode,
}

impl ApiState {
    /// Queue a finished run for the decision log.
    pub fn queue_run(&self, event: RunLogEvent) {
        enqueue_run(&self.log_tx, &self.health, event);
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/filter/analyze", post(post_analyze))
        .route("/filter/classify", post(post_classify))
        .route("/filter/runs/recent", get(get_recent_runs))
        .route("/filter/decisions/:product_id", get(get_product_decisions))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AnalyzeRequest {
    pub asins: Vec<String>,
    pub mode: Option<PolicyMode>,
}

#[derive(Deserialize)]
pub struct ClassifyRequest {
    /// Decoded one by one so a bad record fails only its own slot.
    pub records: Vec<serde_json::Value>,
    pub mode: Option<PolicyMode>,
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

async fn post_analyze(
    State(state): State<ApiState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<ScanReport>, AppError> {
    if req.asins.is_empty() {
        return Err(AppError::BadRequest("asins must not be empty".to_string()));
    }
    check_batch_size(req.asins.len(), "asins")?;
    let mode = req.mode.unwrap_or(state.default_mode);

    let scan = run_scan(&state.keepa, &state.health, &req.asins, mode).await?;
    scan.log_summary();
    state.queue_run(scan.to_log_event());

    Ok(Json(scan))
}

async fn post_classify(
    State(state): State<ApiState>,
    Json(req): Json<ClassifyRequest>,
) -> Result<Json<BatchReport>, AppError> {
    check_batch_size(req.records.len(), "records")?;
    let mode = req.mode.unwrap_or(state.default_mode);
    Ok(Json(classify_raw_batch(&req.records, mode)))
}

async fn get_recent_runs(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<FilterRunRow>>, AppError> {
    let limit = clamp_limit(params.limit);
    Ok(Json(queries::recent_runs(&state.pool, limit).await?))
}

async fn get_product_decisions(
    State(state): State<ApiState>,
    Path(product_id): Path<String>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<FilterDecisionRow>>, AppError> {
    let limit = clamp_limit(params.limit);
    let product_id = product_id.trim().to_uppercase();
    Ok(Json(queries::decisions_for_product(&state.pool, &product_id, limit).await?))
}

fn check_batch_size(len: usize, field: &str) -> Result<(), AppError> {
    if len > MAX_BATCH {
        return Err(AppError::BadRequest(format!(
            "{field} has {len} entries, at most {MAX_BATCH} allowed"
        )));
    }
    Ok(())
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(RECENT_RUNS_DEFAULT_LIMIT).clamp(1, 500)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_bounds() {
        assert!(check_batch_size(0, "records").is_ok());
        assert!(check_batch_size(1, "asins").is_ok());
        assert!(check_batch_size(MAX_BATCH, "asins").is_ok());
        assert!(check_batch_size(MAX_BATCH + 1, "asins").is_err());
    }

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(clamp_limit(None), RECENT_RUNS_DEFAULT_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(10_000)), 500);
    }

    #[test]
    fn analyze_request_mode_is_optional() {
        let req: AnalyzeRequest =
            serde_json::from_value(serde_json::json!({ "asins": ["B000TEST01"] })).unwrap();
        assert!(req.mode.is_none());

        let req: AnalyzeRequest = serde_json::from_value(
            serde_json::json!({ "asins": ["B000TEST01"], "mode": "safe" }),
        )
        .unwrap();
        assert_eq!(req.mode, Some(PolicyMode::Safe));
    }

    #[test]
    fn classify_request_accepts_incomplete_records() {
        let req: ClassifyRequest = serde_json::from_value(serde_json::json!({
            "records": [
                { "product_id": "B000GOOD01", "operator_availability_code": 0 },
                { "operator_availability_code": 0 }
            ]
        }))
        .unwrap();
        let report = classify_raw_batch(&req.records, req.mode.unwrap_or_default());
        assert_eq!(report.summary.filtered, 1);
        assert_eq!(report.summary.malformed, 1);
    }

    #[test]
    fn empty_classify_request_is_an_empty_report() {
        let req: ClassifyRequest =
            serde_json::from_value(serde_json::json!({ "records": [] })).unwrap();
        assert!(check_batch_size(req.records.len(), "records").is_ok());
        let report = classify_raw_batch(&req.records, PolicyMode::Smart);
        assert_eq!(report.summary.total, 0);
        assert_eq!(report.summary.filter_rate, 0.0);
    }
}
