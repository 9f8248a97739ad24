use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::info;

use crate::api::health::HealthState;
use crate::error::Result;
use crate::fetcher::KeepaClient;
use crate::filter::{classify_batch, BatchReport};
use crate::types::{AvailabilityRecord, PolicyMode, ProductLookup, RunLogEvent};

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

/// One fetch-and-classify pass over a list of ASINs.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub run_id: String,
    #[serde(flatten)]
    pub report: BatchReport,
    /// ASINs Keepa could not resolve. These are skipped, not classified.
    pub not_found: Vec<String>,
    pub created_at_ns: u64,
}

impl ScanReport {
    pub fn to_log_event(&self) -> RunLogEvent {
        let s = &self.report.summary;
        RunLogEvent {
            run_id: self.run_id.clone(),
            mode: self.report.mode,
            total: s.total,
            filtered: s.filtered,
            passed: s.passed,
            malformed: s.malformed,
            not_found: self.not_found.len(),
            filter_rate: s.filter_rate,
            created_at_ns: self.created_at_ns,
            entries: self.report.outcomes.iter().map(Into::into).collect(),
        }
    }

    pub fn log_summary(&self) {
        let s = &self.report.summary;
        info!(
            event = "FILTER_RUN",
            run_id = %self.run_id,
            mode = %self.report.mode,
            total = s.total,
            filtered = s.filtered,
            passed = s.passed,
            malformed = s.malformed,
            not_found = self.not_found.len(),
            "[FILTER] run {} ({}): {} filtered / {} passed of {} | rate {:.1}% | malformed {} | not found {}",
            self.run_id,
            self.report.mode,
            s.filtered,
            s.passed,
            s.total,
            s.filter_rate * 100.0,
            s.malformed,
            self.not_found.len(),
        );
        for (reason, count) in &s.by_reason {
            info!("[FILTER]   {reason}: {count}");
        }
    }
}

/// Fetch the ASINs from Keepa and classify whatever resolves.
pub async fn run_scan(
    client: &KeepaClient,
    health: &HealthState,
    asins: &[String],
    mode: PolicyMode,
) -> Result<ScanReport> {
    let lookups = client.fetch_products(asins).await?;
    let report = summarize_lookups(lookups, mode);
    health.set_last_run_at_ns(report.created_at_ns);
    Ok(report)
}

/// Classify resolved records and set aside identifiers that did not resolve.
pub fn summarize_lookups(lookups: Vec<ProductLookup>, mode: PolicyMode) -> ScanReport {
    let mut records: Vec<AvailabilityRecord> = Vec::with_capacity(lookups.len());
    let mut not_found = Vec::new();
    for lookup in lookups {
        match lookup {
            ProductLookup::Resolved(record) => records.push(record),
            ProductLookup::NotFound(asin) => not_found.push(asin),
        }
    }

    let created_at_ns = now_ns();
    ScanReport {
        run_id: next_run_id(created_at_ns),
        report: classify_batch(&records, mode),
        not_found,
        created_at_ns,
    }
}

fn next_run_id(now_ns: u64) -> String {
    let seq = RUN_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{now_ns:x}-{seq}")
}

pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
