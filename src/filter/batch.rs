use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::ClassifyError;
use crate::filter::classifier::classify;
use crate::types::{AvailabilityRecord, DecisionLogEntry, FilterDecision, FilterReason, PolicyMode};

/// Outcome for one input slot of a batch. Exactly one of `decision`/`error` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordOutcome {
    pub product_id: String,
    pub decision: Option<FilterDecision>,
    pub error: Option<String>,
}

impl From<&RecordOutcome> for DecisionLogEntry {
    fn from(o: &RecordOutcome) -> Self {
        DecisionLogEntry {
            product_id: o.product_id.clone(),
            decision: o.decision,
            error: o.error.clone(),
        }
    }
}

/// Counts over a batch. Built from commutative sums, so slot order does not matter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterSummary {
    /// Records that were classified (filtered + passed).
    pub total: usize,
    pub filtered: usize,
    pub passed: usize,
    /// Records rejected as malformed. Not part of `total`.
    pub malformed: usize,
    pub filter_rate: f64,
    pub by_reason: BTreeMap<FilterReason, usize>,
}

impl FilterSummary {
    pub fn from_outcomes(outcomes: &[RecordOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome.decision {
                Some(d) => summary.record(&d),
                None => summary.malformed += 1,
            }
        }
        summary.refresh_rate();
        summary
    }

    fn record(&mut self, d: &FilterDecision) {
        self.total += 1;
        if d.filtered {
            self.filtered += 1;
        } else {
            self.passed += 1;
        }
        *self.by_reason.entry(d.reason).or_insert(0) += 1;
    }

    fn refresh_rate(&mut self) {
        self.filter_rate = if self.total == 0 {
            0.0
        } else {
            self.filtered as f64 / self.total as f64
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub mode: PolicyMode,
    pub outcomes: Vec<RecordOutcome>,
    pub summary: FilterSummary,
}

/// Classify every record independently. A malformed record is reported in
/// its own slot and does not stop the rest of the batch.
pub fn classify_batch(records: &[AvailabilityRecord], mode: PolicyMode) -> BatchReport {
    let outcomes = records.iter().map(|record| classify_one(record, mode)).collect();
    BatchReport::from_outcomes(mode, outcomes)
}

/// Like [`classify_batch`], but for caller-supplied JSON. A record that does not
/// decode (missing `product_id`, wrong field types) is malformed in its own slot.
pub fn classify_raw_batch(records: &[serde_json::Value], mode: PolicyMode) -> BatchReport {
    let outcomes = records
        .iter()
        .map(|raw| match serde_json::from_value::<AvailabilityRecord>(raw.clone()) {
            Ok(record) => classify_one(&record, mode),
            Err(e) => {
                let product_id = raw
                    .get("product_id")
                    .and_then(|id| id.as_str())
                    .unwrap_or_default()
                    .to_string();
                let err = ClassifyError::MalformedRecord {
                    product_id: product_id.clone(),
                    detail: e.to_string(),
                };
                RecordOutcome { product_id, decision: None, error: Some(err.to_string()) }
            }
        })
        .collect();
    BatchReport::from_outcomes(mode, outcomes)
}

fn classify_one(record: &AvailabilityRecord, mode: PolicyMode) -> RecordOutcome {
    match classify(record, mode) {
        Ok(decision) => RecordOutcome {
            product_id: record.product_id.clone(),
            decision: Some(decision),
            error: None,
        },
        Err(e) => RecordOutcome {
            product_id: record.product_id.clone(),
            decision: None,
            error: Some(e.to_string()),
        },
    }
}

impl BatchReport {
    fn from_outcomes(mode: PolicyMode, outcomes: Vec<RecordOutcome>) -> Self {
        let summary = FilterSummary::from_outcomes(&outcomes);
        Self { mode, outcomes, summary }
    }
}
