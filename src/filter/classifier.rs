use crate::error::ClassifyError;
use crate::types::{
    AvailabilityRecord, BuyBoxSeller, EvidenceCheck, FilterDecision, PolicyMode,
};

/// Decide whether the operator sells this product, consulting the evidence
/// checks of `mode` in priority order. The first check that finds operator
/// evidence determines the reason.
pub fn classify(record: &AvailabilityRecord, mode: PolicyMode) -> Result<FilterDecision, ClassifyError> {
    validate(record)?;

    let hit = mode
        .checks()
        .iter()
        .copied()
        .find(|&check| has_evidence(record, check));

    Ok(match hit {
        Some(check) => FilterDecision::excluded(check.into(), mode),
        None => FilterDecision::passed(mode),
    })
}

fn has_evidence(record: &AvailabilityRecord, check: EvidenceCheck) -> bool {
    match check {
        EvidenceCheck::InStock => record.operator_in_stock(),
        EvidenceCheck::PriceHistory => record.price_history.iter().any(|p| p.is_operator_offer()),
        // Absent buy-box data is no evidence, same as an empty history.
        EvidenceCheck::BuyBoxHistory => record
            .buy_box_history
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|e| e.seller == BuyBoxSeller::Operator),
    }
}

fn validate(record: &AvailabilityRecord) -> Result<(), ClassifyError> {
    let malformed = |detail: &str| ClassifyError::MalformedRecord {
        product_id: record.product_id.clone(),
        detail: detail.to_string(),
    };

    if record.product_id.trim().is_empty() {
        return Err(malformed("product_id is empty"));
    }
    if !is_time_ordered(record.price_history.iter().map(|p| p.keepa_minutes)) {
        return Err(malformed("price_history is not ordered by time"));
    }
    if let Some(buy_box) = &record.buy_box_history {
        if !is_time_ordered(buy_box.iter().map(|e| e.keepa_minutes)) {
            return Err(malformed("buy_box_history is not ordered by time"));
        }
    }
    Ok(())
}

fn is_time_ordered(mut times: impl Iterator<Item = i64>) -> bool {
    let Some(mut prev) = times.next() else { return true };
    for t in times {
        if t < prev {
            return false;
        }
        prev = t;
    }
    true
}
