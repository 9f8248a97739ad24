use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Availability record: normalized input to the classifier
// ---------------------------------------------------------------------------

/// Availability code meaning "the operator fulfills this listing right now".
pub const OPERATOR_IN_STOCK: i32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    /// ASIN.
    pub product_id: String,
    /// Keepa `availabilityAmazon`. `None` when Keepa did not report it.
    #[serde(default)]
    pub operator_availability_code: Option<i32>,
    /// Ordered by `keepa_minutes` ascending.
    #[serde(default)]
    pub price_history: Vec<PriceObservation>,
    /// `None` = buy-box data unavailable. `Some(vec![])` = fetched, nothing there.
    #[serde(default)]
    pub buy_box_history: Option<Vec<BuyBoxEntry>>,
}

impl AvailabilityRecord {
    pub fn operator_in_stock(&self) -> bool {
        self.operator_availability_code == Some(OPERATOR_IN_STOCK)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub keepa_minutes: i64,
    /// -1 = no offer at that time.
    pub price_cents: i32,
    pub source: PriceSource,
}

impl PriceObservation {
    /// The operator had a live offer at this observation.
    pub fn is_operator_offer(&self) -> bool {
        self.source == PriceSource::Operator && self.price_cents > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    /// Keepa csv[0], the operator's own price.
    Operator,
    /// Keepa csv[1], lowest third-party new price.
    MarketplaceNew,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyBoxEntry {
    pub keepa_minutes: i64,
    pub seller: BuyBoxSeller,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "seller_id")]
pub enum BuyBoxSeller {
    Operator,
    ThirdParty(String),
    /// Keepa "-1": no seller qualified for the buy box.
    Nobody,
    /// Keepa "-2": seller information not available.
    Unknown,
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Current stock plus price-history and buy-box evidence.
    #[default]
    Smart,
    /// Current stock only.
    Safe,
}

/// One evidence source the classifier can consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceCheck {
    InStock,
    PriceHistory,
    BuyBoxHistory,
}

impl PolicyMode {
    /// Evidence checks run by this mode, in priority order.
    pub fn checks(self) -> &'static [EvidenceCheck] {
        match self {
            PolicyMode::Smart => &[
                EvidenceCheck::InStock,
                EvidenceCheck::PriceHistory,
                EvidenceCheck::BuyBoxHistory,
            ],
            PolicyMode::Safe => &[EvidenceCheck::InStock],
        }
    }
}

impl std::fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyMode::Smart => write!(f, "smart"),
            PolicyMode::Safe => write!(f, "safe"),
        }
    }
}

impl std::str::FromStr for PolicyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "smart" => Ok(PolicyMode::Smart),
            "safe" => Ok(PolicyMode::Safe),
            other => Err(format!("unknown filter mode '{other}' (expected smart or safe)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    OperatorInStock,
    OperatorPriceHistory,
    #[serde(rename = "operator_buybox_history")]
    OperatorBuyBoxHistory,
    None,
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FilterReason::OperatorInStock => "operator_in_stock",
            FilterReason::OperatorPriceHistory => "operator_price_history",
            FilterReason::OperatorBuyBoxHistory => "operator_buybox_history",
            FilterReason::None => "none",
        };
        write!(f, "{s}")
    }
}

impl From<EvidenceCheck> for FilterReason {
    fn from(check: EvidenceCheck) -> Self {
        match check {
            EvidenceCheck::InStock => FilterReason::OperatorInStock,
            EvidenceCheck::PriceHistory => FilterReason::OperatorPriceHistory,
            EvidenceCheck::BuyBoxHistory => FilterReason::OperatorBuyBoxHistory,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDecision {
    pub filtered: bool,
    pub reason: FilterReason,
    pub mode: PolicyMode,
}

impl FilterDecision {
    pub fn excluded(reason: FilterReason, mode: PolicyMode) -> Self {
        Self { filtered: true, reason, mode }
    }

    pub fn passed(mode: PolicyMode) -> Self {
        Self { filtered: false, reason: FilterReason::None, mode }
    }
}

// ---------------------------------------------------------------------------
// Fetch outcome
// ---------------------------------------------------------------------------

/// Result of resolving one ASIN against Keepa.
#[derive(Debug, Clone, PartialEq)]
pub enum ProductLookup {
    Resolved(AvailabilityRecord),
    /// Unknown or invalid identifier. Never reaches the classifier.
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Decision log events, sent over mpsc to the DB writer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DecisionLogEntry {
    pub product_id: String,
    pub decision: Option<FilterDecision>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunLogEvent {
    pub run_id: String,
    pub mode: PolicyMode,
    pub total: usize,
    pub filtered: usize,
    pub passed: usize,
    pub malformed: usize,
    pub not_found: usize,
    pub filter_rate: f64,
    /// Nanosecond UTC epoch timestamp.
    pub created_at_ns: u64,
    pub entries: Vec<DecisionLogEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("SMART".parse::<PolicyMode>(), Ok(PolicyMode::Smart));
        assert_eq!(" safe ".parse::<PolicyMode>(), Ok(PolicyMode::Safe));
        assert!("strict".parse::<PolicyMode>().is_err());
    }

    #[test]
    fn reason_serializes_as_snake_case() {
        let json = serde_json::to_string(&FilterReason::OperatorBuyBoxHistory).unwrap();
        assert_eq!(json, "\"operator_buybox_history\"");
        assert_eq!(FilterReason::OperatorBuyBoxHistory.to_string(), "operator_buybox_history");
    }

    #[test]
    fn record_deserializes_with_missing_histories() {
        let record: AvailabilityRecord =
            serde_json::from_value(serde_json::json!({ "product_id": "B000TEST01" })).unwrap();
        assert!(record.price_history.is_empty());
        assert!(record.buy_box_history.is_none());
        assert_eq!(record.operator_availability_code, None);
    }

    #[test]
    fn only_positive_operator_prices_are_offers() {
        let obs = |price_cents, source| PriceObservation { keepa_minutes: 1, price_cents, source };
        assert!(obs(1999, PriceSource::Operator).is_operator_offer());
        assert!(!obs(-1, PriceSource::Operator).is_operator_offer());
        assert!(!obs(1999, PriceSource::MarketplaceNew).is_operator_offer());
    }
}
