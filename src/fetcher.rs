use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::config::{
    Config, KEEPA_EPOCH_OFFSET_MINUTES, KEEPA_MAX_ASINS_PER_REQUEST, KEEPA_TIMEOUT_SECS,
};
use crate::error::{AppError, Result};
use crate::types::{
    AvailabilityRecord, BuyBoxEntry, BuyBoxSeller, PriceObservation, PriceSource, ProductLookup,
};

/// Keepa csv series index for the operator's own price.
const CSV_AMAZON: usize = 0;
/// Keepa csv series index for the lowest third-party new price.
const CSV_NEW: usize = 1;
/// Keepa `productType` for an ASIN it does not know.
const PRODUCT_TYPE_INVALID: i64 = 4;

/// Parameters the normalizer needs to turn raw Keepa data into a record.
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub operator_seller_id: String,
    /// Start of the recency window. Older entries are dropped, except the last one
    /// before the cutoff, which still holds at the window start.
    pub cutoff_keepa_minutes: i64,
}

impl NormalizeOptions {
    pub fn from_config(cfg: &Config, now_unix_secs: i64) -> Self {
        let lookback_secs = i64::from(cfg.history_lookback_days) * 86_400;
        Self {
            operator_seller_id: cfg.operator_seller_id.clone(),
            cutoff_keepa_minutes: unix_secs_to_keepa_minutes(now_unix_secs - lookback_secs),
        }
    }
}

pub struct KeepaClient {
    client: reqwest::Client,
    cfg: Config,
    health: Arc<HealthState>,
}

impl KeepaClient {
    pub fn new(cfg: &Config, health: Arc<HealthState>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(KEEPA_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, cfg: cfg.clone(), health })
    }

    /// Resolve each ASIN to a record or a not-found outcome.
    /// Output order follows the first occurrence of each ASIN in `asins`.
    pub async fn fetch_products(&self, asins: &[String]) -> Result<Vec<ProductLookup>> {
        let (valid, invalid) = partition_asins(asins);
        for asin in &invalid {
            warn!("[KEEPA] skipping invalid ASIN '{asin}'");
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let opts = NormalizeOptions::from_config(&self.cfg, now);

        let mut resolved: HashMap<String, AvailabilityRecord> = HashMap::new();
        for chunk in valid.chunks(KEEPA_MAX_ASINS_PER_REQUEST) {
            let resp = self.request_chunk(chunk).await?;
            for record in parse_product_response(&resp, &opts)? {
                resolved.insert(record.product_id.clone(), record);
            }
        }

        Ok(assemble_lookups(asins, &invalid, resolved))
    }

    async fn request_chunk(&self, chunk: &[String]) -> Result<serde_json::Value> {
        let url = format!("{}/product", self.cfg.keepa_api_url);
        let domain = self.cfg.keepa_domain.to_string();
        let joined = chunk.join(",");

        self.health.inc_keepa_requests();
        debug!("[KEEPA] requesting {} ASINs", chunk.len());

        let resp: serde_json::Value = self
            .client
            .get(&url)
            .query(&[
                ("key", self.cfg.keepa_api_key.as_str()),
                ("domain", domain.as_str()),
                ("asin", joined.as_str()),
                ("buybox", "1"),
                ("history", "1"),
            ])
            .send()
            .await?
            .json()
            .await?;

        if let Some(tokens) = resp.get("tokensLeft").and_then(|t| t.as_i64()) {
            info!("[KEEPA] {} ASINs fetched, tokens left: {tokens}", chunk.len());
        }
        Ok(resp)
    }
}

/// Pair each requested ASIN (upper-cased, first occurrence only) with its record,
/// or report it as not found.
pub fn assemble_lookups(
    asins: &[String],
    invalid: &HashSet<String>,
    mut resolved: HashMap<String, AvailabilityRecord>,
) -> Vec<ProductLookup> {
    dedup_preserving_order(asins)
        .into_iter()
        .map(|asin| match resolved.remove(&asin) {
            Some(record) => ProductLookup::Resolved(record),
            None => {
                if !invalid.contains(&asin) {
                    warn!("[KEEPA] ASIN {asin} not found");
                }
                ProductLookup::NotFound(asin)
            }
        })
        .collect()
}

/// Parse a Keepa `/product` response body into records for every known product.
/// Unknown ASINs are omitted; the caller reports them as not found.
pub fn parse_product_response(
    resp: &serde_json::Value,
    opts: &NormalizeOptions,
) -> Result<Vec<AvailabilityRecord>> {
    if let Some(err) = resp.get("error").filter(|e| !e.is_null()) {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| err.get("type").and_then(|t| t.as_str()))
            .unwrap_or("unknown error");
        return Err(AppError::Keepa(message.to_string()));
    }

    let products = resp
        .get("products")
        .and_then(|p| p.as_array())
        .ok_or_else(|| AppError::Keepa("response has no products array".to_string()))?;

    Ok(products
        .iter()
        .filter_map(|p| parse_keepa_product(p, opts))
        .collect())
}

/// Normalize one Keepa product object. Returns None for products Keepa does not know.
pub fn parse_keepa_product(v: &serde_json::Value, opts: &NormalizeOptions) -> Option<AvailabilityRecord> {
    let product_id = v.get("asin")?.as_str()?.trim().to_string();
    if product_id.is_empty() {
        return None;
    }

    let product_type = v.get("productType").and_then(|t| t.as_i64());
    let csv = v.get("csv").and_then(|c| c.as_array());
    let has_title = v.get("title").map_or(false, |t| !t.is_null());
    if product_type == Some(PRODUCT_TYPE_INVALID) || (csv.is_none() && !has_title) {
        return None;
    }

    let operator_availability_code = v
        .get("availabilityAmazon")
        .and_then(|a| a.as_i64())
        .and_then(|a| i32::try_from(a).ok());

    let mut price_history = Vec::new();
    if let Some(csv) = csv {
        for (index, source) in [(CSV_AMAZON, PriceSource::Operator), (CSV_NEW, PriceSource::MarketplaceNew)] {
            // Clip each series on its own: the carried-in entry is per series.
            if let Some(series) = csv.get(index).and_then(|s| s.as_array()) {
                price_history.extend(parse_price_series(series, source, opts.cutoff_keepa_minutes));
            }
        }
    }
    price_history.sort_by_key(|p| p.keepa_minutes);

    let buy_box_history = v
        .get("buyBoxSellerIdHistory")
        .and_then(|h| h.as_array())
        .map(|h| parse_buy_box_history(h, opts));

    Some(AvailabilityRecord {
        product_id,
        operator_availability_code,
        price_history,
        buy_box_history,
    })
}

/// Keepa price series are flat `[time, price, time, price, ...]` arrays.
/// A trailing unpaired element is ignored.
fn parse_price_series(series: &[serde_json::Value], source: PriceSource, cutoff: i64) -> Vec<PriceObservation> {
    let observations = series
        .chunks_exact(2)
        .filter_map(|pair| {
            let keepa_minutes = pair[0].as_i64()?;
            let price_cents = i32::try_from(pair[1].as_i64()?).ok()?;
            Some(PriceObservation { keepa_minutes, price_cents, source })
        })
        .collect();
    clip_to_window(observations, cutoff)
}

/// Buy-box history is `[time, sellerId, ...]` with every element a string.
fn parse_buy_box_history(history: &[serde_json::Value], opts: &NormalizeOptions) -> Vec<BuyBoxEntry> {
    let mut entries: Vec<BuyBoxEntry> = history
        .chunks_exact(2)
        .filter_map(|pair| {
            let keepa_minutes = pair[0]
                .as_i64()
                .or_else(|| pair[0].as_str().and_then(|s| s.parse().ok()))?;
            let seller_id = pair[1].as_str()?;
            Some(BuyBoxEntry {
                keepa_minutes,
                seller: resolve_seller(seller_id, &opts.operator_seller_id),
            })
        })
        .collect();
    clip_to_window(entries, opts.cutoff_keepa_minutes)
}

/// An entry of a Keepa change-only series.
trait Timed {
    fn minutes(&self) -> i64;
    fn set_minutes(&mut self, minutes: i64);
}

impl Timed for PriceObservation {
    fn minutes(&self) -> i64 {
        self.keepa_minutes
    }
    fn set_minutes(&mut self, minutes: i64) {
        self.keepa_minutes = minutes;
    }
}

impl Timed for BuyBoxEntry {
    fn minutes(&self) -> i64 {
        self.keepa_minutes
    }
    fn set_minutes(&mut self, minutes: i64) {
        self.keepa_minutes = minutes;
    }
}

/// Keepa records only changes, so an entry stays in effect until the next one.
/// Keep everything from `cutoff` on, plus the last earlier entry moved to `cutoff`.
fn clip_to_window<T: Timed>(mut entries: Vec<T>, cutoff: i64) -> Vec<T> {
    entries.sort_by_key(|e| e.minutes());
    let before = entries.partition_point(|e| e.minutes() < cutoff);
    if before > 0 {
        entries.drain(..before - 1);
        entries[0].set_minutes(cutoff);
    }
    entries
}

pub fn resolve_seller(seller_id: &str, operator_seller_id: &str) -> BuyBoxSeller {
    match seller_id.trim() {
        "-1" => BuyBoxSeller::Nobody,
        "-2" => BuyBoxSeller::Unknown,
        id if id == operator_seller_id => BuyBoxSeller::Operator,
        id => BuyBoxSeller::ThirdParty(id.to_string()),
    }
}

pub fn unix_secs_to_keepa_minutes(secs: i64) -> i64 {
    secs / 60 - KEEPA_EPOCH_OFFSET_MINUTES
}

/// ASINs are 10 ASCII alphanumerics (ISBN-10s included).
pub fn is_valid_asin(asin: &str) -> bool {
    asin.len() == 10 && asin.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Split into (valid, invalid), upper-cased and de-duplicated, preserving first-seen order.
fn partition_asins(asins: &[String]) -> (Vec<String>, HashSet<String>) {
    let mut valid = Vec::new();
    let mut invalid = HashSet::new();
    for asin in dedup_preserving_order(asins) {
        if is_valid_asin(&asin) {
            valid.push(asin);
        } else {
            invalid.insert(asin);
        }
    }
    (valid, invalid)
}

fn dedup_preserving_order(asins: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    asins
        .iter()
        .map(|a| a.trim().to_uppercase())
        .filter(|a| seen.insert(a.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::classifier::classify;
    use crate::types::{FilterReason, PolicyMode};
    use serde_json::json;

    const OPERATOR: &str = "ATVPDKIKX0DER";

    fn opts(cutoff: i64) -> NormalizeOptions {
        NormalizeOptions { operator_seller_id: OPERATOR.to_string(), cutoff_keepa_minutes: cutoff }
    }

    #[test]
    fn keepa_minutes_count_from_2011() {
        // 2011-01-01T00:00:00Z
        assert_eq!(unix_secs_to_keepa_minutes(1_293_840_000), 0);
        assert_eq!(unix_secs_to_keepa_minutes(1_293_840_000 + 86_400), 1_440);
    }

    #[test]
    fn cutoff_follows_lookback_days() {
        let cfg = Config::for_tests();
        let now = 1_293_840_000 + 100 * 86_400;
        let opts = NormalizeOptions::from_config(&cfg, now);
        assert_eq!(opts.cutoff_keepa_minutes, 10 * 1_440);
        assert_eq!(opts.operator_seller_id, OPERATOR);
    }

    #[test]
    fn parses_full_product() {
        let product = json!({
            "asin": "1250301696",
            "title": "Some Book",
            "productType": 0,
            "availabilityAmazon": 0,
            "csv": [
                [100, 1499, 200, -1, 300, 1399],
                [150, 1200, 250, 1100]
            ],
            "buyBoxSellerIdHistory": ["120", "A1THIRD", "220", OPERATOR, "320", "-1"]
        });

        let r = parse_keepa_product(&product, &opts(0)).unwrap();
        assert_eq!(r.product_id, "1250301696");
        assert_eq!(r.operator_availability_code, Some(0));
        assert_eq!(r.price_history.len(), 5);
        assert!(r.price_history.windows(2).all(|w| w[0].keepa_minutes <= w[1].keepa_minutes));
        assert_eq!(
            r.price_history.iter().filter(|p| p.source == PriceSource::Operator).count(),
            3
        );

        let buy_box = r.buy_box_history.unwrap();
        assert_eq!(
            buy_box.iter().map(|e| e.seller.clone()).collect::<Vec<_>>(),
            vec![
                BuyBoxSeller::ThirdParty("A1THIRD".to_string()),
                BuyBoxSeller::Operator,
                BuyBoxSeller::Nobody,
            ]
        );
    }

    #[test]
    fn lookback_cutoff_drops_superseded_entries() {
        let product = json!({
            "asin": "B000TEST01",
            "title": "Widget",
            "csv": [[50, 1099, 100, 999, 500, 899]],
            "buyBoxSellerIdHistory": ["50", "A1THIRD", "100", OPERATOR, "500", "A1THIRD"]
        });

        let r = parse_keepa_product(&product, &opts(400)).unwrap();
        assert_eq!(
            r.price_history.iter().map(|p| (p.keepa_minutes, p.price_cents)).collect::<Vec<_>>(),
            vec![(400, 999), (500, 899)]
        );
        let buy_box = r.buy_box_history.unwrap();
        assert_eq!(
            buy_box,
            vec![
                BuyBoxEntry { keepa_minutes: 400, seller: BuyBoxSeller::Operator },
                BuyBoxEntry { keepa_minutes: 500, seller: BuyBoxSeller::ThirdParty("A1THIRD".to_string()) },
            ]
        );
    }

    #[test]
    fn state_held_since_before_cutoff_is_still_evidence() {
        let product = json!({
            "asin": "B000TEST09",
            "title": "Widget",
            "availabilityAmazon": 3,
            "csv": [[100, 1999]],
            "buyBoxSellerIdHistory": ["100", OPERATOR]
        });

        let r = parse_keepa_product(&product, &opts(400)).unwrap();
        assert_eq!(r.price_history.len(), 1);
        assert_eq!(r.price_history[0].keepa_minutes, 400);
        assert_eq!(r.buy_box_history.as_ref().map(Vec::len), Some(1));

        let decision = classify(&r, PolicyMode::Smart).unwrap();
        assert!(decision.filtered);
        assert_eq!(decision.reason, FilterReason::OperatorPriceHistory);
    }

    #[test]
    fn offer_ended_before_cutoff_is_not_evidence() {
        let product = json!({
            "asin": "B000TEST10",
            "title": "Widget",
            "csv": [[100, 1999, 200, -1]],
            "buyBoxSellerIdHistory": ["100", OPERATOR, "200", "A1THIRD"]
        });

        let r = parse_keepa_product(&product, &opts(400)).unwrap();
        let decision = classify(&r, PolicyMode::Smart).unwrap();
        assert!(!decision.filtered);
        assert_eq!(decision.reason, FilterReason::None);
    }

    #[test]
    fn lookups_keep_first_seen_order_and_report_missing() {
        let asins: Vec<String> = ["b000test01", "bad", "B000TEST02", "B000TEST01", "B000GONE00"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (valid, invalid) = partition_asins(&asins);
        assert_eq!(valid.len(), 3);

        let record = |id: &str| AvailabilityRecord {
            product_id: id.to_string(),
            operator_availability_code: Some(-1),
            price_history: Vec::new(),
            buy_box_history: None,
        };
        let resolved: HashMap<String, AvailabilityRecord> = ["B000TEST01", "B000TEST02"]
            .iter()
            .map(|id| (id.to_string(), record(id)))
            .collect();

        let lookups = assemble_lookups(&asins, &invalid, resolved);
        assert_eq!(
            lookups,
            vec![
                ProductLookup::Resolved(record("B000TEST01")),
                ProductLookup::NotFound("BAD".to_string()),
                ProductLookup::Resolved(record("B000TEST02")),
                ProductLookup::NotFound("B000GONE00".to_string()),
            ]
        );
    }

    #[test]
    fn missing_buy_box_stays_absent() {
        let product = json!({ "asin": "B000TEST02", "title": "Widget", "csv": [null, null] });
        let r = parse_keepa_product(&product, &opts(0)).unwrap();
        assert!(r.buy_box_history.is_none());
        assert!(r.price_history.is_empty());
        assert_eq!(r.operator_availability_code, None);
    }

    #[test]
    fn odd_length_series_ignores_trailing_element() {
        let product = json!({ "asin": "B000TEST03", "title": "W", "csv": [[100, 999, 200]] });
        let r = parse_keepa_product(&product, &opts(0)).unwrap();
        assert_eq!(r.price_history.len(), 1);
    }

    #[test]
    fn unknown_asin_stub_is_not_a_record() {
        let stub = json!({ "asin": "B0NOTREAL0", "title": null, "csv": null, "productType": 4 });
        assert!(parse_keepa_product(&stub, &opts(0)).is_none());

        let bare = json!({ "asin": "B0NOTREAL1" });
        assert!(parse_keepa_product(&bare, &opts(0)).is_none());
    }

    #[test]
    fn api_error_becomes_keepa_error() {
        let resp = json!({ "error": { "type": "invalidKey", "message": "Invalid API key" } });
        match parse_product_response(&resp, &opts(0)) {
            Err(AppError::Keepa(msg)) => assert_eq!(msg, "Invalid API key"),
            other => panic!("expected Keepa error, got {other:?}"),
        }
    }

    #[test]
    fn response_skips_unknown_products() {
        let resp = json!({
            "tokensLeft": 250,
            "products": [
                { "asin": "B000TEST04", "title": "Known", "availabilityAmazon": -1, "csv": [] },
                { "asin": "B0NOTREAL0", "title": null, "csv": null }
            ]
        });
        let records = parse_product_response(&resp, &opts(0)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].product_id, "B000TEST04");
    }

    #[test]
    fn seller_resolution() {
        assert_eq!(resolve_seller(OPERATOR, OPERATOR), BuyBoxSeller::Operator);
        assert_eq!(resolve_seller("-1", OPERATOR), BuyBoxSeller::Nobody);
        assert_eq!(resolve_seller("-2", OPERATOR), BuyBoxSeller::Unknown);
        assert_eq!(
            resolve_seller("A2OTHER", OPERATOR),
            BuyBoxSeller::ThirdParty("A2OTHER".to_string())
        );
    }

    #[test]
    fn asin_validation_and_partition() {
        assert!(is_valid_asin("B000TEST01"));
        assert!(is_valid_asin("1250301696"));
        assert!(!is_valid_asin("B0SHORT"));
        assert!(!is_valid_asin("B000TEST-1"));

        let input: Vec<String> = ["B000TEST01", "bad", "b000test01", "1250301696"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (valid, invalid) = partition_asins(&input);
        assert_eq!(valid, vec!["B000TEST01".to_string(), "1250301696".to_string()]);
        assert!(invalid.contains("BAD"));
    }
}
