use crate::error::{AppError, Result};
use crate::types::PolicyMode;

pub const KEEPA_API_URL: &str = "https://api.keepa.com";

/// Keepa domain id for amazon.com.
pub const KEEPA_DOMAIN_US: u8 = 1;

/// Seller id Keepa reports for Amazon's own retail offers on amazon.com.
pub const OPERATOR_SELLER_ID: &str = "ATVPDKIKX0DER";

/// Keepa caps a single /product request at 100 ASINs.
pub const KEEPA_MAX_ASINS_PER_REQUEST: usize = 100;

/// HTTP timeout for Keepa requests (seconds).
pub const KEEPA_TIMEOUT_SECS: u64 = 30;

/// Keepa timestamps are minutes since 2011-01-01T00:00:00Z; this is that epoch in Unix minutes.
pub const KEEPA_EPOCH_OFFSET_MINUTES: i64 = 21_564_000;

/// Channel capacity for the decision log writer.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Default row limit for the recent-runs endpoint.
pub const RECENT_RUNS_DEFAULT_LIMIT: i64 = 20;

#[derive(Debug, Clone)]
pub struct Config {
    pub keepa_api_key: String,
    pub keepa_api_url: String,
    /// Keepa marketplace domain (KEEPA_DOMAIN, 1 = amazon.com)
    pub keepa_domain: u8,
    /// Seller id treated as the marketplace operator (OPERATOR_SELLER_ID)
    pub operator_seller_id: String,
    /// History older than this does not count as evidence (HISTORY_LOOKBACK_DAYS)
    pub history_lookback_days: u32,
    /// Mode used when a request does not name one (FILTER_MODE)
    pub default_mode: PolicyMode,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// ASINs classified once at startup (SCAN_ASINS, comma-separated).
    pub scan_asins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            keepa_api_key: std::env::var("KEEPA_API_KEY")
                .map_err(|_| AppError::Config("KEEPA_API_KEY must be set".to_string()))?,
            keepa_api_url: std::env::var("KEEPA_API_URL")
                .unwrap_or_else(|_| KEEPA_API_URL.to_string()),
            keepa_domain: std::env::var("KEEPA_DOMAIN")
                .unwrap_or_else(|_| KEEPA_DOMAIN_US.to_string())
                .parse::<u8>()
                .map_err(|_| AppError::Config("KEEPA_DOMAIN must be a Keepa domain id".to_string()))?,
            operator_seller_id: std::env::var("OPERATOR_SELLER_ID")
                .unwrap_or_else(|_| OPERATOR_SELLER_ID.to_string()),
            history_lookback_days: std::env::var("HISTORY_LOOKBACK_DAYS")
                .unwrap_or_else(|_| "90".to_string())
                .parse::<u32>()
                .map_err(|_| {
                    AppError::Config("HISTORY_LOOKBACK_DAYS must be a whole number of days".to_string())
                })?,
            default_mode: std::env::var("FILTER_MODE")
                .unwrap_or_else(|_| "smart".to_string())
                .parse::<PolicyMode>()
                .map_err(AppError::Config)?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "vault.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            scan_asins: parse_asin_list(&std::env::var("SCAN_ASINS").unwrap_or_default()),
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            keepa_api_key: "test-key".to_string(),
            keepa_api_url: KEEPA_API_URL.to_string(),
            keepa_domain: KEEPA_DOMAIN_US,
            operator_seller_id: OPERATOR_SELLER_ID.to_string(),
            history_lookback_days: 90,
            default_mode: PolicyMode::Smart,
            log_level: "info".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 3000,
            scan_asins: Vec::new(),
        }
    }
}

/// Split a comma-separated ASIN list, trimming and upper-casing entries.
pub fn parse_asin_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asin_list_skips_blanks() {
        assert_eq!(
            parse_asin_list(" b000test01, ,1250301696,"),
            vec!["B000TEST01".to_string(), "1250301696".to_string()]
        );
        assert!(parse_asin_list("").is_empty());
    }
}
