//! Database row types matching migrations/0001_init.sql.
//! Used by sqlx for typed queries.

use serde::Serialize;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FilterRunRow {
    pub run_id: String,
    pub mode: String,
    pub total: i64,
    pub filtered: i64,
    pub passed: i64,
    pub malformed: i64,
    pub not_found: i64,
    pub filter_rate: f64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FilterDecisionRow {
    pub id: i64,
    pub run_id: String,
    pub product_id: String,
    pub mode: String,
    /// NULL when the record was malformed.
    pub filtered: Option<bool>,
    pub reason: Option<String>,
    pub error: Option<String>,
    pub decided_at: i64,
}
