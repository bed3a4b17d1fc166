//! DTOs for the convenience endpoints.

use serde::{Deserialize, Serialize};

use crate::signals::types::SignalStrength;

/// Query parameters of the degraded z-score-only endpoint.
#[derive(Debug, Deserialize)]
pub struct SimpleSignalQuery {
    /// Comma-separated manufacturer names.
    pub manufacturers: Option<String>,
    /// Comma-separated product codes.
    pub product_codes: Option<String>,
    #[serde(default = "default_lookback")]
    pub lookback_months: u32,
    #[serde(default = "default_min_threshold")]
    pub min_threshold: u64,
}

fn default_lookback() -> u32 {
    12
}

fn default_min_threshold() -> u64 {
    10
}

/// One row of the simple endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SimpleSignalRow {
    pub manufacturer: String,
    pub avg_monthly: f64,
    pub std_monthly: f64,
    pub total_events: u64,
    pub total_deaths: u64,
    pub latest_month: u64,
    pub z_score: Option<f64>,
    pub signal_type: SignalStrength,
}

/// Response of the simple endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SimpleSignalResponse {
    pub lookback_months: u32,
    pub signals: Vec<SimpleSignalRow>,
}

/// Response of the suggest-name endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SuggestNameResponse {
    pub suggested_name: String,
    pub member_count: usize,
}

/// One entity available for grouping.
#[derive(Debug, Clone, Serialize)]
pub struct AvailableEntity {
    pub name: String,
    pub event_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_group_name: Option<String>,
}

/// Response of the available-entities endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AvailableEntitiesResponse {
    pub entities: Vec<AvailableEntity>,
    pub total: usize,
}
