//! Handlers for the analytics endpoints.

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use tracing::instrument;

use crate::api::types::{SimpleSignalQuery, SimpleSignalResponse, SimpleSignalRow};
use crate::api::AppState;
use crate::data::filter::FilterSpec;
use crate::error::SignalError;
use crate::signals::types::{
    MethodDetails, SignalMethod, SignalRequest, SignalResponse, TimeComparisonConfig, TimeMode,
};
use crate::signals::detect;

type ApiResult<T> = Result<Json<T>, SignalError>;

/// Canonical surface: full `SignalRequest` in, full `SignalResponse` out.
#[instrument(skip(state, request))]
pub async fn advanced_signals(
    State(state): State<AppState>,
    Json(request): Json<SignalRequest>,
) -> ApiResult<SignalResponse> {
    let today = Utc::now().date_naive();
    let response = detect(
        state.store.as_ref(),
        &state.registry,
        &request,
        today,
        state.settings.lag_months,
    )?;
    Ok(Json(response))
}

/// Degraded z-score-only convenience endpoint. Honours manufacturer and
/// product-code filters only; use the advanced endpoint for device filters.
#[instrument(skip(state))]
pub async fn simple_signals(
    State(state): State<AppState>,
    Query(query): Query<SimpleSignalQuery>,
) -> ApiResult<SimpleSignalResponse> {
    let request = SignalRequest {
        methods: vec![SignalMethod::Zscore],
        time_config: TimeComparisonConfig {
            mode: TimeMode::Lookback,
            lookback_months: query.lookback_months,
            ..TimeComparisonConfig::default()
        },
        min_events: query.min_threshold,
        filters: Some(FilterSpec {
            manufacturers: split_csv(&query.manufacturers),
            product_codes: split_csv(&query.product_codes),
            ..FilterSpec::default()
        }),
        ..SignalRequest::default()
    };

    let today = Utc::now().date_naive();
    let response = detect(
        state.store.as_ref(),
        &state.registry,
        &request,
        today,
        state.settings.lag_months,
    )?;

    let signals = response
        .signals
        .into_iter()
        .map(|row| {
            let zscore = row
                .method_results
                .iter()
                .find(|r| r.method == SignalMethod::Zscore);
            let (avg_monthly, std_monthly, latest_month) = match zscore.and_then(|r| r.details.as_ref())
            {
                Some(MethodDetails::Baseline {
                    avg_monthly,
                    std_monthly,
                    latest_month,
                    ..
                }) => (*avg_monthly, *std_monthly, *latest_month),
                _ => (0.0, 0.0, 0),
            };
            SimpleSignalRow {
                manufacturer: row.entity,
                avg_monthly,
                std_monthly,
                total_events: row.total_events,
                total_deaths: row.deaths,
                latest_month,
                z_score: zscore.and_then(|r| r.value),
                signal_type: row.signal_type,
            }
        })
        .collect();

    Ok(Json(SimpleSignalResponse {
        lookback_months: query.lookback_months,
        signals,
    }))
}

fn split_csv(raw: &Option<String>) -> Option<Vec<String>> {
    let raw = raw.as_deref()?;
    let values: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}
