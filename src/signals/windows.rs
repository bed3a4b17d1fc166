//! Resolution of time configurations into concrete analysis windows, with
//! reporting-lag completeness marking.

use chrono::{Datelike, Months, NaiveDate};

use crate::error::{SignalError, SignalResult};
use crate::signals::types::{
    DataCompleteness, MonthKey, TimeComparisonConfig, TimeInfo, TimeMode,
};

/// Windows plus completeness for one request.
#[derive(Debug, Clone)]
pub struct ResolvedWindows {
    pub time_info: TimeInfo,
    pub completeness: DataCompleteness,
    pub notes: Vec<String>,
}

/// Resolve `config` against the corpus anchor (latest received date) and the
/// injected wall-clock date. Completeness is always measured against `today`;
/// windows are anchored on the data so a stale corpus still analyses its own
/// most recent months.
pub fn resolve(
    config: &TimeComparisonConfig,
    anchor: NaiveDate,
    today: NaiveDate,
    lag_months: u32,
) -> SignalResult<ResolvedWindows> {
    validate(config)?;

    let mut notes = Vec::new();
    let time_info = match config.mode {
        TimeMode::Lookback => TimeInfo {
            mode: config.mode,
            analysis_start: lookback_start(anchor, config.lookback_months),
            analysis_end: anchor,
            comparison_start: None,
            comparison_end: None,
            rolling_window: None,
        },
        TimeMode::Custom => {
            let (a, b) = (
                config.period_a.expect("validated"),
                config.period_b.expect("validated"),
            );
            let len_a = (a.end_date - a.start_date).num_days().max(1);
            let len_b = (b.end_date - b.start_date).num_days().max(1);
            let drift = (len_a - len_b).abs() as f64 / len_a.max(len_b) as f64;
            if drift > 0.2 {
                notes.push(format!(
                    "comparison periods differ in length by {:.0}%",
                    drift * 100.0
                ));
            }
            TimeInfo {
                mode: config.mode,
                analysis_start: a.start_date,
                analysis_end: a.end_date,
                comparison_start: Some(b.start_date),
                comparison_end: Some(b.end_date),
                rolling_window: None,
            }
        }
        TimeMode::Yoy => {
            let current_year = config.current_year.unwrap_or_else(|| anchor.year());
            let comparison_year = config.comparison_year.unwrap_or(current_year - 1);
            let (start_month, end_month) = match config.quarter {
                Some(q) => {
                    let q = q as u32;
                    ((q - 1) * 3 + 1, q * 3)
                }
                None => (1, 12),
            };
            let span = |year: i32| -> (NaiveDate, NaiveDate) {
                let start = MonthKey { year, month: start_month }.first_day();
                let end = MonthKey { year, month: end_month }.last_day();
                (start, end)
            };
            let (analysis_start, analysis_end) = span(current_year);
            let (comparison_start, comparison_end) = span(comparison_year);
            TimeInfo {
                mode: config.mode,
                analysis_start,
                analysis_end,
                comparison_start: Some(comparison_start),
                comparison_end: Some(comparison_end),
                rolling_window: None,
            }
        }
        TimeMode::Rolling => TimeInfo {
            mode: config.mode,
            analysis_start: lookback_start(anchor, config.lookback_months),
            analysis_end: anchor,
            comparison_start: None,
            comparison_end: None,
            rolling_window: Some(config.rolling_window_months),
        },
    };

    let completeness = mark_completeness(&time_info, today, lag_months);
    Ok(ResolvedWindows { time_info, completeness, notes })
}

fn validate(config: &TimeComparisonConfig) -> SignalResult<()> {
    if !(1..=120).contains(&config.lookback_months) {
        return Err(SignalError::BadRequest(
            "lookback_months must be between 1 and 120".into(),
        ));
    }
    if !(1..=24).contains(&config.rolling_window_months) {
        return Err(SignalError::BadRequest(
            "rolling_window_months must be between 1 and 24".into(),
        ));
    }
    if let Some(quarter) = config.quarter {
        if !(1..=4).contains(&quarter) {
            return Err(SignalError::BadRequest("quarter must be between 1 and 4".into()));
        }
    }
    if config.mode == TimeMode::Custom {
        let (Some(a), Some(b)) = (config.period_a, config.period_b) else {
            return Err(SignalError::BadRequest(
                "custom mode requires period_a and period_b".into(),
            ));
        };
        if a.start_date > a.end_date || b.start_date > b.end_date {
            return Err(SignalError::BadRequest(
                "comparison periods must be non-empty".into(),
            ));
        }
    }
    Ok(())
}

/// Months whose end falls within the reporting lag of `today` are incomplete.
fn mark_completeness(time_info: &TimeInfo, today: NaiveDate, lag_months: u32) -> DataCompleteness {
    let lag_cutoff = sub_months(today, lag_months);
    let mut last_complete = MonthKey::from_date(lag_cutoff);
    if last_complete.last_day() > lag_cutoff {
        // The cutoff month itself has not fully aged out.
        last_complete = MonthKey::from_date(sub_months(last_complete.first_day(), 1));
    }

    let incomplete_months = MonthKey::range(
        MonthKey::from_date(time_info.analysis_start),
        MonthKey::from_date(time_info.analysis_end),
    )
    .into_iter()
    .filter(|month| *month > last_complete)
    .collect();

    DataCompleteness {
        last_complete_month: last_complete,
        incomplete_months,
        estimated_lag_months: lag_months,
    }
}

fn sub_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}

/// Month-aligned lookback start: a `months`-month lookback ending in the
/// anchor's month covers exactly `months` month buckets.
fn lookback_start(anchor: NaiveDate, months: u32) -> NaiveDate {
    let anchor_month_start = MonthKey::from_date(anchor).first_day();
    sub_months(anchor_month_start, months.saturating_sub(1))
}
