//! Window resolution and data-completeness marking.

use chrono::NaiveDate;
use maude_sentinel::signals::types::{
    MonthKey, TimeComparisonConfig, TimeMode, TimePeriod,
};
use maude_sentinel::signals::windows::resolve;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn lookback_covers_exactly_n_month_buckets() {
    let config = TimeComparisonConfig {
        mode: TimeMode::Lookback,
        lookback_months: 12,
        ..TimeComparisonConfig::default()
    };
    let resolved = resolve(&config, date(2025, 12, 15), date(2026, 1, 10), 2).unwrap();
    assert_eq!(resolved.time_info.analysis_start, date(2025, 1, 1));
    assert_eq!(resolved.time_info.analysis_end, date(2025, 12, 15));

    let buckets = MonthKey::range(
        MonthKey::from_date(resolved.time_info.analysis_start),
        MonthKey::from_date(resolved.time_info.analysis_end),
    );
    assert_eq!(buckets.len(), 12);
}

#[test]
fn yoy_quarter_restricts_both_spans() {
    let config = TimeComparisonConfig {
        mode: TimeMode::Yoy,
        current_year: Some(2025),
        comparison_year: Some(2024),
        quarter: Some(2),
        ..TimeComparisonConfig::default()
    };
    let resolved = resolve(&config, date(2025, 12, 31), date(2026, 1, 10), 2).unwrap();
    assert_eq!(resolved.time_info.analysis_start, date(2025, 4, 1));
    assert_eq!(resolved.time_info.analysis_end, date(2025, 6, 30));
    assert_eq!(resolved.time_info.comparison_start, Some(date(2024, 4, 1)));
    assert_eq!(resolved.time_info.comparison_end, Some(date(2024, 6, 30)));
}

#[test]
fn yoy_defaults_to_anchor_year_and_prior() {
    let config = TimeComparisonConfig {
        mode: TimeMode::Yoy,
        ..TimeComparisonConfig::default()
    };
    let resolved = resolve(&config, date(2025, 7, 4), date(2025, 8, 1), 2).unwrap();
    assert_eq!(resolved.time_info.analysis_start, date(2025, 1, 1));
    assert_eq!(resolved.time_info.comparison_start, Some(date(2024, 1, 1)));
}

#[test]
fn custom_periods_of_uneven_length_are_noted() {
    let config = TimeComparisonConfig {
        mode: TimeMode::Custom,
        period_a: Some(TimePeriod {
            start_date: date(2025, 1, 1),
            end_date: date(2025, 6, 30),
        }),
        period_b: Some(TimePeriod {
            start_date: date(2024, 1, 1),
            end_date: date(2024, 3, 31),
        }),
        ..TimeComparisonConfig::default()
    };
    let resolved = resolve(&config, date(2025, 12, 31), date(2026, 1, 10), 2).unwrap();
    assert!(resolved
        .notes
        .iter()
        .any(|n| n.contains("differ in length")));
}

#[test]
fn custom_mode_requires_both_periods() {
    let config = TimeComparisonConfig {
        mode: TimeMode::Custom,
        ..TimeComparisonConfig::default()
    };
    assert!(resolve(&config, date(2025, 12, 31), date(2026, 1, 10), 2).is_err());
}

#[test]
fn inverted_period_is_rejected() {
    let config = TimeComparisonConfig {
        mode: TimeMode::Custom,
        period_a: Some(TimePeriod {
            start_date: date(2025, 6, 1),
            end_date: date(2025, 1, 1),
        }),
        period_b: Some(TimePeriod {
            start_date: date(2024, 1, 1),
            end_date: date(2024, 6, 1),
        }),
        ..TimeComparisonConfig::default()
    };
    assert!(resolve(&config, date(2025, 12, 31), date(2026, 1, 10), 2).is_err());
}

#[test]
fn completeness_marks_lagged_months() {
    let config = TimeComparisonConfig::default();
    // Today is 2026-08-02 with a two-month lag: June..August 2026 have not
    // fully aged out, so May is the last complete month.
    let resolved = resolve(&config, date(2026, 7, 20), date(2026, 8, 2), 2).unwrap();
    let completeness = &resolved.completeness;
    assert_eq!(completeness.last_complete_month, MonthKey { year: 2026, month: 5 });
    assert!(completeness
        .incomplete_months
        .contains(&MonthKey { year: 2026, month: 6 }));
    assert!(completeness
        .incomplete_months
        .contains(&MonthKey { year: 2026, month: 7 }));
    assert_eq!(completeness.estimated_lag_months, 2);
}

#[test]
fn stale_corpus_has_no_incomplete_months() {
    let config = TimeComparisonConfig::default();
    // Anchor far in the past: the whole analysis window is complete.
    let resolved = resolve(&config, date(2024, 12, 31), date(2026, 8, 2), 2).unwrap();
    assert!(resolved.completeness.incomplete_months.is_empty());
}

#[test]
fn out_of_range_knobs_are_rejected() {
    let mut config = TimeComparisonConfig {
        lookback_months: 0,
        ..TimeComparisonConfig::default()
    };
    assert!(resolve(&config, date(2025, 1, 1), date(2025, 1, 1), 2).is_err());

    config.lookback_months = 12;
    config.quarter = Some(5);
    config.mode = TimeMode::Yoy;
    assert!(resolve(&config, date(2025, 1, 1), date(2025, 1, 1), 2).is_err());

    config.quarter = None;
    config.rolling_window_months = 0;
    assert!(resolve(&config, date(2025, 1, 1), date(2025, 1, 1), 2).is_err());
}
