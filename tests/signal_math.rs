//! Reference checks for the pure statistical methods.

use maude_sentinel::signals::types::{MethodDetails, MonthKey};
use maude_sentinel::signals::{change, ebgm, prr, rolling, ror, zscore};

fn months(n: usize) -> Vec<MonthKey> {
    let mut out = Vec::with_capacity(n);
    let mut key = MonthKey { year: 2025, month: 1 };
    for _ in 0..n {
        out.push(key);
        key = key.next();
    }
    out
}

#[test]
fn zscore_is_null_on_flat_history() {
    // Eleven identical months then a spike: the baseline excludes the spike,
    // so its variance is zero and the score is undefined.
    let series = vec![10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 100];
    let measure = zscore::compute(&series, &months(12), 11);
    assert!(measure.value.is_none());
    let Some(MethodDetails::Baseline { avg_monthly, std_monthly, .. }) = measure.details else {
        panic!("expected baseline details");
    };
    assert!((avg_monthly - 10.0).abs() < 1e-9);
    assert_eq!(std_monthly, 0.0);
}

#[test]
fn zscore_flags_a_genuine_spike() {
    let series = vec![8, 12, 9, 11, 10, 9, 10, 11, 10, 9, 12, 30];
    let measure = zscore::compute(&series, &months(12), 11);
    let value = measure.value.expect("computable baseline");
    // Baseline mean 10.0909, sample std 1.3003 over the first 11 months.
    assert!((value - 15.31).abs() < 0.05, "got {value}");
}

#[test]
fn zscore_needs_three_months() {
    let measure = zscore::compute(&[5, 9], &months(2), 1);
    assert!(measure.value.is_none());
    assert!(measure.note.is_some());
}

#[test]
fn zscore_respects_target_month() {
    let series = vec![10, 11, 40, 9, 10, 11, 9, 10, 11, 9, 10, 11];
    let targeted = zscore::compute(&series, &months(12), 2).value.unwrap();
    let latest = zscore::compute(&series, &months(12), 11).value.unwrap();
    assert!(targeted > latest);
}

#[test]
fn rolling_deviation_uses_preceding_window() {
    // Baseline is the three months before the latest: 12, 14, 13.
    let series = vec![2, 3, 2, 12, 14, 13, 40];
    let measure = rolling::compute(&series, &months(7), 3);
    let value = measure.value.unwrap();
    let mean = 13.0;
    let std = (2.0f64 / 3.0).sqrt();
    assert!((value - (40.0 - mean) / std).abs() < 1e-9);
}

#[test]
fn rolling_requires_window_plus_one() {
    let measure = rolling::compute(&[5, 6, 7], &months(3), 3);
    assert!(measure.value.is_none());
}

#[test]
fn yoy_change_is_percentage() {
    let measure = change::compute(150, Some(100));
    assert!((measure.value.unwrap() - 50.0).abs() < 1e-9);

    let measure = change::compute(30, Some(60));
    assert!((measure.value.unwrap() + 50.0).abs() < 1e-9);
}

#[test]
fn yoy_with_empty_comparison_is_null_not_infinite() {
    let measure = change::compute(50, Some(0));
    assert!(measure.value.is_none());
    assert!(measure.note.unwrap().contains("comparison period empty"));

    // No activity in either period is a clean zero.
    let measure = change::compute(0, Some(0));
    assert_eq!(measure.value.unwrap(), 0.0);
}

#[test]
fn prr_matches_hand_computation() {
    // a=12, b=30, c=8, d=90: PRR = (12/42)/(8/98) = 3.5.
    let measure = prr::compute(12, 30, 8, 90);
    let value = measure.value.unwrap();
    assert!((value - 3.5).abs() < 1e-9);
    assert!(measure.lower_ci.unwrap() < value);
    assert!(measure.upper_ci.unwrap() > value);
}

#[test]
fn prr_ci_brackets_shrink_with_counts() {
    let small = prr::compute(4, 100, 40, 10_000);
    let large = prr::compute(40, 1_000, 400, 100_000);
    let small_span = small.upper_ci.unwrap() / small.lower_ci.unwrap();
    let large_span = large.upper_ci.unwrap() / large.lower_ci.unwrap();
    assert!(large_span < small_span);
}

#[test]
fn ror_matches_reference() {
    let measure = ror::compute(12, 30, 8, 90);
    let value = measure.value.unwrap();
    assert!((value - 4.5).abs() < 0.5);
    assert!(measure.lower_ci.unwrap() < value);
    assert!(measure.upper_ci.unwrap() > value);
}

#[test]
fn ror_is_null_on_any_empty_cell() {
    assert!(ror::compute(0, 30, 8, 90).value.is_none());
    assert!(ror::compute(12, 0, 8, 90).value.is_none());
    assert!(ror::compute(12, 30, 0, 90).value.is_none());
    assert!(ror::compute(12, 30, 8, 0).value.is_none());
}

#[test]
fn ebgm_shrinks_toward_one() {
    // Expected = (a+b)(a+c)/N.
    let measure = ebgm::compute(20, 80, 100, 9_800);
    let value = measure.value.unwrap();
    let Some(MethodDetails::Expected { observed, expected, rr }) = measure.details else {
        panic!("expected EBGM details");
    };
    assert_eq!(observed, 20);
    assert!((expected - 100.0 * 120.0 / 10_000.0).abs() < 1e-9);
    assert!(rr > value, "shrunk estimate should sit below the raw ratio");
    assert!(measure.lower_ci.unwrap() < value);
}

#[test]
fn ci_containment_for_signalling_tables() {
    // A strongly disproportionate table: every reported lower bound must
    // exceed one when the method would flag it.
    let measure = prr::compute(30, 70, 50, 9_950);
    assert!(measure.value.unwrap() >= 3.0);
    assert!(measure.lower_ci.unwrap() >= 1.0);
}
