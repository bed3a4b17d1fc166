//! Z-score of a target month against the entity's own monthly baseline.

use crate::signals::types::{MethodDetails, MonthKey, MonthlyPoint};
use crate::signals::Measure;

/// Score `series[target_idx]` against every other month.
///
/// The baseline mean and standard deviation are sample statistics
/// (Bessel-corrected). A flat baseline or fewer than three months yields a
/// null value.
pub fn compute(series: &[u64], months: &[MonthKey], target_idx: usize) -> Measure {
    let monthly_series = points(series, months);
    if series.len() < 3 || target_idx >= series.len() {
        return Measure {
            note: Some("fewer than 3 months of history".into()),
            ..Measure::default()
        };
    }

    let baseline: Vec<f64> = series
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != target_idx)
        .map(|(_, v)| *v as f64)
        .collect();
    let mean = baseline.iter().sum::<f64>() / baseline.len() as f64;
    let std = sample_std(&baseline, mean);
    let latest = series[target_idx];

    let details = MethodDetails::Baseline {
        avg_monthly: mean,
        std_monthly: std,
        latest_month: latest,
        monthly_series,
    };

    if std == 0.0 {
        return Measure {
            details: Some(details),
            note: Some("baseline has zero variance".into()),
            ..Measure::default()
        };
    }

    Measure {
        value: Some((latest as f64 - mean) / std),
        details: Some(details),
        ..Measure::default()
    }
}

/// Sample standard deviation with Bessel's correction.
pub fn sample_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let var = values
        .iter()
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / (values.len() - 1) as f64;
    var.sqrt()
}

pub(crate) fn points(series: &[u64], months: &[MonthKey]) -> Vec<MonthlyPoint> {
    months
        .iter()
        .zip(series.iter())
        .map(|(month, count)| MonthlyPoint { month: *month, count: *count })
        .collect()
}
