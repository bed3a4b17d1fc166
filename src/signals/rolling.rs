//! Deviation of the latest month from a short rolling baseline.

use crate::signals::types::{MethodDetails, MonthKey};
use crate::signals::{zscore, Measure};

/// Score the latest month against the mean/std of the `window` months that
/// precede it. Requires at least `window + 1` months of history.
pub fn compute(series: &[u64], months: &[MonthKey], window: u32) -> Measure {
    let window = window.max(1) as usize;
    if series.len() < window + 1 {
        return Measure {
            note: Some(format!("needs at least {} months of history", window + 1)),
            ..Measure::default()
        };
    }

    let latest = *series.last().expect("non-empty series");
    let baseline: Vec<f64> = series[series.len() - 1 - window..series.len() - 1]
        .iter()
        .map(|v| *v as f64)
        .collect();
    let mean = baseline.iter().sum::<f64>() / baseline.len() as f64;
    let std = population_std(&baseline, mean);

    let details = MethodDetails::Rolling {
        rolling_avg: mean,
        rolling_std: std,
        latest,
        window_months: window as u32,
        monthly_series: zscore::points(series, months),
    };

    if std == 0.0 {
        return Measure {
            details: Some(details),
            note: Some("rolling baseline has zero variance".into()),
            ..Measure::default()
        };
    }

    Measure {
        value: Some((latest as f64 - mean) / std),
        details: Some(details),
        ..Measure::default()
    }
}

fn population_std(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let var = values
        .iter()
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / values.len() as f64;
    var.sqrt()
}
