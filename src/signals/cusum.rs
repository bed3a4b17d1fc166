//! One-sided CUSUM control procedure for sustained upward drift.

use crate::signals::types::{CusumPoint, MethodDetails, MonthKey};
use crate::signals::Measure;

/// Documented control limit, in standardised units.
pub const CONTROL_LIMIT: f64 = 4.0;

/// Accumulate standardised exceedances over the target mean.
///
/// The target mean and deviation come from the first `T-1` months; the slack
/// is half a standard deviation. `S_t = max(0, S_{t-1} + (x_t - mean)/std - 0.5)`
/// and the reported value is the series maximum.
pub fn compute(series: &[u64], months: &[MonthKey]) -> Measure {
    if series.len() < 3 {
        return Measure {
            note: Some("fewer than 3 months of history".into()),
            ..Measure::default()
        };
    }

    let baseline: Vec<f64> = series[..series.len() - 1].iter().map(|v| *v as f64).collect();
    let mean = baseline.iter().sum::<f64>() / baseline.len() as f64;
    let var = baseline
        .iter()
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / baseline.len() as f64;
    let std = var.sqrt();

    if std == 0.0 {
        return Measure {
            note: Some("baseline has zero variance".into()),
            ..Measure::default()
        };
    }

    let mut cusum = 0.0f64;
    let mut peak = 0.0f64;
    let mut trace = Vec::with_capacity(series.len());
    for (idx, count) in series.iter().enumerate() {
        let standardised = (*count as f64 - mean) / std;
        cusum = (cusum + standardised - 0.5).max(0.0);
        peak = peak.max(cusum);
        trace.push(CusumPoint {
            month: months.get(idx).copied().unwrap_or(MonthKey { year: 0, month: 1 }),
            cusum,
            count: *count,
        });
    }

    Measure {
        value: Some(peak),
        details: Some(MethodDetails::Cusum {
            mean,
            std,
            control_limit: CONTROL_LIMIT,
            cusum_series: trace,
        }),
        ..Measure::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn months(n: usize) -> Vec<MonthKey> {
        (0..n)
            .map(|i| MonthKey { year: 2025, month: (i % 12) as u32 + 1 })
            .collect()
    }

    #[test]
    fn flat_series_never_accumulates() {
        // Zero variance: no meaningful standardisation.
        let series = vec![5, 5, 5, 5, 5];
        let measure = compute(&series, &months(5));
        assert!(measure.value.is_none());
    }

    #[test]
    fn sustained_shift_accumulates() {
        let series = vec![10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 16, 16];
        let measure = compute(&series, &months(12));
        let value = measure.value.unwrap();
        assert!(value > 5.0, "sustained shift should exceed the high limit, got {value}");
    }

    #[test]
    fn single_spike_decays() {
        let spike = compute(
            &[10, 10, 10, 10, 10, 16, 10, 10, 10, 10, 10, 10],
            &months(12),
        )
        .value
        .unwrap();
        let sustained = compute(
            &[10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 16, 16],
            &months(12),
        )
        .value
        .unwrap();
        assert!(spike < 3.0);
        assert!(sustained > spike);
    }
}
