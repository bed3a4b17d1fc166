//! Period-over-period percentage change (YoY and PoP share this form).

use crate::signals::types::MethodDetails;
use crate::signals::Measure;

/// Percentage change of the analysis period against the comparison period.
///
/// An empty comparison period with current activity is undefined: the value
/// is null rather than infinite, with a note for `data_note`.
pub fn compute(current: u64, comparison: Option<u64>) -> Measure {
    let Some(comparison) = comparison else {
        return Measure {
            note: Some("comparison period unavailable for this time mode".into()),
            ..Measure::default()
        };
    };

    let details = MethodDetails::Change {
        current_period: current,
        comparison_period: comparison,
    };

    if comparison == 0 && current > 0 {
        return Measure {
            details: Some(details),
            note: Some("comparison period empty".into()),
            ..Measure::default()
        };
    }

    let denom = comparison.max(1) as f64;
    Measure {
        value: Some(100.0 * (current as f64 - comparison as f64) / denom),
        details: Some(details),
        ..Measure::default()
    }
}
