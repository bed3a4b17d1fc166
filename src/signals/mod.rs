//! Signal detection: window resolution, statistical methods, classification,
//! and the orchestrator.

pub mod change;
pub mod classify;
pub mod cusum;
pub mod detect;
pub mod ebgm;
pub mod prr;
pub mod rolling;
pub mod ror;
pub mod types;
pub mod windows;
pub mod zscore;

use self::types::{MethodDetails, MonthKey, SignalMethod};

pub use self::detect::detect;

/// Raw outcome of one statistical method before classification.
///
/// A null `value` means the method could not be computed for this entity;
/// `note` carries the reason for the response's `data_note`.
#[derive(Debug, Clone, Default)]
pub struct Measure {
    pub value: Option<f64>,
    pub lower_ci: Option<f64>,
    pub upper_ci: Option<f64>,
    pub details: Option<MethodDetails>,
    pub note: Option<String>,
}

/// Inputs available to a method for one entity.
#[derive(Debug)]
pub struct MethodInput<'a> {
    /// Zero-filled monthly totals over the analysis window.
    pub series: &'a [u64],
    pub months: &'a [MonthKey],
    /// Index of the month a z-score targets (latest unless overridden).
    pub target_idx: usize,
    pub rolling_window: u32,
    pub current_events: u64,
    pub comparison_events: Option<u64>,
    /// Death-vs-other 2x2 table, when a comparison population is available.
    pub table: Option<(u64, u64, u64, u64)>,
}

/// Dispatch one method over its input. Pure: no store access, no clocks.
pub fn run_method(method: SignalMethod, input: &MethodInput) -> Measure {
    match method {
        SignalMethod::Zscore => zscore::compute(input.series, input.months, input.target_idx),
        SignalMethod::Rolling => rolling::compute(input.series, input.months, input.rolling_window),
        SignalMethod::Cusum => cusum::compute(input.series, input.months),
        SignalMethod::Yoy | SignalMethod::Pop => {
            change::compute(input.current_events, input.comparison_events)
        }
        SignalMethod::Prr => match input.table {
            Some((a, b, c, d)) => prr::compute(a, b, c, d),
            None => no_population(),
        },
        SignalMethod::Ror => match input.table {
            Some((a, b, c, d)) => ror::compute(a, b, c, d),
            None => no_population(),
        },
        SignalMethod::Ebgm => match input.table {
            Some((a, b, c, d)) => ebgm::compute(a, b, c, d),
            None => no_population(),
        },
    }
}

fn no_population() -> Measure {
    Measure {
        note: Some("comparison population unavailable".into()),
        ..Measure::default()
    }
}
