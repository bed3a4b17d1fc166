//! Threshold application and per-method signal classification.

use crate::signals::types::{
    MethodResult, SignalMethod, SignalStrength, ThresholdOverrides,
};
use crate::signals::Measure;

/// Effective thresholds for one request.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub zscore_high: f64,
    pub zscore_elevated: f64,
    pub prr_high: f64,
    pub prr_elevated: f64,
    pub ror_high: f64,
    pub ror_elevated: f64,
    pub ebgm_high: f64,
    pub ebgm_elevated: f64,
    pub cusum_high: f64,
    pub cusum_elevated: f64,
    pub change_high: f64,
    pub change_elevated: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            zscore_high: 2.0,
            zscore_elevated: 1.0,
            prr_high: 3.0,
            prr_elevated: 2.0,
            ror_high: 3.0,
            ror_elevated: 2.0,
            ebgm_high: 3.0,
            ebgm_elevated: 2.0,
            cusum_high: 5.0,
            cusum_elevated: 3.0,
            change_high: 100.0,
            change_elevated: 50.0,
        }
    }
}

impl Thresholds {
    /// Defaults with any request overrides applied.
    pub fn with_overrides(overrides: &ThresholdOverrides) -> Self {
        let defaults = Self::default();
        Self {
            zscore_high: overrides.zscore_high_threshold.unwrap_or(defaults.zscore_high),
            zscore_elevated: overrides
                .zscore_elevated_threshold
                .unwrap_or(defaults.zscore_elevated),
            prr_high: overrides.prr_high_threshold.unwrap_or(defaults.prr_high),
            prr_elevated: overrides.prr_elevated_threshold.unwrap_or(defaults.prr_elevated),
            ror_high: overrides.ror_high_threshold.unwrap_or(defaults.ror_high),
            ror_elevated: overrides.ror_elevated_threshold.unwrap_or(defaults.ror_elevated),
            ebgm_high: overrides.ebgm_high_threshold.unwrap_or(defaults.ebgm_high),
            ebgm_elevated: overrides.ebgm_elevated_threshold.unwrap_or(defaults.ebgm_elevated),
            cusum_high: overrides.cusum_high_threshold.unwrap_or(defaults.cusum_high),
            cusum_elevated: overrides
                .cusum_elevated_threshold
                .unwrap_or(defaults.cusum_elevated),
            change_high: overrides.change_pct_high.unwrap_or(defaults.change_high),
            change_elevated: overrides.change_pct_elevated.unwrap_or(defaults.change_elevated),
        }
    }
}

/// Minimum-count gates feeding classification.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateContext {
    /// Entity deaths in the window (the `a` cell).
    pub deaths: u64,
    /// Current-period events, gating yoy/pop.
    pub current_events: u64,
    pub min_events: u64,
}

/// Turn a raw measure into a classified method result.
pub fn classify(
    method: SignalMethod,
    measure: Measure,
    thresholds: &Thresholds,
    gates: GateContext,
) -> MethodResult {
    let strength = match measure.value {
        None => SignalStrength::Normal,
        Some(value) => match method {
            SignalMethod::Zscore => {
                exceeds(value, thresholds.zscore_high, thresholds.zscore_elevated)
            }
            SignalMethod::Rolling => {
                exceeds(value, thresholds.zscore_high, thresholds.zscore_elevated)
            }
            SignalMethod::Cusum => exceeds(value, thresholds.cusum_high, thresholds.cusum_elevated),
            SignalMethod::Yoy | SignalMethod::Pop => {
                if gates.current_events >= gates.min_events {
                    exceeds(value, thresholds.change_high, thresholds.change_elevated)
                } else {
                    SignalStrength::Normal
                }
            }
            SignalMethod::Prr => gated_ratio(
                value,
                measure.lower_ci,
                gates.deaths,
                thresholds.prr_high,
                thresholds.prr_elevated,
            ),
            SignalMethod::Ror => gated_ratio(
                value,
                measure.lower_ci,
                gates.deaths,
                thresholds.ror_high,
                thresholds.ror_elevated,
            ),
            SignalMethod::Ebgm => shrunk_ratio(
                value,
                measure.lower_ci,
                thresholds.ebgm_high,
                thresholds.ebgm_elevated,
            ),
        },
    };

    MethodResult {
        method,
        value: measure.value,
        lower_ci: measure.lower_ci,
        upper_ci: measure.upper_ci,
        is_signal: strength != SignalStrength::Normal,
        signal_strength: strength,
        details: measure.details,
    }
}

/// Strict-exceedance classification for the monotonic methods.
fn exceeds(value: f64, high: f64, elevated: f64) -> SignalStrength {
    if value > high {
        SignalStrength::High
    } else if value > elevated {
        SignalStrength::Elevated
    } else {
        SignalStrength::Normal
    }
}

/// PRR/ROR classification: the ratio threshold, the lower-CI gate, and the
/// minimum death-count gate must all hold.
fn gated_ratio(
    value: f64,
    lower_ci: Option<f64>,
    deaths: u64,
    high: f64,
    elevated: f64,
) -> SignalStrength {
    let ci_ok = lower_ci.map_or(false, |ci| ci >= 1.0);
    if !ci_ok || deaths < 3 {
        return SignalStrength::Normal;
    }
    if value >= high {
        SignalStrength::High
    } else if value >= elevated {
        SignalStrength::Elevated
    } else {
        SignalStrength::Normal
    }
}

/// EBGM classification: the shrinkage already tempers small counts, so the
/// only gates are the ratio threshold and `EB05 >= 1.0`.
fn shrunk_ratio(value: f64, eb05: Option<f64>, high: f64, elevated: f64) -> SignalStrength {
    if !eb05.map_or(false, |ci| ci >= 1.0) {
        return SignalStrength::Normal;
    }
    if value >= high {
        SignalStrength::High
    } else if value >= elevated {
        SignalStrength::Elevated
    } else {
        SignalStrength::Normal
    }
}

/// Overall entity strength: the maximum across its method results.
pub fn overall_strength(results: &[MethodResult]) -> SignalStrength {
    results
        .iter()
        .map(|r| r.signal_strength)
        .max()
        .unwrap_or(SignalStrength::Normal)
}
