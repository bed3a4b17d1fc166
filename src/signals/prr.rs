//! Proportional reporting ratio over a death-versus-other 2x2 table.

use crate::signals::types::MethodDetails;
use crate::signals::Measure;

/// `PRR = (a/(a+b)) / (c/(c+d))` with a 95% CI from the log-normal
/// approximation. Undefined proportions yield a null value; the `a >= 3`
/// requirement is enforced at classification.
pub fn compute(a: u64, b: u64, c: u64, d: u64) -> Measure {
    let details = MethodDetails::Contingency { a, b, c, d };
    if a == 0 || c == 0 || a + b == 0 || c + d == 0 {
        return Measure {
            details: Some(details),
            note: Some("contingency table too sparse for PRR".into()),
            ..Measure::default()
        };
    }

    let (af, bf, cf, df) = (a as f64, b as f64, c as f64, d as f64);
    let prr = (af / (af + bf)) / (cf / (cf + df));

    let variance = 1.0 / af - 1.0 / (af + bf) + 1.0 / cf - 1.0 / (cf + df);
    let se = variance.max(0.0).sqrt();
    let log_prr = prr.ln();

    Measure {
        value: Some(prr),
        lower_ci: Some((log_prr - 1.96 * se).exp()),
        upper_ci: Some((log_prr + 1.96 * se).exp()),
        details: Some(details),
        ..Measure::default()
    }
}
