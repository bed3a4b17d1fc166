//! Reporting odds ratio over a death-versus-other 2x2 table.

use crate::signals::types::MethodDetails;
use crate::signals::Measure;

/// `ROR = (a*d)/(b*c)` with a 95% CI from the log-normal approximation.
/// Any zero cell leaves the odds ratio undefined and the value null.
pub fn compute(a: u64, b: u64, c: u64, d: u64) -> Measure {
    let details = MethodDetails::Contingency { a, b, c, d };
    if a == 0 || b == 0 || c == 0 || d == 0 {
        return Measure {
            details: Some(details),
            note: Some("contingency table has an empty cell for ROR".into()),
            ..Measure::default()
        };
    }

    let (af, bf, cf, df) = (a as f64, b as f64, c as f64, d as f64);
    let ror = (af * df) / (bf * cf);
    let se = (1.0 / af + 1.0 / bf + 1.0 / cf + 1.0 / df).sqrt();
    let log_ror = ror.ln();

    Measure {
        value: Some(ror),
        lower_ci: Some((log_ror - 1.96 * se).exp()),
        upper_ci: Some((log_ror + 1.96 * se).exp()),
        details: Some(details),
        ..Measure::default()
    }
}
