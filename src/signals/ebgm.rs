//! Simplified Empirical Bayes Geometric Mean with a gamma lower bound.

use crate::signals::types::MethodDetails;
use crate::signals::Measure;

/// Shrunk observed/expected ratio for the entity's deaths.
///
/// `expected = (a+b)(a+c)/N` under independence, `EBGM = (a+0.5)/(expected+0.5)`,
/// and `EB05` is the 5th percentile of `Gamma(shape = a+0.5, rate = expected+0.5)`
/// via the Wilson-Hilferty approximation. This is a deliberately simplified
/// estimator, not a full gamma-Poisson mixture fit.
pub fn compute(a: u64, b: u64, c: u64, d: u64) -> Measure {
    let total = a + b + c + d;
    if total == 0 || a + b == 0 || a + c == 0 {
        return Measure {
            note: Some("contingency table too sparse for EBGM".into()),
            ..Measure::default()
        };
    }

    let expected = ((a + b) as f64) * ((a + c) as f64) / total as f64;
    if expected == 0.0 {
        return Measure {
            note: Some("expected count is zero for EBGM".into()),
            ..Measure::default()
        };
    }

    let rr = a as f64 / expected;
    let ebgm = (a as f64 + 0.5) / (expected + 0.5);
    let eb05 = gamma_quantile_p05(a as f64 + 0.5, expected + 0.5);

    Measure {
        value: Some(ebgm),
        lower_ci: Some(eb05),
        details: Some(MethodDetails::Expected { observed: a, expected, rr }),
        ..Measure::default()
    }
}

/// z for the 5th percentile of the standard normal.
const Z_05: f64 = -1.644_853_626_951_472_2;

/// Wilson-Hilferty approximation to the gamma quantile: for
/// `X ~ Gamma(shape k, rate r)`, `(X/k)^(1/3)` is approximately normal with
/// mean `1 - 1/(9k)` and variance `1/(9k)`.
fn gamma_quantile_p05(shape: f64, rate: f64) -> f64 {
    let nine_k = 9.0 * shape;
    let cube_root = 1.0 - 1.0 / nine_k + Z_05 * (1.0 / nine_k).sqrt();
    let cube_root = cube_root.max(0.0);
    shape * cube_root.powi(3) / rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_sits_below_the_mean() {
        // Gamma mean is shape/rate; the 5th percentile must be below it.
        let q = gamma_quantile_p05(10.5, 5.5);
        assert!(q < 10.5 / 5.5);
        assert!(q > 0.0);
    }

    #[test]
    fn quantile_matches_chi_square_reference() {
        // shape = 1.5, rate = 1 corresponds to chi-square with 3 degrees of
        // freedom divided by 2; chisq(0.05; 3) = 0.3518.
        let q = gamma_quantile_p05(1.5, 1.0);
        assert!((q - 0.3518 / 2.0).abs() < 0.02, "got {q}");
    }

    #[test]
    fn shrinkage_pulls_small_counts_toward_one() {
        // One observed death against a tiny expectation: the raw RR is huge
        // but the shrunk estimate stays moderate.
        let measure = compute(1, 10, 5, 10_000);
        let value = measure.value.unwrap();
        let MethodDetails::Expected { rr, .. } = measure.details.unwrap() else {
            panic!("wrong details variant");
        };
        assert!(rr > value);
    }
}
