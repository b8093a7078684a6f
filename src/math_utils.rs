//! Numerical helpers shared by inference and parameter updates.
//!
//! Log-space reductions that tolerate `-inf` entries, and normalization of
//! nonnegative vectors and matrix rows into probability distributions.

use crate::em_config::DegenerateRowPolicy;
use crate::errors::{HmmError, HmmResult};
use nalgebra::{DMatrix, DVector};

/// Numerical constants.
pub mod constants {
    /// Natural logarithm of 2π
    pub const LN_TWO_PI: f64 = 1.8378770664093454835606594728112; // ln(2π)

    /// Relative slack used when checking that the log-likelihood does not decrease
    pub const MONOTONICITY_SLACK: f64 = 1e-8;

    /// Sum below which a row is treated as carrying no mass
    pub const MIN_ROW_MASS: f64 = 0.0;
}

/// `log(sum(exp(values)))` computed stably.
///
/// Returns `-inf` for an empty slice or when every entry is `-inf`, NaN if
/// any entry is NaN, and `+inf` if any entry is `+inf`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY || max == f64::INFINITY {
        return max;
    }
    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Elementwise natural log; zero probabilities map to `-inf`.
pub fn ln_vector(v: &DVector<f64>) -> DVector<f64> {
    v.map(f64::ln)
}

/// Elementwise natural log of a matrix; zero entries map to `-inf`.
pub fn ln_matrix(m: &DMatrix<f64>) -> DMatrix<f64> {
    m.map(f64::ln)
}

/// Normalizes a nonnegative vector to sum to one.
///
/// A zero-sum (or non-finite) vector is handled according to `policy`.
pub fn normalize_vector(v: &DVector<f64>, policy: DegenerateRowPolicy) -> HmmResult<DVector<f64>> {
    let sum = v.sum();
    if sum.is_finite() && sum > constants::MIN_ROW_MASS {
        return Ok(v / sum);
    }
    match degenerate_row(v.len(), 0, sum, policy)? {
        Some(replacement) => Ok(DVector::from_vec(replacement)),
        None => Ok(v.clone()),
    }
}

/// Normalizes every row of a nonnegative matrix to sum to one.
///
/// Rows with zero (or non-finite) mass are handled according to `policy`.
///
/// # Example
/// ```rust
/// use expfam_hmm::em_config::DegenerateRowPolicy;
/// use expfam_hmm::math_utils::normalize_rows;
/// use nalgebra::DMatrix;
///
/// let counts = DMatrix::from_row_slice(2, 2, &[3.0, 1.0, 0.0, 0.0]);
/// let a = normalize_rows(&counts, DegenerateRowPolicy::Uniform).unwrap();
/// assert_eq!(a[(0, 0)], 0.75);
/// assert_eq!(a[(1, 1)], 0.5);
/// ```
pub fn normalize_rows(m: &DMatrix<f64>, policy: DegenerateRowPolicy) -> HmmResult<DMatrix<f64>> {
    let mut out = m.clone();
    for i in 0..m.nrows() {
        let sum = m.row(i).sum();
        if sum.is_finite() && sum > constants::MIN_ROW_MASS {
            let scaled = m.row(i) / sum;
            out.set_row(i, &scaled);
        } else if let Some(replacement) = degenerate_row(m.ncols(), i, sum, policy)? {
            for (j, value) in replacement.into_iter().enumerate() {
                out[(i, j)] = value;
            }
        }
    }
    Ok(out)
}

// `None` means keep the row as it is.
fn degenerate_row(
    len: usize,
    row: usize,
    sum: f64,
    policy: DegenerateRowPolicy,
) -> HmmResult<Option<Vec<f64>>> {
    match policy {
        DegenerateRowPolicy::Uniform => {
            log::warn!(
                "row {} has no mass (sum = {}), replacing with uniform distribution",
                row,
                sum
            );
            Ok(Some(vec![1.0 / len as f64; len]))
        }
        DegenerateRowPolicy::LeaveUnchanged => {
            log::warn!("row {} has no mass (sum = {}), leaving unnormalized", row, sum);
            Ok(None)
        }
        DegenerateRowPolicy::Fail => Err(HmmError::DegenerateDistribution { row, sum }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_log_sum_exp_matches_direct_sum() {
        let values = [0.1, -2.0, 1.5];
        let direct: f64 = values.iter().map(|v: &f64| v.exp()).sum::<f64>().ln();
        assert_approx_eq!(log_sum_exp(&values), direct, 1e-12);
    }

    #[test]
    fn test_log_sum_exp_handles_infinities() {
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
        assert_eq!(
            log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]),
            f64::NEG_INFINITY
        );
        assert_approx_eq!(log_sum_exp(&[f64::NEG_INFINITY, 0.0]), 0.0, 1e-15);
        assert_eq!(log_sum_exp(&[1.0, f64::INFINITY]), f64::INFINITY);
        // Large magnitudes must not overflow
        assert_approx_eq!(log_sum_exp(&[1000.0, 1000.0]), 1000.0 + 2f64.ln(), 1e-9);
    }

    #[test]
    fn test_log_sum_exp_propagates_nan() {
        assert!(log_sum_exp(&[f64::NAN, f64::NAN]).is_nan());
        assert!(log_sum_exp(&[0.5, f64::NAN, -1.0]).is_nan());
        assert!(log_sum_exp(&[f64::NAN, f64::INFINITY]).is_nan());
    }

    #[test]
    fn test_normalize_rows_sums_to_one() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 1.0, 0.5, 0.0, 0.5]);
        let n = normalize_rows(&m, DegenerateRowPolicy::Fail).unwrap();
        for i in 0..2 {
            assert_approx_eq!(n.row(i).sum(), 1.0, 1e-12);
        }
        assert_approx_eq!(n[(0, 1)], 0.5, 1e-12);
    }

    #[test]
    fn test_degenerate_row_policies() {
        let m = DMatrix::from_row_slice(2, 2, &[2.0, 2.0, 0.0, 0.0]);

        // Test Case 1: uniform replacement
        let n = normalize_rows(&m, DegenerateRowPolicy::Uniform).unwrap();
        assert_eq!(n[(1, 0)], 0.5);
        assert_eq!(n[(1, 1)], 0.5);

        // Test Case 2: divide by one, i.e. leave zeros
        let n = normalize_rows(&m, DegenerateRowPolicy::LeaveUnchanged).unwrap();
        assert_eq!(n[(1, 0)], 0.0);
        assert_eq!(n[(0, 0)], 0.5);

        // Test Case 3: fail
        match normalize_rows(&m, DegenerateRowPolicy::Fail) {
            Err(HmmError::DegenerateDistribution { row, sum }) => {
                assert_eq!(row, 1);
                assert_eq!(sum, 0.0);
            }
            _ => panic!("Expected DegenerateDistribution"),
        }
    }

    #[test]
    fn test_normalize_vector() {
        let v = DVector::from_vec(vec![1.0, 3.0]);
        let n = normalize_vector(&v, DegenerateRowPolicy::Fail).unwrap();
        assert_approx_eq!(n[1], 0.75, 1e-12);

        let zero = DVector::zeros(4);
        let n = normalize_vector(&zero, DegenerateRowPolicy::Uniform).unwrap();
        assert!(n.iter().all(|&p| p == 0.25));
        assert!(normalize_vector(&zero, DegenerateRowPolicy::Fail).is_err());
    }
}
