//! Error types and validation functions for HMM estimation.
//!
//! Model-level failures (bad shapes, singular parameters, families that lack a
//! capability) are reported through [`HmmError`]. The EM driver wraps these in
//! [`EmError`], which additionally carries the last parameter estimate when a
//! run fails to converge.

use crate::hmm_core::HmmParams;
use nalgebra::{DMatrix, DVector};
use std::fmt;
use thiserror::Error;

/// Error types for model construction, inference and parameter updates.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum HmmError {
    /// Not enough observations for the requested operation.
    #[error("Insufficient data: need at least {required} observations, got {actual}")]
    InsufficientData {
        /// Minimum required observations
        required: usize,
        /// Actual number of observations provided
        actual: usize,
    },

    /// Invalid parameter or configuration value.
    #[error("Invalid parameter: {parameter} = {value}, expected {constraint}")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value provided
        value: f64,
        /// Valid range or constraint description
        constraint: String,
    },

    /// Two arrays that must agree in shape do not.
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Where the mismatch was detected
        context: String,
        /// Expected size
        expected: usize,
        /// Size actually seen
        actual: usize,
    },

    /// A covariance or precision matrix is not positive definite, or a state
    /// has no expected occupancy to estimate from.
    #[error("Singular parameter {parameter}: {reason}")]
    SingularParameter {
        /// Which parameter is singular
        parameter: String,
        /// Detailed reason
        reason: String,
    },

    /// The emission family does not provide the requested capability.
    #[error("{family} does not implement {capability}")]
    UnimplementedFamily {
        /// Family name
        family: String,
        /// Missing operation
        capability: String,
    },

    /// A row that must be normalized sums to zero (or is not finite).
    #[error("Degenerate distribution in row {row}: sum = {sum}")]
    DegenerateDistribution {
        /// Row index (0 for vectors)
        row: usize,
        /// Offending row sum
        sum: f64,
    },

    /// Numerical computation error due to non-finite intermediate values.
    #[error("Numerical computation failed: {reason}")]
    NumericalError {
        /// Detailed reason for numerical failure
        reason: String,
        /// Operation that failed
        operation: Option<String>,
    },
}

/// Result type for model-level operations.
pub type HmmResult<T> = Result<T, HmmError>;

/// Failure of an EM run.
///
/// Convergence failures keep the last parameter tuple so callers can inspect
/// or resume from it.
#[derive(Error, Debug, Clone)]
pub enum EmError<T: fmt::Debug> {
    /// The fixed point was not reached within the iteration budget.
    #[error("EM did not converge within {iterations} iterations")]
    NonConvergence {
        /// Iterations performed
        iterations: usize,
        /// Estimate after the final iteration
        last: Box<HmmParams<T>>,
    },

    /// The observations have zero probability under the current estimate.
    #[error("Log-likelihood is -inf at iteration {iteration}")]
    ZeroLikelihood {
        /// Iteration at which the likelihood vanished
        iteration: usize,
        /// Estimate that assigns zero probability to the data
        last: Box<HmmParams<T>>,
    },

    /// A model-level error raised inside an E or M step.
    #[error(transparent)]
    Model(#[from] HmmError),
}

impl<T: fmt::Debug> EmError<T> {
    /// The parameter tuple carried by a convergence failure, if any.
    pub fn last_params(&self) -> Option<&HmmParams<T>> {
        match self {
            EmError::NonConvergence { last, .. } | EmError::ZeroLikelihood { last, .. } => {
                Some(last)
            }
            EmError::Model(_) => None,
        }
    }

    /// Whether the run failed to converge rather than hitting a model error.
    pub fn is_convergence_failure(&self) -> bool {
        !matches!(self, EmError::Model(_))
    }
}

/// Validates that a scalar is finite.
///
/// # Example
/// ```rust
/// use expfam_hmm::errors::validate_finite;
///
/// assert!(validate_finite(1.0, "test").is_ok());
/// assert!(validate_finite(f64::NAN, "test").is_err());
/// ```
pub fn validate_finite(value: f64, name: &str) -> HmmResult<()> {
    if !value.is_finite() {
        Err(HmmError::NumericalError {
            reason: format!("{} is not finite: {}", name, value),
            operation: None,
        })
    } else {
        Ok(())
    }
}

/// Validates that all values in a slice are finite.
///
/// Returns on the first non-finite value, naming its index.
///
/// # Arguments
/// * `data` - Values to validate
/// * `name` - Array name for error reporting
///
/// # Example
/// ```rust
/// use expfam_hmm::errors::validate_all_finite;
///
/// assert!(validate_all_finite(&[1.0, 2.0], "ok").is_ok());
/// assert!(validate_all_finite(&[1.0, f64::NAN], "bad").is_err());
/// ```
pub fn validate_all_finite(data: &[f64], name: &str) -> HmmResult<()> {
    if let Some((i, &value)) = data.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(HmmError::NumericalError {
            reason: format!("{} contains non-finite value at index {}: {}", name, i, value),
            operation: None,
        });
    }
    Ok(())
}

/// Validates that `p` is a probability vector: non-negative, finite, summing
/// to one within `1e-6`.
pub fn validate_probability_vector(p: &DVector<f64>, name: &str) -> HmmResult<()> {
    validate_distribution(p.iter().copied(), name)
}

/// Validates that every row of `a` is a probability vector.
pub fn validate_stochastic_matrix(a: &DMatrix<f64>, name: &str) -> HmmResult<()> {
    if a.nrows() != a.ncols() {
        return Err(HmmError::DimensionMismatch {
            context: format!("{} must be square", name),
            expected: a.nrows(),
            actual: a.ncols(),
        });
    }
    for (i, row) in a.row_iter().enumerate() {
        validate_distribution(row.iter().copied(), &format!("{}[{}]", name, i))?;
    }
    Ok(())
}

fn validate_distribution(values: impl Iterator<Item = f64>, name: &str) -> HmmResult<()> {
    let mut sum = 0.0;
    for v in values {
        if !v.is_finite() || v < 0.0 {
            return Err(HmmError::InvalidParameter {
                parameter: name.to_string(),
                value: v,
                constraint: "finite non-negative probabilities".to_string(),
            });
        }
        sum += v;
    }
    if (sum - 1.0).abs() > 1e-6 {
        return Err(HmmError::InvalidParameter {
            parameter: format!("sum of {}", name),
            value: sum,
            constraint: "1.0".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_finite_rejects_nan_and_infinity() {
        assert!(validate_finite(0.0, "x").is_ok());
        assert!(validate_finite(f64::NAN, "x").is_err());
        assert!(validate_finite(f64::NEG_INFINITY, "x").is_err());
    }

    #[test]
    fn test_validate_all_finite_reports_index() {
        let result = validate_all_finite(&[1.0, 2.0, f64::INFINITY], "stats");
        match result {
            Err(HmmError::NumericalError { reason, .. }) => {
                assert!(reason.contains("stats"));
                assert!(reason.contains("index 2"));
            }
            _ => panic!("Expected NumericalError"),
        }
        assert!(validate_all_finite(&[], "empty").is_ok());
    }

    #[test]
    fn test_validate_probability_vector() {
        // Test Case 1: valid distribution
        let p = DVector::from_vec(vec![0.25, 0.75]);
        assert!(validate_probability_vector(&p, "pi").is_ok());

        // Test Case 2: negative entry
        let p = DVector::from_vec(vec![-0.25, 1.25]);
        assert!(matches!(
            validate_probability_vector(&p, "pi"),
            Err(HmmError::InvalidParameter { .. })
        ));

        // Test Case 3: does not sum to one
        let p = DVector::from_vec(vec![0.5, 0.6]);
        match validate_probability_vector(&p, "pi") {
            Err(HmmError::InvalidParameter { value, .. }) => assert!((value - 1.1).abs() < 1e-12),
            _ => panic!("Expected InvalidParameter"),
        }
    }

    #[test]
    fn test_validate_stochastic_matrix_shape() {
        let a = DMatrix::from_row_slice(2, 3, &[0.5, 0.5, 0.0, 0.2, 0.3, 0.5]);
        assert!(matches!(
            validate_stochastic_matrix(&a, "A"),
            Err(HmmError::DimensionMismatch { .. })
        ));

        let a = DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.4, 0.6]);
        assert!(validate_stochastic_matrix(&a, "A").is_ok());
    }

    #[test]
    fn test_error_display_formatting() {
        let err = HmmError::UnimplementedFamily {
            family: "NormalInverseWishart".to_string(),
            capability: "log_partition".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("NormalInverseWishart"));
        assert!(msg.contains("log_partition"));

        let err = HmmError::DegenerateDistribution { row: 3, sum: 0.0 };
        assert!(format!("{}", err).contains("row 3"));
    }

    #[test]
    fn test_em_error_carries_last_estimate() {
        let params = HmmParams::new(
            DVector::from_vec(vec![1.0]),
            DMatrix::from_element(1, 1, 1.0),
            vec![0.5_f64],
        )
        .unwrap();
        let err: EmError<f64> = EmError::NonConvergence {
            iterations: 7,
            last: Box::new(params),
        };
        assert!(err.is_convergence_failure());
        assert_eq!(err.last_params().map(|p| p.thetas[0]), Some(0.5));
        assert!(format!("{}", err).contains('7'));

        let wrapped: EmError<f64> = HmmError::InsufficientData {
            required: 1,
            actual: 0,
        }
        .into();
        assert!(!wrapped.is_convergence_failure());
        assert!(wrapped.last_params().is_none());
    }
}
