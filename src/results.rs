//! # EM Results
//!
//! Outcome of a successful EM run: the fitted parameter tuple together with
//! the log-likelihood trace and the reason the loop stopped.

use crate::hmm_core::HmmParams;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Why an EM run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StopReason {
    /// Two successive parameter tuples were numerically indistinguishable
    FixedPoint,
    /// The log-likelihood improvement fell below `min_improvement`
    LikelihoodPlateau,
}

/// Result of a successful EM run.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EmOutcome<T> {
    /// Fitted parameters
    pub params: HmmParams<T>,
    /// Number of EM updates applied
    pub iterations: usize,
    /// Log-likelihood of the data before each update, in order
    pub log_likelihood_trace: Vec<f64>,
    /// Stopping condition that ended the run
    pub stop_reason: StopReason,
}

impl<T> EmOutcome<T> {
    /// Last recorded log-likelihood, or `-inf` if nothing was recorded.
    pub fn final_log_likelihood(&self) -> f64 {
        self.log_likelihood_trace
            .last()
            .copied()
            .unwrap_or(f64::NEG_INFINITY)
    }

    /// Whether the trace never decreases by more than `slack` relative to
    /// the magnitude of the previous value.
    pub fn is_monotone(&self, slack: f64) -> bool {
        self.log_likelihood_trace
            .windows(2)
            .all(|w| w[1] >= w[0] - slack * w[0].abs().max(1.0))
    }

    /// Whether the run ended at an exact fixed point.
    pub fn reached_fixed_point(&self) -> bool {
        self.stop_reason == StopReason::FixedPoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, DVector};

    fn outcome(trace: Vec<f64>) -> EmOutcome<f64> {
        EmOutcome {
            params: HmmParams::new(DVector::from_vec(vec![1.0]), DMatrix::identity(1, 1), vec![0.0])
                .unwrap(),
            iterations: trace.len(),
            log_likelihood_trace: trace,
            stop_reason: StopReason::FixedPoint,
        }
    }

    #[test]
    fn test_monotone_trace() {
        let o = outcome(vec![-10.0, -8.0, -7.5, -7.5]);
        assert!(o.is_monotone(1e-8));
        assert_eq!(o.final_log_likelihood(), -7.5);
        assert!(o.reached_fixed_point());

        let o = outcome(vec![-10.0, -8.0, -9.0]);
        assert!(!o.is_monotone(1e-8));
    }

    #[test]
    fn test_empty_trace() {
        let o = outcome(vec![]);
        assert_eq!(o.final_log_likelihood(), f64::NEG_INFINITY);
        assert!(o.is_monotone(0.0));
    }
}
