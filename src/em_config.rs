//! # EM Configuration
//!
//! Iteration budget, convergence tolerance and the policies applied to
//! degenerate or non-finite intermediate values.

use crate::{
    errors::{HmmError, HmmResult},
    fixed_point::Tolerance,
    math_utils::constants,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What normalization does with a row whose expected counts sum to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DegenerateRowPolicy {
    /// Replace the row with a uniform distribution (default)
    #[default]
    Uniform,
    /// Divide by one instead of zero, leaving the zero row as it is
    LeaveUnchanged,
    /// Report [`HmmError::DegenerateDistribution`]
    Fail,
}

/// How non-finite values during EM are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NumericMode {
    /// A non-finite log-likelihood or NaN in expected statistics or updated `pi`/`A` is an error
    #[default]
    Strict,
    /// Only a `-inf` log-likelihood stops the run
    Permissive,
}

/// Configuration of an EM run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EmConfig {
    /// Maximum number of EM updates before giving up
    pub max_iterations: usize,
    /// Tolerance of the fixed-point test on successive parameter tuples
    pub tolerance: Tolerance,
    /// Stop once the log-likelihood improves by less than this (absolute)
    pub min_improvement: Option<f64>,
    /// Relative decrease in log-likelihood tolerated before warning
    pub monotonicity_slack: f64,
    /// Handling of zero-mass rows in the M-step
    pub degenerate_rows: DegenerateRowPolicy,
    /// Handling of non-finite values
    pub numeric_mode: NumericMode,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self::strict()
    }
}

impl EmConfig {
    /// Default iteration budget.
    pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

    /// Strict configuration: fixed-point stopping only, NaN is fatal.
    pub fn strict() -> Self {
        Self {
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            tolerance: Tolerance::default(),
            min_improvement: None,
            monotonicity_slack: constants::MONOTONICITY_SLACK,
            degenerate_rows: DegenerateRowPolicy::Uniform,
            numeric_mode: NumericMode::Strict,
        }
    }

    /// Permissive configuration: zero rows are left as they are and NaN is
    /// carried along rather than reported.
    pub fn permissive() -> Self {
        Self {
            degenerate_rows: DegenerateRowPolicy::LeaveUnchanged,
            numeric_mode: NumericMode::Permissive,
            ..Self::strict()
        }
    }

    /// Sets the iteration budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the fixed-point tolerance.
    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Enables the log-likelihood plateau stop.
    pub fn with_min_improvement(mut self, min_improvement: f64) -> Self {
        self.min_improvement = Some(min_improvement);
        self
    }

    /// Sets the degenerate-row policy.
    pub fn with_degenerate_rows(mut self, policy: DegenerateRowPolicy) -> Self {
        self.degenerate_rows = policy;
        self
    }

    /// Sets the numeric mode.
    pub fn with_numeric_mode(mut self, mode: NumericMode) -> Self {
        self.numeric_mode = mode;
        self
    }

    /// Checks that every setting is usable.
    pub fn validate(&self) -> HmmResult<()> {
        if self.max_iterations == 0 {
            return Err(HmmError::InvalidParameter {
                parameter: "max_iterations".to_string(),
                value: 0.0,
                constraint: ">= 1".to_string(),
            });
        }
        let tolerances = [
            ("tolerance.rtol", self.tolerance.rtol),
            ("tolerance.atol", self.tolerance.atol),
            ("monotonicity_slack", self.monotonicity_slack),
        ];
        for (name, value) in tolerances {
            if !value.is_finite() || value < 0.0 {
                return Err(HmmError::InvalidParameter {
                    parameter: name.to_string(),
                    value,
                    constraint: "finite and >= 0".to_string(),
                });
            }
        }
        if let Some(min) = self.min_improvement {
            if !min.is_finite() || min <= 0.0 {
                return Err(HmmError::InvalidParameter {
                    parameter: "min_improvement".to_string(),
                    value: min,
                    constraint: "finite and > 0".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Whether NaN values are errors.
    pub fn is_strict(&self) -> bool {
        self.numeric_mode == NumericMode::Strict
    }
}
