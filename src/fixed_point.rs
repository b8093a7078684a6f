//! Approximate equality of nested numeric structures and a fixed-point driver.
//!
//! [`same`] follows `allclose` semantics: two finite numbers are close when
//! `|a - b| <= atol + rtol * |b|`, exactly equal values (including matching
//! infinities) are close, and NaN is never close to anything. Containers are
//! close when their shapes agree and every leaf is close.

use nalgebra::{DMatrix, DVector};
use std::ops::ControlFlow;

/// Relative and absolute tolerance for [`same`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tolerance {
    /// Relative tolerance, scaled by the magnitude of the second argument
    pub rtol: f64,
    /// Absolute tolerance
    pub atol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            rtol: 1e-5,
            atol: 1e-8,
        }
    }
}

impl Tolerance {
    /// Tolerance with the given relative part and the default absolute part.
    pub fn relative(rtol: f64) -> Self {
        Self {
            rtol,
            ..Self::default()
        }
    }
}

/// Deep approximate equality.
pub trait AllClose {
    /// Whether `self` is close to `other` under `tol`.
    fn all_close(&self, other: &Self, tol: Tolerance) -> bool;
}

impl AllClose for f64 {
    fn all_close(&self, other: &Self, tol: Tolerance) -> bool {
        if self == other {
            return true;
        }
        if !self.is_finite() || !other.is_finite() {
            return false;
        }
        (self - other).abs() <= tol.atol + tol.rtol * other.abs()
    }
}

fn slices_close(a: &[f64], b: &[f64], tol: Tolerance) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.all_close(y, tol))
}

impl AllClose for DMatrix<f64> {
    fn all_close(&self, other: &Self, tol: Tolerance) -> bool {
        self.shape() == other.shape() && slices_close(self.as_slice(), other.as_slice(), tol)
    }
}

impl AllClose for DVector<f64> {
    fn all_close(&self, other: &Self, tol: Tolerance) -> bool {
        slices_close(self.as_slice(), other.as_slice(), tol)
    }
}

impl<T: AllClose> AllClose for Vec<T> {
    fn all_close(&self, other: &Self, tol: Tolerance) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.all_close(b, tol))
    }
}

impl<A: AllClose, B: AllClose> AllClose for (A, B) {
    fn all_close(&self, other: &Self, tol: Tolerance) -> bool {
        self.0.all_close(&other.0, tol) && self.1.all_close(&other.1, tol)
    }
}

impl<A: AllClose, B: AllClose, C: AllClose> AllClose for (A, B, C) {
    fn all_close(&self, other: &Self, tol: Tolerance) -> bool {
        self.0.all_close(&other.0, tol)
            && self.1.all_close(&other.1, tol)
            && self.2.all_close(&other.2, tol)
    }
}

impl AllClose for crate::array_tuple::ArrayTuple {
    fn all_close(&self, other: &Self, tol: Tolerance) -> bool {
        self.shape_matches(other) && slices_close(&self.flatten(), &other.flatten(), tol)
    }
}

/// Whether `a` and `b` are approximately equal under `tol`.
///
/// # Example
/// ```rust
/// use expfam_hmm::fixed_point::{same, Tolerance};
///
/// assert!(same(&(1.0, vec![2.0, 3.0]), &(1.0 + 1e-9, vec![2.0, 3.0]), Tolerance::default()));
/// assert!(!same(&f64::NAN, &f64::NAN, Tolerance::default()));
/// ```
pub fn same<T: AllClose>(a: &T, b: &T, tol: Tolerance) -> bool {
    a.all_close(b, tol)
}

/// A value at which iteration stopped.
#[derive(Debug, Clone)]
pub struct FixedPoint<T> {
    /// Final iterate
    pub value: T,
    /// Number of step applications
    pub iterations: usize,
    /// True when the step function asked to stop before `same` held
    pub stopped_early: bool,
}

/// Failure of [`fixed_point`].
#[derive(Debug, Clone)]
pub enum FixedPointError<T, E> {
    /// The iteration budget ran out; `last` is the final iterate.
    Budget {
        /// Step applications performed
        iterations: usize,
        /// Final iterate
        last: T,
    },
    /// The step function failed.
    Step(E),
}

/// Iterates `step` from `x0` until two consecutive iterates are [`same`].
///
/// `step` receives the current iterate and the 1-based iteration number. It
/// returns `ControlFlow::Continue(next)` to proceed, or `ControlFlow::Break(v)`
/// to stop immediately with `v`. On convergence the newer iterate is returned.
/// At most `max_iterations` steps are taken.
pub fn fixed_point<T, E, F>(
    x0: T,
    tol: Tolerance,
    max_iterations: usize,
    mut step: F,
) -> Result<FixedPoint<T>, FixedPointError<T, E>>
where
    T: AllClose,
    F: FnMut(&T, usize) -> Result<ControlFlow<T, T>, E>,
{
    let mut current = x0;
    for iteration in 1..=max_iterations {
        match step(&current, iteration).map_err(FixedPointError::Step)? {
            ControlFlow::Break(value) => {
                return Ok(FixedPoint {
                    value,
                    iterations: iteration,
                    stopped_early: true,
                })
            }
            ControlFlow::Continue(next) => {
                if same(&current, &next, tol) {
                    return Ok(FixedPoint {
                        value: next,
                        iterations: iteration,
                        stopped_early: false,
                    });
                }
                current = next;
            }
        }
    }
    Err(FixedPointError::Budget {
        iterations: max_iterations,
        last: current,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_scalar_closeness() {
        let tol = Tolerance::default();
        assert!(1.0_f64.all_close(&(1.0 + 5e-6), tol));
        assert!(!1.0_f64.all_close(&1.001, tol));
        assert!(f64::INFINITY.all_close(&f64::INFINITY, tol));
        assert!(!f64::INFINITY.all_close(&f64::NEG_INFINITY, tol));
        assert!(!f64::NAN.all_close(&1.0, tol));
        // atol dominates near zero
        assert!(0.0_f64.all_close(&5e-9, tol));
    }

    #[test]
    fn test_shape_mismatch_is_not_close() {
        let tol = Tolerance::default();
        let a = DMatrix::<f64>::zeros(2, 3);
        let b = DMatrix::<f64>::zeros(3, 2);
        assert!(!same(&a, &b, tol));
        assert!(!same(&vec![1.0], &vec![1.0, 1.0], tol));
    }

    #[test]
    fn test_fixed_point_converges_to_sqrt_two() {
        // Newton iteration for sqrt(2)
        let result = fixed_point::<f64, (), _>(1.0, Tolerance::default(), 100, |x, _| {
            Ok(ControlFlow::Continue(0.5 * (x + 2.0 / x)))
        })
        .unwrap();
        assert_approx_eq!(result.value, 2f64.sqrt(), 1e-10);
        assert!(!result.stopped_early);
        assert!(result.iterations < 10);
    }

    #[test]
    fn test_fixed_point_budget_and_break() {
        let result = fixed_point::<f64, (), _>(0.0, Tolerance::default(), 5, |x, _| {
            Ok(ControlFlow::Continue(x + 1.0))
        });
        match result {
            Err(FixedPointError::Budget { iterations, last }) => {
                assert_eq!(iterations, 5);
                assert_eq!(last, 5.0);
            }
            _ => panic!("Expected Budget error"),
        }

        let result = fixed_point::<f64, (), _>(0.0, Tolerance::default(), 5, |x, it| {
            if it == 3 {
                Ok(ControlFlow::Break(*x))
            } else {
                Ok(ControlFlow::Continue(x + 1.0))
            }
        })
        .unwrap();
        assert!(result.stopped_early);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.value, 2.0);
    }

    #[test]
    fn test_fixed_point_propagates_step_error() {
        let result = fixed_point::<f64, &str, _>(0.0, Tolerance::default(), 5, |_, _| Err("boom"));
        assert!(matches!(result, Err(FixedPointError::Step("boom"))));
    }
}
