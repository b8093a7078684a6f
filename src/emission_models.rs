//! Exponential-family emission models.
//!
//! An emission family maps its parameters `theta` to natural parameters
//! `eta`, maps observations to sufficient statistics, and provides the log
//! partition function, so that `log p(y | theta) = <eta, T(y)> - logZ(eta)`.
//! The HMM machinery only ever talks to a family through
//! [`ExponentialFamily`]; it never looks inside `theta`.

use crate::{
    array_tuple::{inner, ArrayTuple},
    errors::{HmmError, HmmResult},
    fixed_point::{AllClose, Tolerance},
    math_utils::constants,
};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A family of emission distributions in exponential-family form.
pub trait ExponentialFamily {
    /// Parameters of one state's emission distribution.
    type Theta: Clone + fmt::Debug + AllClose;
    /// A single observation.
    type Observation;

    /// Family name used in error messages.
    fn name(&self) -> &'static str;

    /// Natural parameters of `theta`.
    fn eta(&self, theta: &Self::Theta) -> HmmResult<ArrayTuple>;

    /// Sufficient statistic of one observation.
    fn statistic(&self, y: &Self::Observation) -> HmmResult<ArrayTuple>;

    /// Log partition function at `eta`.
    fn log_partition(&self, eta: &ArrayTuple) -> HmmResult<f64>;

    /// Maximum-likelihood parameters from expected augmented statistics
    /// `(sum_t w_t T(y_t), sum_t w_t)`.
    fn max_likelihood(&self, expected: &ArrayTuple) -> HmmResult<Self::Theta>;

    /// `eta(theta) ++ (-logZ(eta(theta)))`.
    fn natural_params_augmented(&self, theta: &Self::Theta) -> HmmResult<ArrayTuple> {
        let eta = self.eta(theta)?;
        let log_z = self.log_partition(&eta)?;
        Ok(eta.augmented(-log_z))
    }

    /// `statistic(y) ++ (1)`.
    fn augmented_statistic(&self, y: &Self::Observation) -> HmmResult<ArrayTuple> {
        Ok(self.statistic(y)?.augmented(1.0))
    }

    /// `log p(y | theta)` via the augmented inner product.
    fn log_likelihood(&self, theta: &Self::Theta, y: &Self::Observation) -> HmmResult<f64> {
        inner(
            &self.natural_params_augmented(theta)?,
            &self.augmented_statistic(y)?,
        )
    }
}

fn cholesky_of(
    matrix: DMatrix<f64>,
    parameter: &str,
    reason: &str,
) -> HmmResult<Cholesky<f64, Dyn>> {
    Cholesky::new(matrix).ok_or_else(|| HmmError::SingularParameter {
        parameter: parameter.to_string(),
        reason: reason.to_string(),
    })
}

fn log_det_from_cholesky(chol: &Cholesky<f64, Dyn>) -> f64 {
    2.0 * chol.l().diagonal().iter().map(|x| x.ln()).sum::<f64>()
}

fn expect_square(m: &DMatrix<f64>, context: &str) -> HmmResult<usize> {
    if m.nrows() != m.ncols() {
        return Err(HmmError::DimensionMismatch {
            context: format!("{} must be square", context),
            expected: m.nrows(),
            actual: m.ncols(),
        });
    }
    Ok(m.nrows())
}

fn expect_parts(t: &ArrayTuple, expected: usize, context: &str) -> HmmResult<()> {
    if t.len() != expected {
        return Err(HmmError::DimensionMismatch {
            context: format!("{} parts", context),
            expected,
            actual: t.len(),
        });
    }
    Ok(())
}

/// Mean and covariance of a multivariate Gaussian.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GaussianParams {
    /// Mean vector (length D)
    pub mean: DVector<f64>,
    /// Covariance matrix (D x D, symmetric positive definite)
    pub covariance: DMatrix<f64>,
}

impl GaussianParams {
    /// Builds parameters, checking that the shapes agree.
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>) -> HmmResult<Self> {
        let dim = expect_square(&covariance, "covariance")?;
        if mean.len() != dim {
            return Err(HmmError::DimensionMismatch {
                context: "mean vs covariance".to_string(),
                expected: dim,
                actual: mean.len(),
            });
        }
        Ok(Self { mean, covariance })
    }

    /// Standard normal in `dim` dimensions.
    pub fn standard(dim: usize) -> Self {
        Self {
            mean: DVector::zeros(dim),
            covariance: DMatrix::identity(dim, dim),
        }
    }

    /// Dimension D.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }
}

impl AllClose for GaussianParams {
    fn all_close(&self, other: &Self, tol: Tolerance) -> bool {
        self.mean.all_close(&other.mean, tol) && self.covariance.all_close(&other.covariance, tol)
    }
}

/// Multivariate Gaussian emissions.
///
/// Natural parameters are `(-J/2, h)` with precision `J = Sigma^{-1}` and
/// `h = J mu`; the sufficient statistic is `(y y^T, y)`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Gaussian {
    /// Ridge added to the diagonal of maximum-likelihood covariances
    pub regularization: f64,
}

impl Gaussian {
    /// Gaussian family with exact maximum-likelihood updates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gaussian family that adds `epsilon * I` to every estimated covariance.
    ///
    /// `epsilon` must be finite and non-negative.
    pub fn with_regularization(epsilon: f64) -> HmmResult<Self> {
        let family = Self {
            regularization: epsilon,
        };
        family.validate()?;
        Ok(family)
    }

    fn validate(&self) -> HmmResult<()> {
        if !self.regularization.is_finite() || self.regularization < 0.0 {
            return Err(HmmError::InvalidParameter {
                parameter: "regularization".to_string(),
                value: self.regularization,
                constraint: "finite and >= 0".to_string(),
            });
        }
        Ok(())
    }
}

impl ExponentialFamily for Gaussian {
    type Theta = GaussianParams;
    type Observation = DVector<f64>;

    fn name(&self) -> &'static str {
        "Gaussian"
    }

    fn eta(&self, theta: &GaussianParams) -> HmmResult<ArrayTuple> {
        let chol = cholesky_of(
            theta.covariance.clone(),
            "covariance",
            "matrix is not positive definite",
        )?;
        let precision = chol.inverse();
        let h = &precision * &theta.mean;
        Ok(ArrayTuple::new(vec![
            precision * -0.5,
            ArrayTuple::vector_part(&h),
        ]))
    }

    fn statistic(&self, y: &DVector<f64>) -> HmmResult<ArrayTuple> {
        Ok(ArrayTuple::new(vec![
            y * y.transpose(),
            ArrayTuple::vector_part(y),
        ]))
    }

    /// `1/2 h^T J^{-1} h - 1/2 log|J| + D/2 log(2 pi)` with `J = -2 eta[0]`.
    fn log_partition(&self, eta: &ArrayTuple) -> HmmResult<f64> {
        expect_parts(eta, 2, "Gaussian natural parameters")?;
        let parts = eta.parts();
        let dim = expect_square(&parts[0], "Gaussian precision")?;
        if parts[1].len() != dim {
            return Err(HmmError::DimensionMismatch {
                context: "Gaussian potential vector".to_string(),
                expected: dim,
                actual: parts[1].len(),
            });
        }
        let precision = &parts[0] * -2.0;
        let h = DVector::from_column_slice(parts[1].as_slice());
        let chol = cholesky_of(precision, "precision", "matrix is not positive definite")?;
        let solved = chol.solve(&h);
        Ok(0.5 * h.dot(&solved) - 0.5 * log_det_from_cholesky(&chol)
            + 0.5 * dim as f64 * constants::LN_TWO_PI)
    }

    fn max_likelihood(&self, expected: &ArrayTuple) -> HmmResult<GaussianParams> {
        self.validate()?;
        expect_parts(expected, 3, "expected Gaussian statistics")?;
        let parts = expected.parts();
        let dim = expect_square(&parts[0], "expected outer products")?;
        let count = parts[2][(0, 0)];
        if !count.is_finite() || count <= 0.0 {
            return Err(HmmError::SingularParameter {
                parameter: "state occupancy".to_string(),
                reason: format!("expected count is {}", count),
            });
        }

        let mean = DVector::from_column_slice(parts[1].as_slice()) / count;
        let second_moment = &parts[0] / count;
        let mut covariance = second_moment - &mean * mean.transpose();
        covariance = (&covariance + covariance.transpose()) * 0.5;
        if self.regularization > 0.0 {
            covariance += DMatrix::identity(dim, dim) * self.regularization;
        }
        cholesky_of(
            covariance.clone(),
            "covariance",
            "estimated covariance is not positive definite",
        )?;
        GaussianParams::new(mean, covariance)
    }
}

/// Parameters of a Normal-Inverse-Wishart distribution over `(mu, Sigma)`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NiwParams {
    /// Scale matrix S
    pub scale: DMatrix<f64>,
    /// Location of the mean
    pub mean: DVector<f64>,
    /// Degrees of freedom nu
    pub dof: f64,
    /// Mean precision scaling kappa
    pub kappa: f64,
}

impl AllClose for NiwParams {
    fn all_close(&self, other: &Self, tol: Tolerance) -> bool {
        self.scale.all_close(&other.scale, tol)
            && self.mean.all_close(&other.mean, tol)
            && self.dof.all_close(&other.dof, tol)
            && self.kappa.all_close(&other.kappa, tol)
    }
}

/// Normal-Inverse-Wishart family, the conjugate prior of [`Gaussian`].
///
/// Observations are Gaussian parameters. Only the natural-parameter and
/// statistic maps are available; the log partition function and the
/// maximum-likelihood update fail with [`HmmError::UnimplementedFamily`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalInverseWishart;

impl NormalInverseWishart {
    fn unimplemented<T>(&self, capability: &str) -> HmmResult<T> {
        Err(HmmError::UnimplementedFamily {
            family: self.name().to_string(),
            capability: capability.to_string(),
        })
    }
}

impl ExponentialFamily for NormalInverseWishart {
    type Theta = NiwParams;
    type Observation = GaussianParams;

    fn name(&self) -> &'static str {
        "NormalInverseWishart"
    }

    /// `(S + mu mu^T / kappa, mu / kappa, 1 / kappa, nu)`.
    fn eta(&self, theta: &NiwParams) -> HmmResult<ArrayTuple> {
        if !theta.kappa.is_finite() || theta.kappa <= 0.0 {
            return Err(HmmError::InvalidParameter {
                parameter: "kappa".to_string(),
                value: theta.kappa,
                constraint: "> 0".to_string(),
            });
        }
        let dim = expect_square(&theta.scale, "NIW scale")?;
        if theta.mean.len() != dim {
            return Err(HmmError::DimensionMismatch {
                context: "NIW mean vs scale".to_string(),
                expected: dim,
                actual: theta.mean.len(),
            });
        }
        let outer = &theta.mean * theta.mean.transpose() / theta.kappa;
        Ok(ArrayTuple::new(vec![
            &theta.scale + outer,
            ArrayTuple::vector_part(&(&theta.mean / theta.kappa)),
            ArrayTuple::scalar_part(1.0 / theta.kappa),
            ArrayTuple::scalar_part(theta.dof),
        ]))
    }

    /// The Gaussian's own natural parameters with its normalizer split in two:
    /// `(-J/2, h, -1/2 h^T J^{-1} h, 1/2 log|J|)`.
    fn statistic(&self, y: &GaussianParams) -> HmmResult<ArrayTuple> {
        let gaussian = Gaussian::new();
        let eta = gaussian.eta(y)?;
        let parts = eta.parts();
        let precision = &parts[0] * -2.0;
        let h = DVector::from_column_slice(parts[1].as_slice());
        let chol = cholesky_of(precision, "precision", "matrix is not positive definite")?;
        let quadratic = h.dot(&chol.solve(&h));
        Ok(ArrayTuple::new(vec![
            parts[0].clone(),
            parts[1].clone(),
            ArrayTuple::scalar_part(-0.5 * quadratic),
            ArrayTuple::scalar_part(0.5 * log_det_from_cholesky(&chol)),
        ]))
    }

    fn log_partition(&self, _eta: &ArrayTuple) -> HmmResult<f64> {
        self.unimplemented("log_partition")
    }

    fn max_likelihood(&self, _expected: &ArrayTuple) -> HmmResult<NiwParams> {
        self.unimplemented("max_likelihood")
    }
}
