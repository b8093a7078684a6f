//! Random initial parameter tuples for EM.
//!
//! All randomness flows through a caller-supplied RNG, or a
//! [`ChaCha20Rng`] seeded from a `u64`, so initializations are reproducible.

use crate::{
    emission_models::GaussianParams,
    errors::{HmmError, HmmResult},
    hmm_core::HmmParams,
};
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::StandardNormal;

/// ChaCha20 generator seeded from `seed`.
pub fn seeded_rng(seed: u64) -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(seed)
}

/// Uniform(0, 1) draws normalized to sum to one.
pub fn random_probability_vector<R: Rng>(n: usize, rng: &mut R) -> DVector<f64> {
    // Open interval keeps the sum strictly positive
    let raw = DVector::from_fn(n, |_, _| rng.gen_range(f64::EPSILON..1.0));
    let sum = raw.sum();
    raw / sum
}

/// Row-stochastic matrix with independently drawn rows.
pub fn random_transition_matrix<R: Rng>(n: usize, rng: &mut R) -> DMatrix<f64> {
    let mut a = DMatrix::zeros(n, n);
    for i in 0..n {
        let row = random_probability_vector(n, &mut *rng);
        a.set_row(i, &row.transpose());
    }
    a
}

/// Gaussian with a standard-normal mean and identity covariance.
pub fn random_gaussian_params<R: Rng>(dim: usize, rng: &mut R) -> GaussianParams {
    GaussianParams {
        mean: DVector::from_fn(dim, |_, _| rng.sample(StandardNormal)),
        covariance: DMatrix::identity(dim, dim),
    }
}

/// Random Gaussian HMM with `num_states` states over `dim`-dimensional data.
pub fn random_gaussian_hmm_with<R: Rng>(
    num_states: usize,
    dim: usize,
    rng: &mut R,
) -> HmmResult<HmmParams<GaussianParams>> {
    for (name, value) in [("num_states", num_states), ("dim", dim)] {
        if value == 0 {
            return Err(HmmError::InvalidParameter {
                parameter: name.to_string(),
                value: 0.0,
                constraint: ">= 1".to_string(),
            });
        }
    }
    let pi = random_probability_vector(num_states, rng);
    let a = random_transition_matrix(num_states, rng);
    let thetas = (0..num_states)
        .map(|_| random_gaussian_params(dim, &mut *rng))
        .collect();
    HmmParams::new(pi, a, thetas)
}

/// Seeded variant of [`random_gaussian_hmm_with`].
///
/// # Example
/// ```rust
/// use expfam_hmm::initialization::random_gaussian_hmm;
///
/// let a = random_gaussian_hmm(3, 2, 7).unwrap();
/// let b = random_gaussian_hmm(3, 2, 7).unwrap();
/// assert_eq!(a, b);
/// assert!(a.validate_distributions().is_ok());
/// ```
pub fn random_gaussian_hmm(
    num_states: usize,
    dim: usize,
    seed: u64,
) -> HmmResult<HmmParams<GaussianParams>> {
    random_gaussian_hmm_with(num_states, dim, &mut seeded_rng(seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_random_distributions_are_valid() {
        let mut rng = seeded_rng(11);
        let p = random_probability_vector(5, &mut rng);
        assert_approx_eq!(p.sum(), 1.0, 1e-12);
        assert!(p.iter().all(|&x| x > 0.0));

        let a = random_transition_matrix(4, &mut rng);
        for row in a.row_iter() {
            assert_approx_eq!(row.sum(), 1.0, 1e-12);
        }
    }

    #[test]
    fn test_seed_controls_output() {
        let a = random_gaussian_hmm(2, 3, 1).unwrap();
        let b = random_gaussian_hmm(2, 3, 2).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.thetas[0].dim(), 3);
        assert_eq!(a.thetas[1].covariance, DMatrix::identity(3, 3));
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(matches!(
            random_gaussian_hmm(0, 2, 0),
            Err(HmmError::InvalidParameter { .. })
        ));
        assert!(random_gaussian_hmm(2, 0, 0).is_err());
    }
}
