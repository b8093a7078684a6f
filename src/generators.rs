//! Synthetic Gaussian-HMM sequences for testing and validation.

use crate::{
    emission_models::GaussianParams,
    errors::{HmmError, HmmResult},
    hmm_core::HmmParams,
};
use nalgebra::{Cholesky, DVector};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use rand_distr::StandardNormal;

/// A sampled hidden path together with its observations.
#[derive(Debug, Clone)]
pub struct SampledSequence {
    /// Emitting states `z_1..z_T`
    pub states: Vec<usize>,
    /// Observations `y_1..y_T`
    pub observations: Vec<DVector<f64>>,
}

fn weighted_index(weights: impl Iterator<Item = f64>, name: &str) -> HmmResult<WeightedIndex<f64>> {
    let weights: Vec<f64> = weights.collect();
    WeightedIndex::new(&weights).map_err(|e| HmmError::InvalidParameter {
        parameter: name.to_string(),
        value: weights.iter().sum(),
        constraint: format!("valid sampling weights ({})", e),
    })
}

/// Draws `length` observations from a Gaussian HMM.
///
/// `z_0` is drawn from `pi` and every observation follows one transition,
/// matching the convention of the likelihood computations.
pub fn sample_gaussian_hmm<R: Rng>(
    params: &HmmParams<GaussianParams>,
    length: usize,
    rng: &mut R,
) -> HmmResult<SampledSequence> {
    let initial = weighted_index(params.pi.iter().copied(), "pi")?;
    let rows = (0..params.num_states())
        .map(|i| weighted_index(params.a.row(i).iter().copied(), &format!("A[{}]", i)))
        .collect::<HmmResult<Vec<_>>>()?;
    let factors = params
        .thetas
        .iter()
        .map(|theta| {
            Cholesky::new(theta.covariance.clone())
                .map(|c| c.l())
                .ok_or_else(|| HmmError::SingularParameter {
                    parameter: "covariance".to_string(),
                    reason: "matrix is not positive definite".to_string(),
                })
        })
        .collect::<HmmResult<Vec<_>>>()?;

    let mut state = initial.sample(&mut *rng);
    let mut states = Vec::with_capacity(length);
    let mut observations = Vec::with_capacity(length);
    for _ in 0..length {
        state = rows[state].sample(&mut *rng);
        let theta = &params.thetas[state];
        let z: DVector<f64> = DVector::from_fn(theta.dim(), |_, _| StandardNormal.sample(&mut *rng));
        observations.push(&theta.mean + &factors[state] * z);
        states.push(state);
    }
    Ok(SampledSequence {
        states,
        observations,
    })
}
