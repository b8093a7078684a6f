//! Posterior smoothing and most-likely-path decoding.
//!
//! These run the classical log-space forward-backward and Viterbi
//! recursions directly, with the same state convention as
//! [`hmm_core`](crate::hmm_core): a non-emitting initial state `z_0 ~ pi`
//! followed by one transition per observation.

use crate::{
    array_tuple::{inner, ArrayTuple},
    errors::{HmmError, HmmResult},
    hmm_core::{ExpectedStats, NaturalParams},
    math_utils::log_sum_exp,
};
use nalgebra::{DMatrix, DVector};

/// Per-state log-likelihoods `ll[(t, k)] = <eta_k, stat_t>` as a `T x N` matrix.
pub fn state_log_likelihoods(
    natural: &NaturalParams,
    stats: &[ArrayTuple],
) -> HmmResult<DMatrix<f64>> {
    let n = natural.num_states();
    let mut ll = DMatrix::zeros(stats.len(), n);
    for (t, stat) in stats.iter().enumerate() {
        for (k, eta) in natural.etas.iter().enumerate() {
            ll[(t, k)] = inner(eta, stat)?;
        }
    }
    Ok(ll)
}

fn check_transition_shape(natural: &NaturalParams) -> HmmResult<usize> {
    let n = natural.num_states();
    if natural.log_a.nrows() != n || natural.log_a.ncols() != n || natural.etas.len() != n {
        return Err(HmmError::DimensionMismatch {
            context: "natural parameters".to_string(),
            expected: n,
            actual: natural.log_a.nrows(),
        });
    }
    Ok(n)
}

/// Smoothed posteriors of an observation sequence.
#[derive(Debug, Clone)]
pub struct Posterior {
    /// `P(z_0 = i | y)`
    pub initial: DVector<f64>,
    /// `states[(t, k)] = P(z_{t+1} = k | y)` for the emitting states
    pub states: DMatrix<f64>,
    /// Expected transition counts `sum_t P(z_t = i, z_{t+1} = j | y)`
    pub transitions: DMatrix<f64>,
    /// `log p(y)`
    pub log_likelihood: f64,
}

impl Posterior {
    /// Expected sufficient statistics implied by these posteriors.
    ///
    /// `stats` must be the augmented statistics the posterior was computed
    /// from; the per-state shapes are taken from `natural.etas`.
    pub fn expected_statistics(
        &self,
        natural: &NaturalParams,
        stats: &[ArrayTuple],
    ) -> HmmResult<ExpectedStats> {
        let mut obs: Vec<ArrayTuple> = natural.etas.iter().map(ArrayTuple::zeros_like).collect();
        for (t, stat) in stats.iter().enumerate() {
            for (k, acc) in obs.iter_mut().enumerate() {
                acc.scaled_add(self.states[(t, k)], stat)?;
            }
        }
        Ok(ExpectedStats {
            init: self.initial.clone(),
            trans: self.transitions.clone(),
            obs,
            log_likelihood: self.log_likelihood,
        })
    }

    /// Most probable state at each time step under the marginals.
    pub fn most_probable_states(&self) -> Vec<usize> {
        self.states
            .row_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (k, &p)| {
                        if p > best.1 {
                            (k, p)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect()
    }
}

/// Log-space forward-backward smoothing.
///
/// A sequence with zero likelihood yields all-zero posteriors and a
/// log-likelihood of `-inf`.
pub fn forward_backward(natural: &NaturalParams, stats: &[ArrayTuple]) -> HmmResult<Posterior> {
    let n = check_transition_shape(natural)?;
    let ll = state_log_likelihoods(natural, stats)?;
    let steps = stats.len();
    let log_a = &natural.log_a;

    // Row t holds log p(y_1..t, z_t)
    let mut log_alpha = DMatrix::from_element(steps + 1, n, f64::NEG_INFINITY);
    log_alpha.set_row(0, &natural.log_pi.transpose());
    let mut buf = vec![0.0; n];
    for t in 1..=steps {
        for j in 0..n {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = log_alpha[(t - 1, i)] + log_a[(i, j)];
            }
            log_alpha[(t, j)] = log_sum_exp(&buf) + ll[(t - 1, j)];
        }
    }

    // Row t holds log p(y_{t+1}..T | z_t)
    let mut log_beta = DMatrix::zeros(steps + 1, n);
    for t in (0..steps).rev() {
        for i in 0..n {
            for (j, b) in buf.iter_mut().enumerate() {
                *b = log_a[(i, j)] + ll[(t, j)] + log_beta[(t + 1, j)];
            }
            log_beta[(t, i)] = log_sum_exp(&buf);
        }
    }

    let final_row: Vec<f64> = log_alpha.row(steps).iter().copied().collect();
    let log_likelihood = log_sum_exp(&final_row);
    if !log_likelihood.is_finite() {
        return Ok(Posterior {
            initial: DVector::zeros(n),
            states: DMatrix::zeros(steps, n),
            transitions: DMatrix::zeros(n, n),
            log_likelihood,
        });
    }

    let initial = DVector::from_fn(n, |i, _| {
        (log_alpha[(0, i)] + log_beta[(0, i)] - log_likelihood).exp()
    });
    let states = DMatrix::from_fn(steps, n, |t, k| {
        (log_alpha[(t + 1, k)] + log_beta[(t + 1, k)] - log_likelihood).exp()
    });
    let mut transitions = DMatrix::zeros(n, n);
    for t in 0..steps {
        for i in 0..n {
            for j in 0..n {
                transitions[(i, j)] += (log_alpha[(t, i)]
                    + log_a[(i, j)]
                    + ll[(t, j)]
                    + log_beta[(t + 1, j)]
                    - log_likelihood)
                    .exp();
            }
        }
    }

    Ok(Posterior {
        initial,
        states,
        transitions,
        log_likelihood,
    })
}

/// Most likely sequence of emitting states and its joint log-probability.
pub fn viterbi(natural: &NaturalParams, stats: &[ArrayTuple]) -> HmmResult<(Vec<usize>, f64)> {
    if stats.is_empty() {
        return Err(HmmError::InsufficientData {
            required: 1,
            actual: 0,
        });
    }
    let n = check_transition_shape(natural)?;
    let ll = state_log_likelihoods(natural, stats)?;
    let steps = stats.len();

    let mut delta: Vec<f64> = natural.log_pi.iter().copied().collect();
    let mut psi = vec![vec![0usize; n]; steps];
    for t in 0..steps {
        let mut next = vec![f64::NEG_INFINITY; n];
        for j in 0..n {
            let mut max_val = f64::NEG_INFINITY;
            let mut max_idx = 0;
            for (i, &d) in delta.iter().enumerate() {
                let val = d + natural.log_a[(i, j)];
                if val > max_val {
                    max_val = val;
                    max_idx = i;
                }
            }
            next[j] = max_val + ll[(t, j)];
            psi[t][j] = max_idx;
        }
        delta = next;
    }

    let (mut state, best) = delta
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (j, &d)| {
            if d > best.1 {
                (j, d)
            } else {
                best
            }
        });

    // Backtrack; psi[0] points at z_0, which is not reported
    let mut path = vec![0; steps];
    for t in (0..steps).rev() {
        path[t] = state;
        state = psi[t][state];
    }
    Ok((path, best))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emission_models::{Gaussian, GaussianParams};
    use crate::hmm_core::{augmented_statistics, hmm_log_partition_function, natural_params, HmmParams};
    use assert_approx_eq::assert_approx_eq;

    fn setup(ys: &[f64]) -> (NaturalParams, Vec<ArrayTuple>) {
        let g = Gaussian::new();
        let params = HmmParams::new(
            DVector::from_vec(vec![0.5, 0.5]),
            DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.1, 0.9]),
            vec![
                GaussianParams::new(DVector::from_vec(vec![-2.0]), DMatrix::from_element(1, 1, 1.0))
                    .unwrap(),
                GaussianParams::new(DVector::from_vec(vec![2.0]), DMatrix::from_element(1, 1, 1.0))
                    .unwrap(),
            ],
        )
        .unwrap();
        let data: Vec<DVector<f64>> = ys.iter().map(|&y| DVector::from_vec(vec![y])).collect();
        (
            natural_params(&g, &params).unwrap(),
            augmented_statistics(&g, &data).unwrap(),
        )
    }

    #[test]
    fn test_forward_backward_likelihood_matches_partition_function() {
        let (natural, stats) = setup(&[-1.5, -2.2, 1.8, 2.5, 0.1]);
        let posterior = forward_backward(&natural, &stats).unwrap();
        let log_z = hmm_log_partition_function(&natural, &stats).unwrap();
        assert_approx_eq!(posterior.log_likelihood, log_z, 1e-10);
    }

    #[test]
    fn test_posteriors_are_normalized() {
        let (natural, stats) = setup(&[-1.5, -2.2, 1.8, 2.5, 0.1]);
        let posterior = forward_backward(&natural, &stats).unwrap();
        assert_approx_eq!(posterior.initial.sum(), 1.0, 1e-10);
        for row in posterior.states.row_iter() {
            assert_approx_eq!(row.sum(), 1.0, 1e-10);
        }
        assert_approx_eq!(posterior.transitions.sum(), 5.0, 1e-10);
    }

    #[test]
    fn test_viterbi_follows_well_separated_clusters() {
        let (natural, stats) = setup(&[-2.1, -1.9, -2.3, 2.2, 1.7, 2.0]);
        let (path, log_joint) = viterbi(&natural, &stats).unwrap();
        assert_eq!(path, vec![0, 0, 0, 1, 1, 1]);
        let log_z = hmm_log_partition_function(&natural, &stats).unwrap();
        assert!(log_joint <= log_z + 1e-12);

        let posterior = forward_backward(&natural, &stats).unwrap();
        assert_eq!(posterior.most_probable_states(), path);
    }

    #[test]
    fn test_viterbi_rejects_empty_sequence() {
        let (natural, _) = setup(&[0.0]);
        assert!(matches!(
            viterbi(&natural, &[]),
            Err(HmmError::InsufficientData { required: 1, actual: 0 })
        ));
    }

    #[test]
    fn test_zero_likelihood_gives_zero_posteriors() {
        let (mut natural, stats) = setup(&[0.5, 0.2]);
        natural.log_pi = DVector::from_element(2, f64::NEG_INFINITY);
        let posterior = forward_backward(&natural, &stats).unwrap();
        assert_eq!(posterior.log_likelihood, f64::NEG_INFINITY);
        assert_eq!(posterior.states.sum(), 0.0);
    }
}
