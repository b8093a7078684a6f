//! HMM parameters, the log partition function and the EM steps.
//!
//! The state `z_0` drawn from `pi` emits nothing; every observation `y_t`
//! (t = 1..T) is preceded by one transition through `A`. The forward
//! recursion
//!
//! ```text
//! log_alpha_0     = log_pi
//! log_alpha_t[j]  = logsumexp_i(log_alpha_{t-1}[i] + log_A[i, j]) + ll_t[j]
//! log Z           = logsumexp_j(log_alpha_T[j])
//! ```
//!
//! with `ll_t[k] = <eta_k ++ (-logZ_k), T(y_t) ++ (1)>` is the exact data
//! log-likelihood. Its gradient with respect to `(log_pi, log_A, etas)` is
//! the vector of expected sufficient statistics, which is how the E-step is
//! computed here: the recursion is recorded on an [`autodiff::Tape`] and
//! differentiated.
//!
//! [`autodiff::Tape`]: crate::autodiff::Tape

use crate::{
    array_tuple::ArrayTuple,
    autodiff::{Evaluate, Recorder, Tape},
    em_config::DegenerateRowPolicy,
    emission_models::ExponentialFamily,
    errors::{validate_probability_vector, validate_stochastic_matrix, HmmError, HmmResult},
    fixed_point::{AllClose, Tolerance},
    math_utils::{ln_matrix, ln_vector, normalize_rows, normalize_vector},
};
use nalgebra::{DMatrix, DVector};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Parameters of an HMM with `N` states: initial distribution, row-stochastic
/// transition matrix and one emission parameter per state.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HmmParams<T> {
    /// Initial state distribution (length N)
    pub pi: DVector<f64>,
    /// Transition matrix, `a[(i, j)] = P(z_{t+1} = j | z_t = i)`
    pub a: DMatrix<f64>,
    /// Emission parameters, one per state
    pub thetas: Vec<T>,
}

impl<T> HmmParams<T> {
    /// Builds a parameter tuple, checking that all shapes agree with `N = pi.len()`.
    pub fn new(pi: DVector<f64>, a: DMatrix<f64>, thetas: Vec<T>) -> HmmResult<Self> {
        let n = pi.len();
        if n == 0 {
            return Err(HmmError::InvalidParameter {
                parameter: "num_states".to_string(),
                value: 0.0,
                constraint: ">= 1".to_string(),
            });
        }
        if a.nrows() != n || a.ncols() != n {
            return Err(HmmError::DimensionMismatch {
                context: "transition matrix vs initial distribution".to_string(),
                expected: n,
                actual: if a.nrows() != n { a.nrows() } else { a.ncols() },
            });
        }
        if thetas.len() != n {
            return Err(HmmError::DimensionMismatch {
                context: "emission parameters per state".to_string(),
                expected: n,
                actual: thetas.len(),
            });
        }
        Ok(Self { pi, a, thetas })
    }

    /// Number of hidden states.
    pub fn num_states(&self) -> usize {
        self.pi.len()
    }

    /// Checks that `pi` and every row of `a` are probability distributions.
    pub fn validate_distributions(&self) -> HmmResult<()> {
        validate_probability_vector(&self.pi, "pi")?;
        validate_stochastic_matrix(&self.a, "A")
    }
}

impl<T: AllClose> AllClose for HmmParams<T> {
    fn all_close(&self, other: &Self, tol: Tolerance) -> bool {
        self.pi.all_close(&other.pi, tol)
            && self.a.all_close(&other.a, tol)
            && self.thetas.all_close(&other.thetas, tol)
    }
}

/// Natural parameters of the whole HMM.
#[derive(Debug, Clone, PartialEq)]
pub struct NaturalParams {
    /// `log(pi)`
    pub log_pi: DVector<f64>,
    /// `log(A)`, elementwise
    pub log_a: DMatrix<f64>,
    /// Augmented natural parameters `eta_k ++ (-logZ(eta_k))` per state
    pub etas: Vec<ArrayTuple>,
}

impl NaturalParams {
    /// Number of hidden states.
    pub fn num_states(&self) -> usize {
        self.log_pi.len()
    }
}

/// Expected sufficient statistics produced by the E-step.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExpectedStats {
    /// Posterior distribution of the initial (non-emitting) state
    pub init: DVector<f64>,
    /// Expected transition counts, summing to T
    pub trans: DMatrix<f64>,
    /// Per-state expected augmented statistics; the last part is the
    /// expected occupancy count
    pub obs: Vec<ArrayTuple>,
    /// Data log-likelihood under the parameters the statistics came from
    pub log_likelihood: f64,
}

impl ExpectedStats {
    /// Whether every expected statistic is finite.
    pub fn all_finite(&self) -> bool {
        self.init.iter().all(|v| v.is_finite())
            && self.trans.iter().all(|v| v.is_finite())
            && self.obs.iter().all(ArrayTuple::all_finite)
    }
}

/// Maps `(pi, A, thetas)` to `(log pi, log A, augmented etas)`.
pub fn natural_params<F: ExponentialFamily>(
    family: &F,
    params: &HmmParams<F::Theta>,
) -> HmmResult<NaturalParams> {
    let etas = params
        .thetas
        .iter()
        .map(|theta| family.natural_params_augmented(theta))
        .collect::<HmmResult<Vec<_>>>()?;
    Ok(NaturalParams {
        log_pi: ln_vector(&params.pi),
        log_a: ln_matrix(&params.a),
        etas,
    })
}

/// Augmented sufficient statistics `T(y_t) ++ (1)` for a sequence.
///
/// All observations must yield statistics of the same shape.
pub fn augmented_statistics<F: ExponentialFamily>(
    family: &F,
    data: &[F::Observation],
) -> HmmResult<Vec<ArrayTuple>> {
    let stats = data
        .iter()
        .map(|y| family.augmented_statistic(y))
        .collect::<HmmResult<Vec<_>>>()?;
    if let Some(first) = stats.first() {
        if let Some((t, bad)) = stats
            .iter()
            .enumerate()
            .find(|(_, s)| !s.shape_matches(first))
        {
            return Err(HmmError::DimensionMismatch {
                context: format!("statistic of observation {}", t),
                expected: first.num_elements(),
                actual: bad.num_elements(),
            });
        }
    }
    Ok(stats)
}

/// Forward recursion over abstract values.
///
/// `log_a` is row-major (`log_a[i * n + j]`); `etas[k]` and each row of
/// `stats` are flattened augmented tuples of equal length.
pub fn forward_log_partition<R: Recorder>(
    rec: &mut R,
    log_pi: &[R::Value],
    log_a: &[R::Value],
    etas: &[Vec<R::Value>],
    stats: &[Vec<f64>],
) -> R::Value {
    let n = log_pi.len();
    let mut log_alpha = log_pi.to_vec();
    for stat in stats {
        let ll: Vec<R::Value> = etas
            .iter()
            .map(|eta| {
                let terms: Vec<(R::Value, f64)> =
                    eta.iter().copied().zip(stat.iter().copied()).collect();
                rec.linear(&terms)
            })
            .collect();

        let mut next = Vec::with_capacity(n);
        for (j, &ll_j) in ll.iter().enumerate() {
            let incoming: Vec<R::Value> = (0..n)
                .map(|i| rec.add(log_alpha[i], log_a[i * n + j]))
                .collect();
            let reached = rec.log_sum_exp(&incoming);
            next.push(rec.add(reached, ll_j));
        }
        log_alpha = next;
    }
    rec.log_sum_exp(&log_alpha)
}

fn check_shapes(natural: &NaturalParams, stats: &[ArrayTuple]) -> HmmResult<()> {
    let n = natural.num_states();
    if n == 0 {
        return Err(HmmError::InvalidParameter {
            parameter: "num_states".to_string(),
            value: 0.0,
            constraint: ">= 1".to_string(),
        });
    }
    if natural.log_a.nrows() != n || natural.log_a.ncols() != n {
        return Err(HmmError::DimensionMismatch {
            context: "log transition matrix".to_string(),
            expected: n,
            actual: natural.log_a.nrows(),
        });
    }
    if natural.etas.len() != n {
        return Err(HmmError::DimensionMismatch {
            context: "natural parameters per state".to_string(),
            expected: n,
            actual: natural.etas.len(),
        });
    }
    for (k, eta) in natural.etas.iter().enumerate() {
        if let Some(stat) = stats.iter().find(|s| !s.shape_matches(eta)) {
            return Err(HmmError::DimensionMismatch {
                context: format!("natural parameters of state {} vs statistics", k),
                expected: eta.num_elements(),
                actual: stat.num_elements(),
            });
        }
    }
    Ok(())
}

fn row_major(m: &DMatrix<f64>) -> Vec<f64> {
    let mut out = Vec::with_capacity(m.len());
    for i in 0..m.nrows() {
        out.extend(m.row(i).iter().copied());
    }
    out
}

/// Log partition function of the HMM, i.e. `log p(y_1..T)`.
///
/// A sequence with zero probability yields `-inf` rather than an error.
pub fn hmm_log_partition_function(
    natural: &NaturalParams,
    stats: &[ArrayTuple],
) -> HmmResult<f64> {
    check_shapes(natural, stats)?;
    let etas: Vec<Vec<f64>> = natural.etas.iter().map(ArrayTuple::flatten).collect();
    let flat_stats: Vec<Vec<f64>> = stats.iter().map(ArrayTuple::flatten).collect();
    Ok(forward_log_partition(
        &mut Evaluate,
        natural.log_pi.as_slice(),
        &row_major(&natural.log_a),
        &etas,
        &flat_stats,
    ))
}

/// Gradient of [`hmm_log_partition_function`] with respect to the natural
/// parameters, which equals the expected sufficient statistics.
pub fn expected_statistics(
    natural: &NaturalParams,
    stats: &[ArrayTuple],
) -> HmmResult<ExpectedStats> {
    check_shapes(natural, stats)?;
    let n = natural.num_states();
    let per_state = natural.etas.first().map_or(0, ArrayTuple::num_elements);
    let mut tape = Tape::with_capacity(n * (n + 1) + n * per_state + stats.len() * n * (2 * n + 3));

    let pi_vars: Vec<_> = natural.log_pi.iter().map(|&v| tape.variable(v)).collect();
    let a_vars: Vec<_> = row_major(&natural.log_a)
        .into_iter()
        .map(|v| tape.variable(v))
        .collect();
    let eta_vars: Vec<Vec<_>> = natural
        .etas
        .iter()
        .map(|eta| eta.flatten().into_iter().map(|v| tape.variable(v)).collect())
        .collect();
    let flat_stats: Vec<Vec<f64>> = stats.iter().map(ArrayTuple::flatten).collect();

    let output = forward_log_partition(&mut tape, &pi_vars, &a_vars, &eta_vars, &flat_stats);
    let grad = tape.gradient(output);

    let init = DVector::from_iterator(n, pi_vars.iter().map(|&v| grad.wrt(v)));
    let trans = DMatrix::from_fn(n, n, |i, j| grad.wrt(a_vars[i * n + j]));
    let obs = natural
        .etas
        .iter()
        .zip(&eta_vars)
        .map(|(eta, vars)| {
            let g: Vec<f64> = vars.iter().map(|&v| grad.wrt(v)).collect();
            ArrayTuple::unflatten_like(eta, &g)
        })
        .collect::<HmmResult<Vec<_>>>()?;

    Ok(ExpectedStats {
        init,
        trans,
        obs,
        log_likelihood: tape.value(output),
    })
}

/// E-step: expected sufficient statistics of `data` under `params`.
pub fn e_step<F: ExponentialFamily>(
    family: &F,
    params: &HmmParams<F::Theta>,
    data: &[F::Observation],
) -> HmmResult<ExpectedStats> {
    let natural = natural_params(family, params)?;
    let stats = augmented_statistics(family, data)?;
    expected_statistics(&natural, &stats)
}

/// M-step: normalize expected counts and re-estimate each state's emission
/// parameters by maximum likelihood.
pub fn m_step<F: ExponentialFamily>(
    family: &F,
    expected: &ExpectedStats,
    policy: DegenerateRowPolicy,
) -> HmmResult<HmmParams<F::Theta>> {
    let pi = normalize_vector(&expected.init, policy)?;
    let a = normalize_rows(&expected.trans, policy)?;
    let thetas = expected
        .obs
        .iter()
        .map(|stat| family.max_likelihood(stat))
        .collect::<HmmResult<Vec<_>>>()?;
    HmmParams::new(pi, a, thetas)
}
