//! Expectation-Maximization driver.
//!
//! [`EmDriver`] fixes the emission family and configuration at construction
//! and repeatedly applies `M_step(E_step(params))` until two successive
//! parameter tuples are numerically indistinguishable, the optional
//! log-likelihood plateau is reached, or the iteration budget runs out.

use crate::{
    decoding::{forward_backward, viterbi, Posterior},
    em_config::EmConfig,
    emission_models::ExponentialFamily,
    errors::{validate_all_finite, EmError, HmmError, HmmResult},
    fixed_point::{fixed_point, FixedPoint, FixedPointError},
    hmm_core::{
        augmented_statistics, e_step, expected_statistics, hmm_log_partition_function, m_step,
        natural_params, ExpectedStats, HmmParams,
    },
    results::{EmOutcome, StopReason},
};
use std::ops::ControlFlow;

/// Result of an EM run over emission parameters `T`.
pub type EmResult<T> = Result<EmOutcome<T>, EmError<T>>;

/// EM estimator for an HMM with emissions from family `F`.
#[derive(Debug, Clone)]
pub struct EmDriver<F> {
    family: F,
    config: EmConfig,
}

impl<F: ExponentialFamily> EmDriver<F> {
    /// Creates a driver, validating the configuration.
    pub fn new(family: F, config: EmConfig) -> HmmResult<Self> {
        config.validate()?;
        Ok(Self { family, config })
    }

    /// Creates a driver with [`EmConfig::default`].
    pub fn with_defaults(family: F) -> Self {
        Self {
            family,
            config: EmConfig::default(),
        }
    }

    /// The emission family.
    pub fn family(&self) -> &F {
        &self.family
    }

    /// The configuration.
    pub fn config(&self) -> &EmConfig {
        &self.config
    }

    /// Expected sufficient statistics of `data` under `params`.
    pub fn e_step(
        &self,
        params: &HmmParams<F::Theta>,
        data: &[F::Observation],
    ) -> HmmResult<ExpectedStats> {
        e_step(&self.family, params, data)
    }

    /// Parameter update from expected statistics.
    pub fn m_step(&self, expected: &ExpectedStats) -> HmmResult<HmmParams<F::Theta>> {
        let params = m_step(&self.family, expected, self.config.degenerate_rows)?;
        if self.config.is_strict() {
            validate_all_finite(params.pi.as_slice(), "updated pi")?;
            validate_all_finite(params.a.as_slice(), "updated A")?;
        }
        Ok(params)
    }

    /// One EM update, `M_step(E_step(params))`.
    pub fn update(
        &self,
        params: &HmmParams<F::Theta>,
        data: &[F::Observation],
    ) -> HmmResult<HmmParams<F::Theta>> {
        self.m_step(&self.e_step(params, data)?)
    }

    /// `log p(data | params)`.
    pub fn log_likelihood(
        &self,
        params: &HmmParams<F::Theta>,
        data: &[F::Observation],
    ) -> HmmResult<f64> {
        let natural = natural_params(&self.family, params)?;
        let stats = augmented_statistics(&self.family, data)?;
        hmm_log_partition_function(&natural, &stats)
    }

    /// Smoothed state posteriors of `data` under `params`.
    pub fn posterior(
        &self,
        params: &HmmParams<F::Theta>,
        data: &[F::Observation],
    ) -> HmmResult<Posterior> {
        let natural = natural_params(&self.family, params)?;
        let stats = augmented_statistics(&self.family, data)?;
        forward_backward(&natural, &stats)
    }

    /// Most likely state sequence of `data` under `params`.
    pub fn decode(
        &self,
        params: &HmmParams<F::Theta>,
        data: &[F::Observation],
    ) -> HmmResult<(Vec<usize>, f64)> {
        let natural = natural_params(&self.family, params)?;
        let stats = augmented_statistics(&self.family, data)?;
        viterbi(&natural, &stats)
    }

    /// Runs EM from `init` until convergence.
    pub fn fit(&self, init: &HmmParams<F::Theta>, data: &[F::Observation]) -> EmResult<F::Theta> {
        if data.is_empty() {
            return Err(HmmError::InsufficientData {
                required: 1,
                actual: 0,
            }
            .into());
        }
        init.validate_distributions()?;
        let stats = augmented_statistics(&self.family, data)?;
        let config = &self.config;
        let mut trace: Vec<f64> = Vec::new();

        let result = fixed_point(
            init.clone(),
            config.tolerance,
            config.max_iterations,
            |params: &HmmParams<F::Theta>,
             iteration: usize|
             -> Result<ControlFlow<HmmParams<F::Theta>, HmmParams<F::Theta>>, EmError<F::Theta>> {
                let natural = natural_params(&self.family, params)?;
                let expected = expected_statistics(&natural, &stats)?;
                let log_likelihood = expected.log_likelihood;

                if log_likelihood == f64::NEG_INFINITY {
                    return Err(EmError::ZeroLikelihood {
                        iteration,
                        last: Box::new(params.clone()),
                    });
                }
                if config.is_strict() {
                    if !log_likelihood.is_finite() {
                        return Err(HmmError::NumericalError {
                            reason: format!("log-likelihood is {}", log_likelihood),
                            operation: Some(format!("E-step {}", iteration)),
                        }
                        .into());
                    }
                    if !expected.all_finite() {
                        return Err(HmmError::NumericalError {
                            reason: "expected statistics contain non-finite values".to_string(),
                            operation: Some(format!("E-step {}", iteration)),
                        }
                        .into());
                    }
                }
                log::debug!("EM iteration {}: log-likelihood {}", iteration, log_likelihood);

                let previous = trace.last().copied();
                trace.push(log_likelihood);
                if let Some(prev) = previous {
                    let slack = config.monotonicity_slack * prev.abs().max(1.0);
                    if log_likelihood < prev - slack {
                        log::warn!(
                            "log-likelihood decreased at iteration {}: {} -> {}",
                            iteration,
                            prev,
                            log_likelihood
                        );
                    }
                    if let Some(min) = config.min_improvement {
                        if log_likelihood - prev < min {
                            return Ok(ControlFlow::Break(params.clone()));
                        }
                    }
                }

                Ok(ControlFlow::Continue(self.m_step(&expected)?))
            },
        );

        match result {
            Ok(FixedPoint {
                value,
                iterations,
                stopped_early,
            }) => {
                let stop_reason = if stopped_early {
                    StopReason::LikelihoodPlateau
                } else {
                    StopReason::FixedPoint
                };
                log::info!(
                    "EM stopped after {} iterations ({:?}), log-likelihood {}",
                    iterations,
                    stop_reason,
                    trace.last().copied().unwrap_or(f64::NEG_INFINITY)
                );
                Ok(EmOutcome {
                    params: value,
                    iterations,
                    log_likelihood_trace: trace,
                    stop_reason,
                })
            }
            Err(FixedPointError::Budget { iterations, last }) => {
                log::warn!("EM did not converge within {} iterations", iterations);
                Err(EmError::NonConvergence {
                    iterations,
                    last: Box::new(last),
                })
            }
            Err(FixedPointError::Step(err)) => Err(err),
        }
    }

    /// Runs EM from every initialization on the rayon pool and keeps the
    /// result with the highest final log-likelihood.
    ///
    /// If every run fails, the error of the first run is returned.
    #[cfg(feature = "parallel")]
    pub fn fit_restarts(
        &self,
        inits: &[HmmParams<F::Theta>],
        data: &[F::Observation],
    ) -> EmResult<F::Theta>
    where
        F: Sync,
        F::Theta: Send + Sync,
        F::Observation: Sync,
    {
        use rayon::prelude::*;
        let runs: Vec<_> = inits.par_iter().map(|init| self.fit(init, data)).collect();
        Self::best_run(runs)
    }

    /// Runs EM from every initialization in turn and keeps the result with
    /// the highest final log-likelihood.
    ///
    /// If every run fails, the error of the first run is returned.
    #[cfg(not(feature = "parallel"))]
    pub fn fit_restarts(
        &self,
        inits: &[HmmParams<F::Theta>],
        data: &[F::Observation],
    ) -> EmResult<F::Theta> {
        let runs: Vec<_> = inits.iter().map(|init| self.fit(init, data)).collect();
        Self::best_run(runs)
    }

    fn best_run(runs: Vec<EmResult<F::Theta>>) -> EmResult<F::Theta> {
        let mut best: Option<EmOutcome<F::Theta>> = None;
        let mut first_error = None;
        for (i, run) in runs.into_iter().enumerate() {
            match run {
                Ok(outcome) => {
                    let better = best.as_ref().map_or(true, |b| {
                        outcome.final_log_likelihood() > b.final_log_likelihood()
                    });
                    if better {
                        best = Some(outcome);
                    }
                }
                Err(err) => {
                    log::warn!("EM restart {} failed: {}", i, err);
                    first_error.get_or_insert(err);
                }
            }
        }
        match (best, first_error) {
            (Some(outcome), _) => Ok(outcome),
            (None, Some(err)) => Err(err),
            (None, None) => Err(HmmError::InvalidParameter {
                parameter: "restarts".to_string(),
                value: 0.0,
                constraint: ">= 1".to_string(),
            }
            .into()),
        }
    }
}

/// Fits an HMM with emission family `family` by EM from `init`, using the
/// default configuration, and returns the fixed point.
///
/// # Example
/// ```rust
/// use expfam_hmm::{em, Gaussian, GaussianParams, HmmParams};
/// use nalgebra::{DMatrix, DVector};
///
/// let data: Vec<DVector<f64>> = [-2.0, -1.8, -2.2, 2.1, 1.9, 2.3, -2.1, 2.0]
///     .iter()
///     .map(|&y| DVector::from_vec(vec![y]))
///     .collect();
/// let init = HmmParams::new(
///     DVector::from_vec(vec![0.5, 0.5]),
///     DMatrix::from_row_slice(2, 2, &[0.7, 0.3, 0.3, 0.7]),
///     vec![
///         GaussianParams::new(DVector::from_vec(vec![-1.0]), DMatrix::identity(1, 1)).unwrap(),
///         GaussianParams::new(DVector::from_vec(vec![1.0]), DMatrix::identity(1, 1)).unwrap(),
///     ],
/// )
/// .unwrap();
///
/// let fitted = em(&init, &data, Gaussian::new()).unwrap();
/// assert!(fitted.thetas[0].mean[0] < 0.0 && fitted.thetas[1].mean[0] > 0.0);
/// ```
pub fn em<F: ExponentialFamily>(
    init: &HmmParams<F::Theta>,
    data: &[F::Observation],
    family: F,
) -> Result<HmmParams<F::Theta>, EmError<F::Theta>> {
    let driver = EmDriver::new(family, EmConfig::default())?;
    driver.fit(init, data).map(|outcome| outcome.params)
}
