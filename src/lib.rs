//! # Exponential-Family HMM
//!
//! Expectation-Maximization for hidden Markov models whose per-state
//! emission distribution belongs to an exponential family.
//!
//! The E-step is not hand-derived per model. The log partition function of
//! the HMM (the data log-likelihood) is computed by a log-space forward
//! recursion over natural parameters, and its gradient with respect to those
//! parameters, taken by reverse-mode automatic differentiation, is exactly
//! the vector of expected sufficient statistics. The M-step normalizes the
//! expected counts and hands each state's statistics to the family's
//! closed-form maximum-likelihood map. EM iterates until two successive
//! parameter tuples are numerically indistinguishable.
//!
//! ## Key Features
//!
//! - **Pluggable families**: anything implementing [`ExponentialFamily`]
//!   (`eta`, `statistic`, `log_partition`, `max_likelihood`)
//! - **Gaussian emissions** with full covariance, and a Normal-Inverse-Wishart
//!   family exposing its natural parameters
//! - **Differentiated forward algorithm**: [`hmm_log_partition_function`] and
//!   [`expected_statistics`] share one recursion
//! - **Independent forward-backward** and Viterbi decoding
//! - **Safeguards**: iteration budget, optional log-likelihood plateau stop,
//!   configurable handling of degenerate rows and non-finite values
//! - **Restarts** from several initializations, parallel with the `parallel` feature
//!
//! ## Quick Start
//!
//! ```rust
//! use expfam_hmm::*;
//! use expfam_hmm::generators::sample_gaussian_hmm;
//! use expfam_hmm::initialization::{random_gaussian_hmm, seeded_rng};
//!
//! let truth = random_gaussian_hmm(2, 2, 42).unwrap();
//! let data = sample_gaussian_hmm(&truth, 200, &mut seeded_rng(1)).unwrap().observations;
//!
//! let driver = EmDriver::new(Gaussian::with_regularization(1e-6).unwrap(), EmConfig::default()).unwrap();
//! let init = random_gaussian_hmm(2, 2, 7).unwrap();
//! match driver.fit(&init, &data) {
//!     Ok(outcome) => {
//!         assert!(outcome.is_monotone(1e-6));
//!         println!("log-likelihood {}", outcome.final_log_likelihood());
//!     }
//!     Err(err) => println!("EM failed: {}", err),
//! }
//! ```
//!
//! ## State convention
//!
//! `pi` is the distribution of a non-emitting state `z_0`; each observation
//! is preceded by one transition through `A`. The initial expected
//! statistic is therefore the posterior of `z_0`, and the expected
//! transition counts sum to the sequence length.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod array_tuple;
pub mod autodiff;
pub mod errors;
pub mod fixed_point;
pub mod math_utils;

// Model and inference
pub mod decoding;
pub mod emission_models;
pub mod hmm_core;

// Estimation
pub mod em;
pub mod em_config;
pub mod results;

// Initialization and synthetic data
pub mod generators;
pub mod initialization;

// Re-exports for convenience - main public API
pub use array_tuple::{inner, ArrayTuple};
pub use decoding::{forward_backward, viterbi, Posterior};
pub use em::{em, EmDriver, EmResult};
pub use em_config::{DegenerateRowPolicy, EmConfig, NumericMode};
pub use emission_models::{ExponentialFamily, Gaussian, GaussianParams, NiwParams, NormalInverseWishart};
pub use errors::{EmError, HmmError, HmmResult};
pub use fixed_point::{fixed_point, same, AllClose, Tolerance};
pub use hmm_core::{
    augmented_statistics, e_step, expected_statistics, hmm_log_partition_function, m_step,
    natural_params, ExpectedStats, HmmParams, NaturalParams,
};
pub use math_utils::{log_sum_exp, normalize_rows, normalize_vector};
pub use results::{EmOutcome, StopReason};
