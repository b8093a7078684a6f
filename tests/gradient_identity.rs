//! Integration tests for the differentiated E-step.
//!
//! The gradient of the log partition function must equal the expected
//! sufficient statistics computed by an independent forward-backward pass.

use assert_approx_eq::assert_approx_eq;
use expfam_hmm::generators::sample_gaussian_hmm;
use expfam_hmm::initialization::{random_gaussian_hmm, seeded_rng};
use expfam_hmm::*;
use nalgebra::DMatrix;

fn assert_stats_close(tape: &ExpectedStats, smoothed: &ExpectedStats, tol: f64) {
    assert_approx_eq!(tape.log_likelihood, smoothed.log_likelihood, tol);
    for (a, b) in tape.init.iter().zip(smoothed.init.iter()) {
        assert_approx_eq!(a, b, tol);
    }
    for (a, b) in tape.trans.iter().zip(smoothed.trans.iter()) {
        assert_approx_eq!(a, b, tol);
    }
    assert_eq!(tape.obs.len(), smoothed.obs.len());
    for (ta, sa) in tape.obs.iter().zip(&smoothed.obs) {
        assert!(ta.shape_matches(sa));
        for (a, b) in ta.flatten().iter().zip(sa.flatten()) {
            // Outer-product entries scale with the data
            assert_approx_eq!(a, b, tol * (1.0 + b.abs()));
        }
    }
}

/// Test scenario: three states, bivariate data
#[test]
fn test_gradient_equals_forward_backward_statistics() {
    let g = Gaussian::new();
    let truth = random_gaussian_hmm(3, 2, 10).unwrap();
    let data = sample_gaussian_hmm(&truth, 15, &mut seeded_rng(11))
        .unwrap()
        .observations;
    let params = random_gaussian_hmm(3, 2, 12).unwrap();

    let natural = natural_params(&g, &params).unwrap();
    let stats = augmented_statistics(&g, &data).unwrap();
    let tape = expected_statistics(&natural, &stats).unwrap();
    let smoothed = forward_backward(&natural, &stats)
        .unwrap()
        .expected_statistics(&natural, &stats)
        .unwrap();

    assert_stats_close(&tape, &smoothed, 1e-9);
}

/// Test scenario: forbidden transitions contribute zero expected counts
#[test]
fn test_gradient_identity_with_zero_transitions() {
    let g = Gaussian::new();
    let mut params = random_gaussian_hmm(2, 1, 3).unwrap();
    params.a = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.3, 0.7]);
    let data = sample_gaussian_hmm(&params, 8, &mut seeded_rng(4))
        .unwrap()
        .observations;

    let natural = natural_params(&g, &params).unwrap();
    let stats = augmented_statistics(&g, &data).unwrap();
    let tape = expected_statistics(&natural, &stats).unwrap();
    let smoothed = forward_backward(&natural, &stats)
        .unwrap()
        .expected_statistics(&natural, &stats)
        .unwrap();

    assert_eq!(tape.trans[(0, 0)], 0.0);
    assert_stats_close(&tape, &smoothed, 1e-9);
}

/// Test scenario: per-state occupancies add up to the sequence length
#[test]
fn test_expected_occupancy_sums_to_length() {
    let g = Gaussian::new();
    let params = random_gaussian_hmm(4, 3, 21).unwrap();
    let data = sample_gaussian_hmm(&params, 25, &mut seeded_rng(22))
        .unwrap()
        .observations;

    let expected = e_step(&g, &params, &data).unwrap();
    let occupancy: f64 = expected
        .obs
        .iter()
        .map(|s| s.part_as_scalar(2).unwrap())
        .sum();
    assert_approx_eq!(occupancy, 25.0, 1e-9);
    assert_approx_eq!(expected.trans.sum(), 25.0, 1e-9);
    assert_approx_eq!(expected.init.sum(), 1.0, 1e-12);
}
