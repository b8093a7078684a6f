//! Scalar reverse-mode automatic differentiation.
//!
//! A [`Tape`] records every intermediate value together with its local
//! partial derivatives with respect to its operands. [`Tape::gradient`] then
//! replays the tape backwards, accumulating adjoints by the chain rule.
//!
//! Computations are written once against the [`Recorder`] trait and can be
//! run either on a tape (to get gradients) or with [`Evaluate`] (plain `f64`
//! arithmetic, no recording).

use crate::math_utils::log_sum_exp;

/// Handle to a node on a [`Tape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Var(usize);

impl Var {
    /// Position of the node on its tape.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Wengert list of scalar operations.
#[derive(Debug, Default, Clone)]
pub struct Tape {
    values: Vec<f64>,
    // Local partials of node i: (operand index, d node_i / d operand)
    partials: Vec<Vec<(usize, f64)>>,
}

impl Tape {
    /// Creates an empty tape.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty tape with room for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            partials: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, value: f64, partials: Vec<(usize, f64)>) -> Var {
        self.values.push(value);
        self.partials.push(partials);
        Var(self.values.len() - 1)
    }

    /// Registers an independent input.
    pub fn variable(&mut self, value: f64) -> Var {
        self.push(value, Vec::new())
    }

    /// Forward value of a node.
    pub fn value(&self, v: Var) -> f64 {
        self.values[v.0]
    }

    /// Number of recorded nodes.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Gradient of `output` with respect to every node on the tape.
    pub fn gradient(&self, output: Var) -> Gradient {
        let mut adjoints = vec![0.0; output.0 + 1];
        adjoints[output.0] = 1.0;
        for node in (0..=output.0).rev() {
            let adjoint = adjoints[node];
            if adjoint == 0.0 {
                continue;
            }
            for &(operand, partial) in &self.partials[node] {
                adjoints[operand] += adjoint * partial;
            }
        }
        Gradient { adjoints }
    }
}

/// Adjoints produced by [`Tape::gradient`].
#[derive(Debug, Clone)]
pub struct Gradient {
    adjoints: Vec<f64>,
}

impl Gradient {
    /// Derivative of the output with respect to `v`.
    ///
    /// Nodes recorded after the output do not influence it and get zero.
    pub fn wrt(&self, v: Var) -> f64 {
        self.adjoints.get(v.0).copied().unwrap_or(0.0)
    }
}

/// Primitive operations needed by differentiable computations.
pub trait Recorder {
    /// Scalar handle produced by the recorder.
    type Value: Copy;

    /// Introduces an input value.
    fn input(&mut self, x: f64) -> Self::Value;

    /// Reads back the forward value.
    fn value(&self, v: Self::Value) -> f64;

    /// `a + b`.
    fn add(&mut self, a: Self::Value, b: Self::Value) -> Self::Value;

    /// `sum_i w_i * x_i` with constant weights. Zero weights are skipped.
    fn linear(&mut self, terms: &[(Self::Value, f64)]) -> Self::Value;

    /// `log(sum_i exp(x_i))`.
    fn log_sum_exp(&mut self, xs: &[Self::Value]) -> Self::Value;
}

impl Recorder for Tape {
    type Value = Var;

    fn input(&mut self, x: f64) -> Var {
        self.variable(x)
    }

    fn value(&self, v: Var) -> f64 {
        Tape::value(self, v)
    }

    fn add(&mut self, a: Var, b: Var) -> Var {
        let value = self.values[a.0] + self.values[b.0];
        self.push(value, vec![(a.0, 1.0), (b.0, 1.0)])
    }

    fn linear(&mut self, terms: &[(Var, f64)]) -> Var {
        let mut value = 0.0;
        let mut partials = Vec::with_capacity(terms.len());
        for &(x, w) in terms {
            if w != 0.0 {
                value += w * self.values[x.0];
                partials.push((x.0, w));
            }
        }
        self.push(value, partials)
    }

    fn log_sum_exp(&mut self, xs: &[Var]) -> Var {
        let inputs: Vec<f64> = xs.iter().map(|x| self.values[x.0]).collect();
        let result = log_sum_exp(&inputs);
        // d/dx_i = softmax_i; a non-finite result contributes no gradient
        let partials = if !result.is_finite() {
            Vec::new()
        } else {
            xs.iter()
                .zip(&inputs)
                .map(|(x, &v)| (x.0, (v - result).exp()))
                .collect()
        };
        self.push(result, partials)
    }
}

/// Recorder that just evaluates.
#[derive(Debug, Default, Clone, Copy)]
pub struct Evaluate;

impl Recorder for Evaluate {
    type Value = f64;

    fn input(&mut self, x: f64) -> f64 {
        x
    }

    fn value(&self, v: f64) -> f64 {
        v
    }

    fn add(&mut self, a: f64, b: f64) -> f64 {
        a + b
    }

    fn linear(&mut self, terms: &[(f64, f64)]) -> f64 {
        terms
            .iter()
            .filter(|(_, w)| *w != 0.0)
            .map(|(x, w)| w * x)
            .sum()
    }

    fn log_sum_exp(&mut self, xs: &[f64]) -> f64 {
        log_sum_exp(xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_linear_and_add_gradients() {
        let mut tape = Tape::new();
        let x = tape.variable(2.0);
        let y = tape.variable(-1.0);
        let lin = tape.linear(&[(x, 3.0), (y, 0.5)]);
        let out = tape.add(lin, x);
        assert_approx_eq!(tape.value(out), 7.5, 1e-12);

        let grad = tape.gradient(out);
        assert_approx_eq!(grad.wrt(x), 4.0, 1e-12);
        assert_approx_eq!(grad.wrt(y), 0.5, 1e-12);
    }

    #[test]
    fn test_log_sum_exp_gradient_is_softmax() {
        let mut tape = Tape::new();
        let xs: Vec<Var> = [0.3, -1.2, 2.0].iter().map(|&v| tape.variable(v)).collect();
        let out = tape.log_sum_exp(&xs);
        let grad = tape.gradient(out);

        let total: f64 = [0.3f64, -1.2, 2.0].iter().map(|v| v.exp()).sum();
        for (x, v) in xs.iter().zip([0.3f64, -1.2, 2.0]) {
            assert_approx_eq!(grad.wrt(*x), v.exp() / total, 1e-12);
        }
    }

    #[test]
    fn test_negative_infinity_inputs_get_zero_gradient() {
        let mut tape = Tape::new();
        let a = tape.variable(f64::NEG_INFINITY);
        let b = tape.variable(0.0);
        let out = tape.log_sum_exp(&[a, b]);
        let grad = tape.gradient(out);
        assert_eq!(grad.wrt(a), 0.0);
        assert_approx_eq!(grad.wrt(b), 1.0, 1e-15);

        let mut tape = Tape::new();
        let a = tape.variable(f64::NEG_INFINITY);
        let out = tape.log_sum_exp(&[a]);
        assert_eq!(tape.value(out), f64::NEG_INFINITY);
        assert_eq!(tape.gradient(out).wrt(a), 0.0);
    }

    #[test]
    fn test_nan_input_yields_nan_without_gradient() {
        let mut tape = Tape::new();
        let a = tape.variable(f64::NAN);
        let b = tape.variable(0.0);
        let out = tape.log_sum_exp(&[a, b]);
        assert!(tape.value(out).is_nan());
        let grad = tape.gradient(out);
        assert_eq!(grad.wrt(a), 0.0);
        assert_eq!(grad.wrt(b), 0.0);
        let mut eval = Evaluate;
        assert!(eval.log_sum_exp(&[f64::NAN, 0.0]).is_nan());
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        fn f<R: Recorder>(r: &mut R, x: f64, y: f64) -> (R::Value, R::Value, R::Value) {
            let x = r.input(x);
            let y = r.input(y);
            let s = r.add(x, y);
            let l = r.linear(&[(x, 2.0), (s, -1.0)]);
            (x, y, r.log_sum_exp(&[l, s, y]))
        }

        let mut tape = Tape::new();
        let (x, y, out) = f(&mut tape, 0.4, -0.7);
        let grad = tape.gradient(out);

        let h = 1e-6;
        let eval = |a: f64, b: f64| {
            let (_, _, v) = f(&mut Evaluate, a, b);
            v
        };
        let dx = (eval(0.4 + h, -0.7) - eval(0.4 - h, -0.7)) / (2.0 * h);
        let dy = (eval(0.4, -0.7 + h) - eval(0.4, -0.7 - h)) / (2.0 * h);
        assert_approx_eq!(grad.wrt(x), dx, 1e-7);
        assert_approx_eq!(grad.wrt(y), dy, 1e-7);
        assert_approx_eq!(tape.value(out), eval(0.4, -0.7), 1e-12);
    }

    #[test]
    fn test_nodes_after_output_have_zero_adjoint() {
        let mut tape = Tape::new();
        let x = tape.variable(1.0);
        let later = tape.variable(5.0);
        assert_eq!(tape.gradient(x).wrt(later), 0.0);
        assert_eq!(tape.len(), 2);
    }
}
