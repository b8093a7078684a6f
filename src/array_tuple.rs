//! Ordered tuples of dense arrays.
//!
//! Natural parameters and sufficient statistics are tuples of arrays of mixed
//! shape (a matrix, a vector, a scalar). [`ArrayTuple`] stores each part as a
//! `DMatrix` so vectors are `n x 1` and scalars `1 x 1`.

use crate::errors::{HmmError, HmmResult};
use nalgebra::{DMatrix, DVector};

/// An ordered tuple of dense arrays.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArrayTuple {
    parts: Vec<DMatrix<f64>>,
}

impl ArrayTuple {
    /// Builds a tuple from its parts.
    pub fn new(parts: Vec<DMatrix<f64>>) -> Self {
        Self { parts }
    }

    /// Wraps a vector as an `n x 1` part.
    pub fn vector_part(v: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_column_slice(v.len(), 1, v.as_slice())
    }

    /// Wraps a scalar as a `1 x 1` part.
    pub fn scalar_part(x: f64) -> DMatrix<f64> {
        DMatrix::from_element(1, 1, x)
    }

    /// The parts in order.
    pub fn parts(&self) -> &[DMatrix<f64>] {
        &self.parts
    }

    /// Number of parts.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether the tuple has no parts.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Part `i` as a column vector.
    pub fn part_as_vector(&self, i: usize) -> Option<DVector<f64>> {
        self.parts
            .get(i)
            .map(|m| DVector::from_column_slice(m.as_slice()))
    }

    /// Part `i` read as a scalar (its single element).
    pub fn part_as_scalar(&self, i: usize) -> Option<f64> {
        self.parts
            .get(i)
            .filter(|m| m.len() == 1)
            .map(|m| m[(0, 0)])
    }

    /// Returns the tuple with one extra scalar part appended.
    pub fn augmented(&self, value: f64) -> Self {
        let mut parts = self.parts.clone();
        parts.push(Self::scalar_part(value));
        Self { parts }
    }

    /// A tuple of zeros with the same shape.
    pub fn zeros_like(&self) -> Self {
        Self {
            parts: self
                .parts
                .iter()
                .map(|m| DMatrix::zeros(m.nrows(), m.ncols()))
                .collect(),
        }
    }

    /// Whether both tuples have the same number of parts with equal shapes.
    pub fn shape_matches(&self, other: &Self) -> bool {
        self.parts.len() == other.parts.len()
            && self
                .parts
                .iter()
                .zip(&other.parts)
                .all(|(a, b)| a.shape() == b.shape())
    }

    /// Total number of scalar entries.
    pub fn num_elements(&self) -> usize {
        self.parts.iter().map(|m| m.len()).sum()
    }

    /// All entries, part by part, each part in column-major order.
    pub fn flatten(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.num_elements());
        for m in &self.parts {
            out.extend_from_slice(m.as_slice());
        }
        out
    }

    /// Inverse of [`flatten`](Self::flatten), taking shapes from `template`.
    pub fn unflatten_like(template: &Self, values: &[f64]) -> HmmResult<Self> {
        if values.len() != template.num_elements() {
            return Err(HmmError::DimensionMismatch {
                context: "unflatten array tuple".to_string(),
                expected: template.num_elements(),
                actual: values.len(),
            });
        }
        let mut offset = 0;
        let parts = template
            .parts
            .iter()
            .map(|m| {
                let n = m.len();
                let part = DMatrix::from_column_slice(m.nrows(), m.ncols(), &values[offset..offset + n]);
                offset += n;
                part
            })
            .collect();
        Ok(Self { parts })
    }

    /// `self += alpha * other`.
    pub fn scaled_add(&mut self, alpha: f64, other: &Self) -> HmmResult<()> {
        if !self.shape_matches(other) {
            return Err(HmmError::DimensionMismatch {
                context: "array tuple accumulation".to_string(),
                expected: self.num_elements(),
                actual: other.num_elements(),
            });
        }
        for (a, b) in self.parts.iter_mut().zip(&other.parts) {
            *a += b * alpha;
        }
        Ok(())
    }

    /// Whether every entry is finite.
    pub fn all_finite(&self) -> bool {
        self.parts.iter().all(|m| m.iter().all(|v| v.is_finite()))
    }
}

/// Sum over parts of the elementwise product, `<a, b>`.
///
/// # Example
/// ```rust
/// use expfam_hmm::array_tuple::{inner, ArrayTuple};
/// use nalgebra::DMatrix;
///
/// let a = ArrayTuple::new(vec![DMatrix::from_element(2, 2, 1.0), ArrayTuple::scalar_part(2.0)]);
/// let b = ArrayTuple::new(vec![DMatrix::from_element(2, 2, 3.0), ArrayTuple::scalar_part(-1.0)]);
/// assert_eq!(inner(&a, &b).unwrap(), 10.0);
/// ```
pub fn inner(a: &ArrayTuple, b: &ArrayTuple) -> HmmResult<f64> {
    if !a.shape_matches(b) {
        return Err(HmmError::DimensionMismatch {
            context: "inner product of array tuples".to_string(),
            expected: a.num_elements(),
            actual: b.num_elements(),
        });
    }
    Ok(a.parts
        .iter()
        .zip(&b.parts)
        .map(|(x, y)| x.component_mul(y).sum())
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ArrayTuple {
        ArrayTuple::new(vec![
            DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]),
            ArrayTuple::vector_part(&DVector::from_vec(vec![5.0, 6.0])),
        ])
    }

    #[test]
    fn test_flatten_unflatten_preserves_layout() {
        let t = sample();
        let flat = t.flatten();
        // column-major within each part
        assert_eq!(flat, vec![1.0, 3.0, 2.0, 4.0, 5.0, 6.0]);
        let back = ArrayTuple::unflatten_like(&t, &flat).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_unflatten_rejects_wrong_length() {
        let t = sample();
        assert!(matches!(
            ArrayTuple::unflatten_like(&t, &[1.0, 2.0]),
            Err(HmmError::DimensionMismatch { expected: 6, actual: 2, .. })
        ));
    }

    #[test]
    fn test_augmented_appends_scalar() {
        let t = sample().augmented(-7.5);
        assert_eq!(t.len(), 3);
        assert_eq!(t.part_as_scalar(2), Some(-7.5));
        assert_eq!(t.part_as_scalar(0), None);
    }

    #[test]
    fn test_inner_and_scaled_add() {
        let t = sample();
        assert_eq!(inner(&t, &t).unwrap(), 1.0 + 4.0 + 9.0 + 16.0 + 25.0 + 36.0);

        let mut acc = t.zeros_like();
        acc.scaled_add(2.0, &t).unwrap();
        acc.scaled_add(-1.0, &t).unwrap();
        assert_eq!(acc, t);

        let other = ArrayTuple::new(vec![ArrayTuple::scalar_part(1.0)]);
        assert!(inner(&t, &other).is_err());
        assert!(acc.scaled_add(1.0, &other).is_err());
    }
}
