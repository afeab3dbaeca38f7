use rand::Rng;

use crate::{Error, Result};

/// A bias-free linear map stored as a dense weight matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    in_dim: usize,
    out_dim: usize,
    /// Row-major matrix with shape (out_dim, in_dim).
    weights: Vec<f64>,
}

impl Linear {
    /// Entries drawn independently from `U[-1, 1)`.
    pub fn uniform<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, rng: &mut R) -> Self {
        let weights = (0..in_dim * out_dim)
            .map(|_| 2.0 * rng.random::<f64>() - 1.0)
            .collect();
        Self {
            in_dim,
            out_dim,
            weights,
        }
    }

    /// Build from a row-major buffer with shape `(out_dim, in_dim)`.
    pub fn from_parts(in_dim: usize, out_dim: usize, weights: Vec<f64>) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::InvalidShape(format!(
                "linear dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }
        if weights.len() != in_dim * out_dim {
            return Err(Error::InvalidShape(format!(
                "weights length {} does not match out_dim * in_dim ({out_dim} * {in_dim})",
                weights.len()
            )));
        }
        Ok(Self {
            in_dim,
            out_dim,
            weights,
        })
    }

    /// Build from rows; every row must have the same nonzero length.
    pub fn from_rows<const N: usize>(rows: &[[f64; N]]) -> Result<Self> {
        let weights = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Self::from_parts(N, rows.len(), weights)
    }

    #[inline]
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    #[inline]
    pub fn weights_mut(&mut self) -> &mut [f64] {
        &mut self.weights
    }

    /// Computes `outputs = W * inputs`.
    ///
    /// Shape contract:
    /// - `inputs.len() == self.in_dim`
    /// - `outputs.len() == self.out_dim`
    #[inline]
    pub fn forward(&self, inputs: &[f64], outputs: &mut [f64]) {
        debug_assert_eq!(inputs.len(), self.in_dim);
        debug_assert_eq!(outputs.len(), self.out_dim);

        for (o, row) in self.weights.chunks_exact(self.in_dim).enumerate() {
            let mut sum = 0.0;
            for (w, x) in row.iter().zip(inputs) {
                sum = w.mul_add(*x, sum);
            }
            outputs[o] = sum;
        }
    }

    /// Computes `outputs = W^T * inputs`.
    ///
    /// Shape contract:
    /// - `inputs.len() == self.out_dim`
    /// - `outputs.len() == self.in_dim`
    #[inline]
    pub fn forward_transposed(&self, inputs: &[f64], outputs: &mut [f64]) {
        debug_assert_eq!(inputs.len(), self.out_dim);
        debug_assert_eq!(outputs.len(), self.in_dim);

        outputs.fill(0.0);
        for (row, &x) in self.weights.chunks_exact(self.in_dim).zip(inputs) {
            for (out, w) in outputs.iter_mut().zip(row) {
                *out = w.mul_add(x, *out);
            }
        }
    }

    /// Snap every weight to the nearest integer (halves away from zero).
    pub fn round(&mut self) {
        for w in &mut self.weights {
            *w = w.round();
        }
    }

    pub fn is_integral(&self) -> bool {
        self.weights.iter().all(|w| w.fract() == 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.weights.iter().all(|w| w.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn forward_and_transposed_agree_with_hand_computed() {
        let l = Linear::from_rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).unwrap();
        assert_eq!((l.in_dim(), l.out_dim()), (3, 2));

        let mut y = [0.0; 2];
        l.forward(&[1.0, 0.0, -1.0], &mut y);
        assert_eq!(y, [-2.0, -2.0]);

        let mut z = [f64::NAN; 3];
        l.forward_transposed(&[1.0, 1.0], &mut z);
        assert_eq!(z, [5.0, 7.0, 9.0]);
    }

    #[test]
    fn uniform_init_stays_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        let l = Linear::uniform(4, 7, &mut rng);
        assert_eq!(l.weights().len(), 28);
        assert!(l.weights().iter().all(|w| (-1.0..1.0).contains(w)));
        assert!(l.weights().iter().any(|w| *w < 0.0));
        assert!(l.weights().iter().any(|w| *w > 0.0));
    }

    #[test]
    fn rounding_is_idempotent() {
        let mut l = Linear::from_rows(&[[0.4, -0.6], [1.5, -2.49]]).unwrap();
        l.round();
        assert_eq!(l.weights(), &[0.0, -1.0, 2.0, -2.0]);
        assert!(l.is_integral());

        let snapped = l.clone();
        l.round();
        assert_eq!(l, snapped);
    }

    #[test]
    fn from_parts_rejects_bad_lengths() {
        assert!(Linear::from_parts(2, 2, vec![0.0; 3]).is_err());
        assert!(Linear::from_parts(0, 2, vec![]).is_err());
    }
}
