//! Synthetic operand generation.
//!
//! There is no fixed corpus: every epoch draws fresh operand pairs, so the
//! search objective is the whole distribution of matrices rather than a sample.
//! `OperandBatch` keeps the pairs in contiguous, column-major storage so an
//! epoch can be regenerated in place without allocating.

use rand::Rng;

use crate::Dims;

/// Range scale of training operands, independent of the evaluation range.
pub const TRAINING_RANGE_SCALE: f64 = 2.0;

/// A batch of `(A, B)` operand pairs.
///
/// Stored as contiguous buffers:
/// - `a.len() == len * dims.a_len()`, each `A_i` flattened column-major
/// - `b.len() == len * dims.b_len()`, each `B_i` flattened column-major
#[derive(Debug, Clone)]
pub struct OperandBatch {
    dims: Dims,
    len: usize,
    a: Vec<f64>,
    b: Vec<f64>,
}

impl OperandBatch {
    /// Draw `count` pairs with entries uniform in `[-range_scale, range_scale)`.
    pub fn generate<R: Rng + ?Sized>(
        count: usize,
        dims: Dims,
        range_scale: f64,
        rng: &mut R,
    ) -> Self {
        let mut batch = Self::zeros(count, dims);
        batch.refill(range_scale, rng);
        batch
    }

    /// Draw `count` pairs with entries uniform in `[-scale * upper, scale * upper)`.
    pub fn generate_bounded<R: Rng + ?Sized>(
        count: usize,
        dims: Dims,
        scale: f64,
        upper: f64,
        rng: &mut R,
    ) -> Self {
        Self::generate(count, dims, scale * upper, rng)
    }

    /// An all-zero batch; call [`OperandBatch::refill`] before use.
    pub fn zeros(count: usize, dims: Dims) -> Self {
        Self {
            dims,
            len: count,
            a: vec![0.0; count * dims.a_len()],
            b: vec![0.0; count * dims.b_len()],
        }
    }

    /// Regenerate every pair in place.
    ///
    /// All `A` entries are drawn before all `B` entries, so a batch is fully
    /// determined by the RNG state on entry.
    pub fn refill<R: Rng + ?Sized>(&mut self, range_scale: f64, rng: &mut R) {
        fill_uniform(&mut self.a, range_scale, rng);
        fill_uniform(&mut self.b, range_scale, rng);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// Returns the `idx`-th left operand, column-major `(m, n)`.
    ///
    /// Panics if `idx >= len`.
    #[inline]
    pub fn a(&self, idx: usize) -> &[f64] {
        let w = self.dims.a_len();
        &self.a[idx * w..(idx + 1) * w]
    }

    /// Returns the `idx`-th right operand, column-major `(n, k)`.
    ///
    /// Panics if `idx >= len`.
    #[inline]
    pub fn b(&self, idx: usize) -> &[f64] {
        let w = self.dims.b_len();
        &self.b[idx * w..(idx + 1) * w]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[f64], &[f64])> {
        self.a
            .chunks_exact(self.dims.a_len())
            .zip(self.b.chunks_exact(self.dims.b_len()))
    }
}

/// Map `u ~ U[0, 1)` affinely onto `[-scale, scale)`.
fn fill_uniform<R: Rng + ?Sized>(buf: &mut [f64], scale: f64, rng: &mut R) {
    for v in buf {
        let u: f64 = rng.random();
        *v = 2.0 * scale * u - scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn dims() -> Dims {
        Dims::new(2, 3, 4).unwrap()
    }

    #[test]
    fn generated_entries_respect_range() {
        let mut rng = StdRng::seed_from_u64(1);
        let batch = OperandBatch::generate(200, dims(), 3.0, &mut rng);
        assert_eq!(batch.len(), 200);
        for (a, b) in batch.iter() {
            assert_eq!(a.len(), 6);
            assert_eq!(b.len(), 12);
            assert!(a.iter().chain(b).all(|v| (-3.0..3.0).contains(v)));
        }
        // 3600 draws should reach both tails of the interval.
        let (lo, hi) = batch
            .iter()
            .flat_map(|(a, b)| a.iter().chain(b))
            .fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        assert!(lo < -2.9 && hi > 2.9, "lo={lo} hi={hi}");
    }

    #[test]
    fn bounded_overload_scales_by_upper() {
        let mut rng = StdRng::seed_from_u64(2);
        let batch = OperandBatch::generate_bounded(50, dims(), 0.5, 10.0, &mut rng);
        for (a, b) in batch.iter() {
            assert!(a.iter().chain(b).all(|v| (-5.0..5.0).contains(v)));
        }
    }

    #[test]
    fn same_seed_same_batch_and_refill_draws_fresh_pairs() {
        let mut r1 = StdRng::seed_from_u64(9);
        let mut r2 = StdRng::seed_from_u64(9);
        let mut b1 = OperandBatch::generate(10, dims(), 1.0, &mut r1);
        let b2 = OperandBatch::generate(10, dims(), 1.0, &mut r2);
        assert_eq!(b1.a(3), b2.a(3));
        assert_eq!(b1.b(9), b2.b(9));

        let before = b1.a(0).to_vec();
        b1.refill(1.0, &mut r1);
        assert_ne!(b1.a(0), before.as_slice());
    }
}
