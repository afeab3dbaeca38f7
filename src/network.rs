//! The bilinear network.
//!
//! `C = A * B` is modeled as
//!
//! ```text
//! s1A = W1A * vec(A)        (R x m*n)
//! s1B = W1B * vec(B)        (R x n*k)
//! x1  = s1A ⊙ s1B           (elementwise)
//! x2  = W2 * x1             (m*k x R)
//! ```
//!
//! Each hidden unit is the product of one linear form in `A` and one in `B`,
//! i.e. one scalar multiplication of a bilinear algorithm. Integer weights with
//! zero residual are an exact rank-`R` algorithm.
//!
//! `vec` is column-major throughout, for operands and for the target product.
//!
//! Gradients are derived by hand for this fixed graph. `forward` and
//! `backward` reuse buffers owned by the network and are not reentrant.

use rand::Rng;

use crate::matmul::matmul_col_major;
use crate::{Dims, Error, Linear, Result, Updaters};

/// The three weight matrices defining a (candidate) bilinear algorithm.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightSet {
    /// `(R, m*n)`
    pub w1a: Linear,
    /// `(R, n*k)`
    pub w1b: Linear,
    /// `(m*k, R)`
    pub w2: Linear,
}

impl WeightSet {
    /// Uniform `[-1, 1)` initialization.
    pub fn random<R: Rng + ?Sized>(dims: Dims, rank: usize, rng: &mut R) -> Self {
        let w1a = Linear::uniform(dims.a_len(), rank, rng);
        let w1b = Linear::uniform(dims.b_len(), rank, rng);
        let w2 = Linear::uniform(rank, dims.c_len(), rng);
        Self { w1a, w1b, w2 }
    }

    /// Strassen's rank-7 algorithm for `2x2x2`, in column-major `vec` order.
    pub fn strassen() -> Self {
        let w1a = Linear::from_rows(&[
            [0.0, 1.0, 0.0, -1.0],
            [0.0, 0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0, 0.0],
            [-1.0, 0.0, 1.0, 0.0],
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 0.0, 1.0, 1.0],
            [1.0, 1.0, 0.0, 0.0],
        ]);
        let w1b = Linear::from_rows(&[
            [1.0, 0.0, 0.0, 0.0],
            [1.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 1.0],
            [0.0, 0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 1.0, 0.0, -1.0],
            [1.0, 0.0, -1.0, 0.0],
        ]);
        let w2 = Linear::from_rows(&[
            [0.0, -1.0, 0.0, 1.0, 1.0, 1.0, 0.0],
            [1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0],
            [1.0, 0.0, -1.0, 0.0, 1.0, 0.0, -1.0],
        ]);
        Self::from_static(w1a, w1b, w2)
    }

    /// [`WeightSet::strassen`] with a handful of entries perturbed.
    ///
    /// Rounds back to the exact solution; useful for warm-start experiments.
    pub fn near_strassen() -> Self {
        let w1a = Linear::from_rows(&[
            [0.0, 1.1, 0.0, -1.2],
            [0.3, 0.0, 0.4, 1.0],
            [1.0, 0.0, 0.0, 0.0],
            [-1.0, 0.0, 1.0, 0.0],
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 0.2, 1.3, 1.0],
            [1.3, 1.0, 0.0, -0.2],
        ]);
        let w1b = Linear::from_rows(&[
            [1.0, 0.2, 0.0, -0.1],
            [1.0, 1.0, 0.0, 0.0],
            [0.2, 0.0, 1.3, 1.0],
            [0.0, 0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 1.0, 0.0, -1.0],
            [1.1, 0.3, -1.0, 0.0],
        ]);
        let w2 = Linear::from_rows(&[
            [0.0, -1.3, 0.0, 1.0, 1.0, 1.0, 0.0],
            [1.0, 1.0, 0.2, 0.4, 0.0, 0.0, 0.0],
            [0.1, 0.0, 1.0, 1.0, 0.0, 0.2, 0.0],
            [1.1, 0.0, -1.2, 0.0, 1.3, 0.0, -1.0],
        ]);
        Self::from_static(w1a, w1b, w2)
    }

    fn from_static(w1a: Result<Linear>, w1b: Result<Linear>, w2: Result<Linear>) -> Self {
        match (w1a, w1b, w2) {
            (Ok(w1a), Ok(w1b), Ok(w2)) => Self { w1a, w1b, w2 },
            _ => unreachable!("static weight tables are non-empty and rectangular"),
        }
    }

    /// The rank (hidden width) these weights encode.
    #[inline]
    pub fn rank(&self) -> usize {
        self.w2.in_dim()
    }

    /// Check that the shapes match `dims` and `rank`.
    pub fn validate(&self, dims: Dims, rank: usize) -> Result<()> {
        let check = |name: &str, l: &Linear, out_dim: usize, in_dim: usize| {
            if l.out_dim() != out_dim || l.in_dim() != in_dim {
                return Err(Error::InvalidShape(format!(
                    "{name} has shape ({}, {}), expected ({out_dim}, {in_dim}) for {dims} rank {rank}",
                    l.out_dim(),
                    l.in_dim()
                )));
            }
            Ok(())
        };
        check("W1A", &self.w1a, rank, dims.a_len())?;
        check("W1B", &self.w1b, rank, dims.b_len())?;
        check("W2", &self.w2, dims.c_len(), rank)
    }

    /// Snap all weights to the nearest integer.
    pub fn round(&mut self) {
        self.w1a.round();
        self.w1b.round();
        self.w2.round();
    }

    pub fn is_integral(&self) -> bool {
        self.w1a.is_integral() && self.w1b.is_integral() && self.w2.is_integral()
    }

    pub fn is_finite(&self) -> bool {
        self.w1a.is_finite() && self.w1b.is_finite() && self.w2.is_finite()
    }

    /// Number of nonzero coefficients across all three matrices.
    pub fn nnz(&self) -> usize {
        [&self.w1a, &self.w1b, &self.w2]
            .iter()
            .map(|l| l.weights().iter().filter(|w| **w != 0.0).count())
            .sum()
    }
}

/// Per-sample forward state (overwritten by each `forward`).
#[derive(Debug, Clone)]
pub struct Activations {
    pub x0a: Vec<f64>,
    pub x0b: Vec<f64>,
    pub s1a: Vec<f64>,
    pub s1b: Vec<f64>,
    pub x1: Vec<f64>,
    pub x2: Vec<f64>,
    /// `x2 - vec(A * B)`
    pub delta2: Vec<f64>,
    target: Vec<f64>,
}

/// Per-sample backward state (overwritten by each `backward`).
#[derive(Debug, Clone)]
pub struct Sensitivities {
    pub delta1a: Vec<f64>,
    pub delta1b: Vec<f64>,
    temp: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct BilinearNetwork {
    dims: Dims,
    weights: WeightSet,
    act: Activations,
    sens: Sensitivities,
    // Set by `forward`, consumed by `backward`.
    forward_done: bool,
}

impl BilinearNetwork {
    pub fn new(dims: Dims, weights: WeightSet) -> Result<Self> {
        let rank = weights.rank();
        if rank == 0 {
            return Err(Error::InvalidShape("rank must be > 0".to_owned()));
        }
        weights.validate(dims, rank)?;

        let act = Activations {
            x0a: vec![0.0; dims.a_len()],
            x0b: vec![0.0; dims.b_len()],
            s1a: vec![0.0; rank],
            s1b: vec![0.0; rank],
            x1: vec![0.0; rank],
            x2: vec![0.0; dims.c_len()],
            delta2: vec![0.0; dims.c_len()],
            target: vec![0.0; dims.c_len()],
        };
        let sens = Sensitivities {
            delta1a: vec![0.0; rank],
            delta1b: vec![0.0; rank],
            temp: vec![0.0; rank],
        };

        Ok(Self {
            dims,
            weights,
            act,
            sens,
            forward_done: false,
        })
    }

    #[inline]
    pub fn dims(&self) -> Dims {
        self.dims
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.weights.rank()
    }

    #[inline]
    pub fn weights(&self) -> &WeightSet {
        &self.weights
    }

    #[inline]
    pub fn weights_mut(&mut self) -> &mut WeightSet {
        &mut self.weights
    }

    /// Replace the weights; shapes must match.
    pub fn set_weights(&mut self, weights: WeightSet) -> Result<()> {
        weights.validate(self.dims, self.rank())?;
        self.weights = weights;
        self.forward_done = false;
        Ok(())
    }

    #[inline]
    pub fn activations(&self) -> &Activations {
        &self.act
    }

    #[inline]
    pub fn sensitivities(&self) -> &Sensitivities {
        &self.sens
    }

    /// Forward pass for one operand pair, returning the squared residual norm.
    ///
    /// `a` and `b` are column-major `(m, n)` and `(n, k)`. The loss is a sum,
    /// not a mean.
    ///
    /// Panics if the operand lengths do not match the configured dimensions.
    pub fn forward(&mut self, a: &[f64], b: &[f64]) -> f64 {
        assert_eq!(
            a.len(),
            self.dims.a_len(),
            "operand A len {} does not match m*n = {}",
            a.len(),
            self.dims.a_len()
        );
        assert_eq!(
            b.len(),
            self.dims.b_len(),
            "operand B len {} does not match n*k = {}",
            b.len(),
            self.dims.b_len()
        );

        let act = &mut self.act;
        act.x0a.copy_from_slice(a);
        act.x0b.copy_from_slice(b);

        self.weights.w1a.forward(&act.x0a, &mut act.s1a);
        self.weights.w1b.forward(&act.x0b, &mut act.s1b);

        for ((x, sa), sb) in act.x1.iter_mut().zip(&act.s1a).zip(&act.s1b) {
            *x = sa * sb;
        }

        self.weights.w2.forward(&act.x1, &mut act.x2);

        let Dims { m, n, k } = self.dims;
        matmul_col_major(m, n, k, a, b, &mut act.target);

        let mut loss = 0.0;
        for ((d, y), t) in act.delta2.iter_mut().zip(&act.x2).zip(&act.target) {
            *d = y - t;
            loss = d.mul_add(*d, loss);
        }

        self.forward_done = true;
        loss
    }

    /// Backward pass for the sample seen by the last `forward`.
    ///
    /// Computes `temp = W2^T * delta2`, `delta1A = s1B ⊙ temp`,
    /// `delta1B = s1A ⊙ temp`.
    ///
    /// Panics if no `forward` has run since construction or the last weight
    /// replacement.
    pub fn backward(&mut self) {
        assert!(self.forward_done, "backward called before forward");

        let act = &self.act;
        let sens = &mut self.sens;

        self.weights
            .w2
            .forward_transposed(&act.delta2, &mut sens.temp);

        for (((da, db), t), (sa, sb)) in sens
            .delta1a
            .iter_mut()
            .zip(sens.delta1b.iter_mut())
            .zip(&sens.temp)
            .zip(act.s1a.iter().zip(&act.s1b))
        {
            *da = sb * t;
            *db = sa * t;
        }
    }

    /// Apply one update to all three matrices from the current activations
    /// and sensitivities.
    ///
    /// Order: `W2` from `(delta2, x1)`, `W1A` from `(delta1A, x0A)`,
    /// `W1B` from `(delta1B, x0B)`.
    pub fn update(&mut self, updaters: &mut Updaters, lr: f64, decay: f64) {
        let act = &self.act;
        let sens = &self.sens;
        let w = &mut self.weights;

        updaters.w2.step(&act.delta2, &act.x1, &mut w.w2, lr, decay);
        updaters
            .w1a
            .step(&sens.delta1a, &act.x0a, &mut w.w1a, lr, decay);
        updaters
            .w1b
            .step(&sens.delta1b, &act.x0b, &mut w.w1b, lr, decay);
    }

    /// Snap all weights to the nearest integer.
    pub fn round_weights(&mut self) {
        self.weights.round();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::UpdateRule;

    fn d222() -> Dims {
        Dims::new(2, 2, 2).unwrap()
    }

    fn col_major(rows: &[&[f64]]) -> Vec<f64> {
        let cols = rows[0].len();
        (0..cols)
            .flat_map(|j| rows.iter().map(move |r| r[j]))
            .collect()
    }

    /// Loss recomputed from scratch, without reusing network buffers.
    fn reference_loss(w: &WeightSet, dims: Dims, a: &[f64], b: &[f64]) -> f64 {
        let mut s1a = vec![0.0; w.rank()];
        let mut s1b = vec![0.0; w.rank()];
        w.w1a.forward(a, &mut s1a);
        w.w1b.forward(b, &mut s1b);
        let x1: Vec<f64> = s1a.iter().zip(&s1b).map(|(p, q)| p * q).collect();
        let mut x2 = vec![0.0; dims.c_len()];
        w.w2.forward(&x1, &mut x2);

        let mut loss = 0.0;
        for j in 0..dims.k {
            for i in 0..dims.m {
                let mut c = 0.0;
                for p in 0..dims.n {
                    c += a[i + p * dims.m] * b[p + j * dims.n];
                }
                let r = x2[i + j * dims.m] - c;
                loss += r * r;
            }
        }
        loss
    }

    #[test]
    fn strassen_weights_multiply_exactly() {
        let mut net = BilinearNetwork::new(d222(), WeightSet::strassen()).unwrap();
        let a = col_major(&[&[1.0, 2.0], &[3.0, 4.0]]);
        let b = col_major(&[&[5.0, 6.0], &[7.0, 8.0]]);
        let loss = net.forward(&a, &b);
        assert!(loss < 1e-10, "loss={loss}");
        assert_eq!(net.activations().x2, vec![19.0, 43.0, 22.0, 50.0]);

        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..100 {
            let a: Vec<f64> = (0..4).map(|_| rng.random_range(-10.0..10.0)).collect();
            let b: Vec<f64> = (0..4).map(|_| rng.random_range(-10.0..10.0)).collect();
            let loss = net.forward(&a, &b);
            assert!(loss < 1e-10, "loss={loss}");
        }
    }

    #[test]
    fn near_strassen_rounds_to_strassen() {
        let mut w = WeightSet::near_strassen();
        assert!(!w.is_integral());
        w.round();
        assert_eq!(w, WeightSet::strassen());
        assert_eq!(w.nnz(), 36);
    }

    #[test]
    fn forward_matches_closed_form_on_random_weights() {
        let dims = Dims::new(2, 3, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let w = WeightSet::random(dims, 9, &mut rng);
        let mut net = BilinearNetwork::new(dims, w.clone()).unwrap();

        for _ in 0..10 {
            let a: Vec<f64> = (0..6).map(|_| rng.random_range(-1.0..1.0)).collect();
            let b: Vec<f64> = (0..6).map(|_| rng.random_range(-1.0..1.0)).collect();
            let got = net.forward(&a, &b);
            let want = reference_loss(&w, dims, &a, &b);
            assert!(got >= 0.0);
            assert!((got - want).abs() <= 1e-12 * want.max(1.0), "{got} vs {want}");
        }
    }

    #[test]
    fn backward_matches_numeric_gradients() {
        // dLoss/dW = 2 * delta * x^T; the sensitivities drop the factor 2.
        let dims = Dims::new(2, 2, 3).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let w = WeightSet::random(dims, 9, &mut rng);
        let a: Vec<f64> = (0..4).map(|_| rng.random_range(-1.0..1.0)).collect();
        let b: Vec<f64> = (0..6).map(|_| rng.random_range(-1.0..1.0)).collect();

        let mut net = BilinearNetwork::new(dims, w.clone()).unwrap();
        net.forward(&a, &b);
        net.backward();

        let eps = 1e-6;
        let act = net.activations().clone();
        let sens = net.sensitivities().clone();

        let numeric = |which: usize, idx: usize| {
            let perturbed = |step: f64| {
                let mut ws = w.clone();
                let l = match which {
                    0 => &mut ws.w1a,
                    1 => &mut ws.w1b,
                    _ => &mut ws.w2,
                };
                l.weights_mut()[idx] += step;
                reference_loss(&ws, dims, &a, &b)
            };
            (perturbed(eps) - perturbed(-eps)) / (2.0 * eps)
        };

        for r in 0..9 {
            for c in 0..4 {
                let num = numeric(0, r * 4 + c);
                let ana = 2.0 * sens.delta1a[r] * act.x0a[c];
                assert!((num - ana).abs() < 1e-5, "W1A[{r},{c}] {num} vs {ana}");
            }
            for c in 0..6 {
                let num = numeric(1, r * 6 + c);
                let ana = 2.0 * sens.delta1b[r] * act.x0b[c];
                assert!((num - ana).abs() < 1e-5, "W1B[{r},{c}] {num} vs {ana}");
            }
        }
        for r in 0..6 {
            for c in 0..9 {
                let num = numeric(2, r * 9 + c);
                let ana = 2.0 * act.delta2[r] * act.x1[c];
                assert!((num - ana).abs() < 1e-5, "W2[{r},{c}] {num} vs {ana}");
            }
        }
    }

    #[test]
    fn update_moves_weights_downhill() {
        let mut rng = StdRng::seed_from_u64(21);
        let w = WeightSet::random(d222(), 7, &mut rng);
        let mut net = BilinearNetwork::new(d222(), w).unwrap();
        let mut upd = Updaters::new(UpdateRule::MOMENTUM, net.weights()).unwrap();

        let a = [0.3, -0.2, 0.5, 0.1];
        let b = [-0.4, 0.2, 0.1, 0.6];
        let before = net.forward(&a, &b);
        net.backward();
        net.update(&mut upd, 1e-3, 0.0);
        let after = net.forward(&a, &b);
        assert!(after < before, "{after} >= {before}");
    }

    #[test]
    fn set_weights_rejects_wrong_shapes() {
        let mut net = BilinearNetwork::new(d222(), WeightSet::strassen()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let wrong = WeightSet::random(Dims::new(3, 3, 3).unwrap(), 9, &mut rng);
        assert!(net.set_weights(wrong).is_err());
        assert!(BilinearNetwork::new(Dims::new(2, 2, 3).unwrap(), WeightSet::strassen()).is_err());
    }

    #[test]
    #[should_panic(expected = "backward called before forward")]
    fn backward_requires_forward() {
        let mut net = BilinearNetwork::new(d222(), WeightSet::strassen()).unwrap();
        net.backward();
    }

    #[test]
    #[should_panic]
    fn forward_panics_on_operand_shape_mismatch() {
        let mut net = BilinearNetwork::new(d222(), WeightSet::strassen()).unwrap();
        net.forward(&[0.0; 3], &[0.0; 4]);
    }
}
