//! Weight update rules.
//!
//! Each weight matrix gets its own [`UpdaterState`], built from the run's
//! [`UpdateRule`]. A step consumes the layer's sensitivity `delta` and its
//! input activation `x`; the per-sample gradient is the outer product
//! `dW = delta * x^T`, which is never materialized.
//!
//! Both rules apply decoupled weight decay `W <- W - decay * W` after the
//! gradient step.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Error, Linear, Result};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq)]
/// Update rule for a run.
pub enum UpdateRule {
    /// SGD with momentum: `v = beta * v + lr * dW`, `W <- W - v - decay * W`.
    Momentum { beta: f64 },
    /// Adam (bias-corrected).
    Adam { beta1: f64, beta2: f64, eps: f64 },
}

impl Default for UpdateRule {
    fn default() -> Self {
        UpdateRule::MOMENTUM
    }
}

impl UpdateRule {
    pub const MOMENTUM: UpdateRule = UpdateRule::Momentum { beta: 0.9 };
    pub const ADAM: UpdateRule = UpdateRule::Adam {
        beta1: 0.9,
        beta2: 0.999,
        eps: 1e-8,
    };

    /// Validate hyperparameters: decay rates in `[0, 1)`, `eps > 0`.
    pub fn validate(self) -> Result<()> {
        let decay_rate = |what: &str, v: f64| {
            if v.is_finite() && (0.0..1.0).contains(&v) {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!(
                    "{what} must lie in [0, 1), got {v}"
                )))
            }
        };
        match self {
            UpdateRule::Momentum { beta } => decay_rate("momentum beta", beta),
            UpdateRule::Adam { beta1, beta2, eps } => {
                decay_rate("adam beta1", beta1)?;
                decay_rate("adam beta2", beta2)?;
                if eps.is_finite() && eps > 0.0 {
                    Ok(())
                } else {
                    Err(Error::InvalidConfig(format!("adam eps must be > 0, got {eps}")))
                }
            }
        }
    }

    /// Allocate zeroed state for a weight matrix with shape `(out_dim, in_dim)`.
    pub fn state(self, out_dim: usize, in_dim: usize) -> Result<UpdaterState> {
        self.validate()?;

        let len = out_dim * in_dim;
        Ok(match self {
            UpdateRule::Momentum { beta } => UpdaterState::Momentum {
                beta,
                velocity: vec![0.0; len],
            },
            UpdateRule::Adam { beta1, beta2, eps } => UpdaterState::Adam {
                beta1,
                beta2,
                eps,
                t: 0,
                beta1_pow: 1.0,
                beta2_pow: 1.0,
                m: vec![0.0; len],
                s: vec![0.0; len],
            },
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            UpdateRule::Momentum { .. } => "momentum",
            UpdateRule::Adam { .. } => "adam",
        }
    }
}

impl std::str::FromStr for UpdateRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "momentum" | "sgdm" => Ok(UpdateRule::MOMENTUM),
            "adam" => Ok(UpdateRule::ADAM),
            other => Err(Error::InvalidConfig(format!(
                "unknown update method '{other}', expected 'momentum' or 'adam'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
/// Owned per-matrix optimizer state.
pub enum UpdaterState {
    Momentum {
        beta: f64,
        velocity: Vec<f64>,
    },
    Adam {
        beta1: f64,
        beta2: f64,
        eps: f64,
        t: u64,
        beta1_pow: f64,
        beta2_pow: f64,
        m: Vec<f64>,
        s: Vec<f64>,
    },
}

impl UpdaterState {
    /// Apply one update to `w` from sensitivity `delta` (len `out_dim`) and
    /// input activation `x` (len `in_dim`).
    pub fn step(&mut self, delta: &[f64], x: &[f64], w: &mut Linear, lr: f64, decay: f64) {
        assert_eq!(
            delta.len(),
            w.out_dim(),
            "delta len {} does not match out_dim {}",
            delta.len(),
            w.out_dim()
        );
        assert_eq!(
            x.len(),
            w.in_dim(),
            "x len {} does not match in_dim {}",
            x.len(),
            w.in_dim()
        );

        let in_dim = w.in_dim();
        let weights = w.weights_mut();

        match self {
            UpdaterState::Momentum { beta, velocity } => {
                debug_assert_eq!(velocity.len(), weights.len());

                for (o, &d) in delta.iter().enumerate() {
                    let row = o * in_dim;
                    for (i, &xi) in x.iter().enumerate() {
                        let g = d * xi;
                        let v = &mut velocity[row + i];
                        *v = (*beta) * *v + lr * g;
                        let wi = &mut weights[row + i];
                        *wi -= *v + decay * *wi;
                    }
                }
            }
            UpdaterState::Adam {
                beta1,
                beta2,
                eps,
                t,
                beta1_pow,
                beta2_pow,
                m,
                s,
            } => {
                debug_assert_eq!(m.len(), weights.len());
                debug_assert_eq!(s.len(), weights.len());

                *t += 1;
                *beta1_pow *= *beta1;
                *beta2_pow *= *beta2;

                let one_minus_beta1 = 1.0 - *beta1;
                let one_minus_beta2 = 1.0 - *beta2;
                let corr1 = 1.0 - *beta1_pow;
                let corr2 = 1.0 - *beta2_pow;

                for (o, &d) in delta.iter().enumerate() {
                    let row = o * in_dim;
                    for (i, &xi) in x.iter().enumerate() {
                        let idx = row + i;
                        let g = d * xi;
                        m[idx] = (*beta1) * m[idx] + one_minus_beta1 * g;
                        s[idx] = (*beta2) * s[idx] + one_minus_beta2 * (g * g);

                        let m_hat = m[idx] / corr1;
                        let s_hat = s[idx] / corr2;
                        let wi = &mut weights[idx];
                        *wi -= lr * (m_hat / (s_hat.sqrt() + *eps)) + decay * *wi;
                    }
                }
            }
        }
    }

    /// Zero the moments and restart bias correction.
    pub fn reset(&mut self) {
        match self {
            UpdaterState::Momentum { velocity, .. } => velocity.fill(0.0),
            UpdaterState::Adam {
                t,
                beta1_pow,
                beta2_pow,
                m,
                s,
                ..
            } => {
                *t = 0;
                *beta1_pow = 1.0;
                *beta2_pow = 1.0;
                m.fill(0.0);
                s.fill(0.0);
            }
        }
    }

    /// Number of steps taken (Adam only; momentum has no step counter).
    pub fn steps(&self) -> Option<u64> {
        match self {
            UpdaterState::Momentum { .. } => None,
            UpdaterState::Adam { t, .. } => Some(*t),
        }
    }
}

/// Updater states for the three weight matrices of a bilinear network.
#[derive(Debug, Clone)]
pub struct Updaters {
    pub w2: UpdaterState,
    pub w1a: UpdaterState,
    pub w1b: UpdaterState,
}

impl Updaters {
    pub fn new(rule: UpdateRule, weights: &crate::WeightSet) -> Result<Self> {
        Ok(Self {
            w2: rule.state(weights.w2.out_dim(), weights.w2.in_dim())?,
            w1a: rule.state(weights.w1a.out_dim(), weights.w1a.in_dim())?,
            w1b: rule.state(weights.w1b.out_dim(), weights.w1b.in_dim())?,
        })
    }

    pub fn reset(&mut self) {
        self.w2.reset();
        self.w1a.reset();
        self.w1b.reset();
    }
}
