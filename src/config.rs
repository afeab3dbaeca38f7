//! Run configuration.
//!
//! A `RunConfig` fully describes one training instance. It is validated once,
//! before any instance is constructed; after that the only mutation path is
//! [`crate::Search::set_epochs`].
//!
//! `SweepConfig` expands hyperparameter lists into independent instances, each
//! with its own seed and output directory.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::path::PathBuf;

use crate::{Error, Result, UpdateRule, format};

/// Operand shapes: `A` is `(m, n)`, `B` is `(n, k)`, `C = A * B` is `(m, k)`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dims {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl Dims {
    pub fn new(m: usize, n: usize, k: usize) -> Result<Self> {
        if m == 0 || n == 0 || k == 0 {
            return Err(Error::InvalidConfig(format!(
                "matrix dimensions must be > 0, got {m} {n} {k}"
            )));
        }
        Ok(Self { m, n, k })
    }

    /// Parse a dimension list: one value (square) or exactly three.
    pub fn parse(values: &[usize]) -> Result<Self> {
        match *values {
            [s] => Self::new(s, s, s),
            [m, n, k] => Self::new(m, n, k),
            _ => Err(Error::InvalidConfig(format!(
                "expected 1 or 3 matrix dimensions, got {}",
                values.len()
            ))),
        }
    }

    #[inline]
    pub fn a_len(&self) -> usize {
        self.m * self.n
    }

    #[inline]
    pub fn b_len(&self) -> usize {
        self.n * self.k
    }

    #[inline]
    pub fn c_len(&self) -> usize {
        self.m * self.k
    }

    /// Smallest rank accepted for these dimensions: `max(m, n, k)^2`.
    #[inline]
    pub fn min_rank(&self) -> usize {
        let d = self.m.max(self.n).max(self.k);
        d * d
    }
}

impl std::fmt::Display for Dims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.m, self.n, self.k)
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub dims: Dims,
    /// Hidden width, i.e. the multiplication count being searched for.
    pub rank: usize,
    pub seed: u64,
    pub epochs: usize,
    pub training_size: usize,
    pub test_size: usize,
    pub learning_rate: f64,
    pub regularization: f64,
    /// Range scale for evaluation operands.
    pub range_scale: f64,
    pub exp_id: usize,
    /// Checkpoints are written only while out-of-sample error is below this.
    pub threshold_error_out: f64,
    pub update_rule: UpdateRule,
    /// Stop at the first epoch with a non-finite error.
    pub halt_on_divergence: bool,
    pub output_root: PathBuf,
    pub comment: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dims: Dims { m: 2, n: 2, k: 2 },
            rank: 7,
            seed: 0,
            epochs: 1000,
            training_size: 10_000,
            test_size: 1000,
            learning_rate: 1e-2,
            regularization: 0.0,
            range_scale: 1.0,
            exp_id: 0,
            threshold_error_out: 1e-4,
            update_rule: UpdateRule::default(),
            halt_on_divergence: false,
            output_root: PathBuf::from("data"),
            comment: String::new(),
        }
    }
}

impl RunConfig {
    /// Validate every field.
    pub fn validate(&self) -> Result<()> {
        Dims::new(self.dims.m, self.dims.n, self.dims.k)?;

        if self.rank < self.dims.min_rank() {
            return Err(Error::InvalidConfig(format!(
                "rank estimate {} is below the lower limit {} for dimensions {}",
                self.rank,
                self.dims.min_rank(),
                self.dims
            )));
        }
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        if self.training_size == 0 {
            return Err(Error::InvalidConfig("training_size must be > 0".to_owned()));
        }
        if self.test_size == 0 {
            return Err(Error::InvalidConfig("test_size must be > 0".to_owned()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be finite and > 0, got {}",
                self.learning_rate
            )));
        }
        if !(self.regularization.is_finite() && self.regularization >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "regularization must be finite and >= 0, got {}",
                self.regularization
            )));
        }
        if !(self.range_scale.is_finite() && self.range_scale > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "range scale must be finite and > 0, got {}",
                self.range_scale
            )));
        }
        if self.threshold_error_out.is_nan() {
            return Err(Error::InvalidConfig(
                "error threshold must not be NaN".to_owned(),
            ));
        }
        self.update_rule.validate()
    }

    /// Per-step weight decay `lr * reg / training_size`.
    ///
    /// Scaled so one epoch applies a comparable total decay for any training size.
    #[inline]
    pub fn weight_decay(&self) -> f64 {
        self.learning_rate * self.regularization / self.training_size as f64
    }

    pub fn instance_dir_name(&self) -> String {
        format!(
            "rsf_{} lr_{} rp_{} seed_{} exp_id_{}",
            format::general(self.range_scale),
            format::general(self.learning_rate),
            format::general(self.regularization),
            self.seed,
            self.exp_id
        )
    }

    pub fn instance_dir(&self) -> PathBuf {
        self.output_root.join(self.instance_dir_name())
    }
}

/// A grid of runs sharing everything except the swept hyperparameters.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Template; its `seed` is the sweep's starting seed.
    pub base: RunConfig,
    pub range_scales: Vec<f64>,
    pub learning_rates: Vec<f64>,
    pub regularizations: Vec<f64>,
    pub repetitions: usize,
}

impl SweepConfig {
    /// Expand into one validated config per `{scale, lr, reg, repetition}`.
    ///
    /// The seed is advanced before each instance, so the first run uses
    /// `base.seed + 1`.
    pub fn expand(&self) -> Result<Vec<RunConfig>> {
        if self.range_scales.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one range scale factor is required".to_owned(),
            ));
        }
        if self.learning_rates.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one learning rate is required".to_owned(),
            ));
        }
        if self.regularizations.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one regularization parameter is required".to_owned(),
            ));
        }
        if self.repetitions == 0 {
            return Err(Error::InvalidConfig("repetitions must be > 0".to_owned()));
        }

        let mut seed = self.base.seed;
        let mut runs = Vec::with_capacity(
            self.range_scales.len()
                * self.learning_rates.len()
                * self.regularizations.len()
                * self.repetitions,
        );
        for &range_scale in &self.range_scales {
            for &learning_rate in &self.learning_rates {
                for &regularization in &self.regularizations {
                    for exp_id in 0..self.repetitions {
                        seed = seed.wrapping_add(1);
                        let cfg = RunConfig {
                            seed,
                            exp_id,
                            range_scale,
                            learning_rate,
                            regularization,
                            ..self.base.clone()
                        };
                        cfg.validate()?;
                        runs.push(cfg);
                    }
                }
            }
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dims_parse_accepts_one_or_three_values() {
        assert_eq!(Dims::parse(&[3]).unwrap(), Dims { m: 3, n: 3, k: 3 });
        assert_eq!(Dims::parse(&[2, 3, 4]).unwrap(), Dims { m: 2, n: 3, k: 4 });
        assert!(Dims::parse(&[2, 3]).is_err());
        assert!(Dims::parse(&[2, 2, 2, 2]).is_err());
        assert!(Dims::parse(&[2, 0, 2]).is_err());
    }

    #[test]
    fn rank_below_lower_limit_is_rejected() {
        let cfg = RunConfig {
            rank: 3,
            ..RunConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));

        let cfg = RunConfig {
            dims: Dims { m: 2, n: 2, k: 3 },
            rank: 8,
            ..RunConfig::default()
        };
        assert!(cfg.validate().is_err(), "max(m,n,k)^2 = 9");

        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_hyperparams() {
        let base = RunConfig::default();
        for cfg in [
            RunConfig { epochs: 0, ..base.clone() },
            RunConfig { training_size: 0, ..base.clone() },
            RunConfig { test_size: 0, ..base.clone() },
            RunConfig { learning_rate: 0.0, ..base.clone() },
            RunConfig { learning_rate: f64::NAN, ..base.clone() },
            RunConfig { regularization: -1.0, ..base.clone() },
            RunConfig { range_scale: 0.0, ..base.clone() },
            RunConfig { threshold_error_out: f64::NAN, ..base.clone() },
        ] {
            assert!(cfg.validate().is_err(), "{cfg:?}");
        }
    }

    #[test]
    fn weight_decay_scales_with_training_size() {
        let cfg = RunConfig {
            learning_rate: 0.1,
            regularization: 2.0,
            training_size: 4,
            ..RunConfig::default()
        };
        assert!((cfg.weight_decay() - 0.05).abs() < 1e-15);
    }

    #[test]
    fn instance_dir_name_uses_general_notation() {
        let cfg = RunConfig {
            range_scale: 1.0,
            learning_rate: 1e-2,
            regularization: 1e-8,
            seed: 3,
            exp_id: 2,
            ..RunConfig::default()
        };
        assert_eq!(
            cfg.instance_dir_name(),
            "rsf_1 lr_0.01 rp_1e-08 seed_3 exp_id_2"
        );
    }

    #[test]
    fn sweep_expands_in_nesting_order_with_increasing_seeds() {
        let sweep = SweepConfig {
            base: RunConfig {
                seed: 10,
                ..RunConfig::default()
            },
            range_scales: vec![1.0, 100.0],
            learning_rates: vec![1e-2, 1e-3],
            regularizations: vec![0.0],
            repetitions: 2,
        };
        let runs = sweep.expand().unwrap();
        assert_eq!(runs.len(), 8);
        assert_eq!(
            runs.iter().map(|r| r.seed).collect::<Vec<_>>(),
            (11..=18).collect::<Vec<_>>()
        );
        assert_eq!(runs[0].exp_id, 0);
        assert_eq!(runs[1].exp_id, 1);
        assert_eq!(runs[2].learning_rate, 1e-3);
        assert_eq!(runs[4].range_scale, 100.0);
    }

    #[test]
    fn sweep_rejects_empty_lists() {
        let sweep = SweepConfig {
            base: RunConfig::default(),
            range_scales: vec![],
            learning_rates: vec![1e-2],
            regularizations: vec![0.0],
            repetitions: 1,
        };
        assert!(sweep.expand().is_err());
    }
}
