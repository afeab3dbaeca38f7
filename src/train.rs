//! The training loop.
//!
//! One epoch:
//! 1. draw a fresh training batch (range [`TRAINING_RANGE_SCALE`]),
//! 2. per sample: forward, accumulate loss, backward, update (online SGD),
//! 3. round every weight to the nearest integer,
//! 4. record the in-sample error,
//! 5. evaluate on a fresh test batch (range `RunConfig::range_scale`),
//! 6. checkpoint if the out-of-sample error is below threshold and improved.
//!
//! After the last epoch the final weights and the error trace are written.
//!
//! Optimizer state is not reset after rounding: the next epoch continues
//! with velocities/moments accumulated on the pre-rounding weights.

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::data::TRAINING_RANGE_SCALE;
use crate::{
    BilinearNetwork, Error, ErrorTrace, OperandBatch, Result, RunConfig, RunSink, Updaters, WeightSet,
};

/// Summary of a completed (or halted) run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub epochs_run: usize,
    /// Epochs at which a checkpoint was written.
    pub checkpoints: Vec<usize>,
    pub best_out_sample: Option<(usize, f64)>,
    /// First epoch with a non-finite error, if any.
    pub diverged_at: Option<usize>,
    pub final_in_sample: f64,
    pub final_out_sample: f64,
}

/// Errors measured during one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    pub in_sample: f64,
    pub out_sample: f64,
}

/// One training instance: network, optimizer state, RNG and error history.
///
/// Instances share nothing; run as many concurrently as needed.
#[derive(Debug, Clone)]
pub struct Search {
    config: RunConfig,
    net: BilinearNetwork,
    updaters: Updaters,
    rng: StdRng,
    trace: ErrorTrace,
    train_set: OperandBatch,
    test_set: OperandBatch,
}

impl Search {
    /// Validate `config` and initialize weights uniformly in `[-1, 1)`.
    ///
    /// The RNG is seeded from `config.seed` here; initialization and every
    /// later batch derive from it.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let weights = WeightSet::random(config.dims, config.rank, &mut rng);
        Self::assemble(config, weights, rng)
    }

    /// Start from the given weights instead of a random initialization.
    pub fn with_weights(config: RunConfig, weights: WeightSet) -> Result<Self> {
        config.validate()?;
        weights.validate(config.dims, config.rank)?;
        let rng = StdRng::seed_from_u64(config.seed);
        Self::assemble(config, weights, rng)
    }

    fn assemble(config: RunConfig, weights: WeightSet, rng: StdRng) -> Result<Self> {
        let updaters = Updaters::new(config.update_rule, &weights)?;
        let net = BilinearNetwork::new(config.dims, weights)?;
        Ok(Self {
            trace: ErrorTrace::new(config.epochs),
            train_set: OperandBatch::zeros(config.training_size, config.dims),
            test_set: OperandBatch::zeros(config.test_size, config.dims),
            config,
            net,
            updaters,
            rng,
        })
    }

    #[inline]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    #[inline]
    pub fn network(&self) -> &BilinearNetwork {
        &self.net
    }

    #[inline]
    pub fn weights(&self) -> &WeightSet {
        self.net.weights()
    }

    #[inline]
    pub fn trace(&self) -> &ErrorTrace {
        &self.trace
    }

    #[inline]
    pub fn updaters(&self) -> &Updaters {
        &self.updaters
    }

    /// Change the epoch count for a warm restart.
    ///
    /// The trace is reset to exactly `epochs` unevaluated entries; weights and
    /// optimizer state are kept.
    pub fn set_epochs(&mut self, epochs: usize) {
        self.config.epochs = epochs;
        self.trace.resize(epochs);
    }

    /// Zero all optimizer state; weights and trace are untouched.
    pub fn reset_optimizer(&mut self) {
        self.updaters.reset();
    }

    /// Run every configured epoch, writing checkpoints and final outputs to `sink`.
    pub fn run<S: RunSink + ?Sized>(&mut self, sink: &mut S) -> Result<RunReport> {
        let epochs = self.config.epochs;
        if epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        log::info!(
            "starting run: dims {} rank {} seed {} epochs {} lr {} reg {} scale {} ({})",
            self.config.dims,
            self.config.rank,
            self.config.seed,
            epochs,
            self.config.learning_rate,
            self.config.regularization,
            self.config.range_scale,
            self.config.update_rule.name()
        );

        let mut checkpoints = Vec::new();
        let mut diverged_at = None;
        let mut epochs_run = 0;

        for epoch in 0..epochs {
            let report = self.run_epoch();
            self.trace.record(epoch, report.in_sample, report.out_sample);
            epochs_run = epoch + 1;

            log::debug!(
                "epoch {epoch}: e_in {:e} e_out {:e}",
                report.in_sample,
                report.out_sample
            );

            if self
                .trace
                .should_checkpoint(epoch, self.config.threshold_error_out)
            {
                log::info!(
                    "epoch {epoch}: e_out {:e} below threshold, saving weights",
                    report.out_sample
                );
                sink.save_weights(epoch, self.net.weights())?;
                checkpoints.push(epoch);
            }

            if diverged_at.is_none()
                && !(report.in_sample.is_finite() && report.out_sample.is_finite())
            {
                log::warn!(
                    "epoch {epoch}: training diverged (e_in {}, e_out {}); \
                     consider a smaller learning rate",
                    report.in_sample,
                    report.out_sample
                );
                diverged_at = Some(epoch);
                if self.config.halt_on_divergence {
                    break;
                }
            }
        }

        sink.save_weights(epochs, self.net.weights())?;
        sink.save_errors(&self.trace)?;

        let last = epochs_run.saturating_sub(1);
        let report = RunReport {
            epochs_run,
            checkpoints,
            best_out_sample: self.trace.best_out_sample(),
            diverged_at,
            final_in_sample: self.trace.in_sample()[last],
            final_out_sample: self.trace.out_sample()[last],
        };
        log::info!(
            "finished run seed {}: {} epochs, {} checkpoints, final e_out {:e}",
            self.config.seed,
            report.epochs_run,
            report.checkpoints.len(),
            report.final_out_sample
        );
        Ok(report)
    }

    /// Train, round and evaluate once, without touching the trace or sink.
    pub fn run_epoch(&mut self) -> EpochReport {
        let in_sample = self.train_epoch();
        self.net.round_weights();
        let out_sample = self.test_out_of_sample();
        EpochReport {
            in_sample,
            out_sample,
        }
    }

    /// One pass of online updates over a fresh training batch.
    ///
    /// Returns the mean squared residual seen during the pass.
    pub fn train_epoch(&mut self) -> f64 {
        self.train_set.refill(TRAINING_RANGE_SCALE, &mut self.rng);

        let lr = self.config.learning_rate;
        let decay = self.config.weight_decay();
        let mut e_in = 0.0;

        for (a, b) in self.train_set.iter() {
            e_in += self.net.forward(a, b);
            self.net.backward();
            self.net.update(&mut self.updaters, lr, decay);
        }

        e_in / self.train_set.len() as f64
    }

    /// Mean squared residual over a fresh test batch; weights are not updated.
    ///
    /// Consumes randomness from the instance RNG, so calling it between
    /// epochs shifts later batches.
    pub fn test_out_of_sample(&mut self) -> f64 {
        self.test_set.refill(self.config.range_scale, &mut self.rng);

        let mut e_out = 0.0;
        for (a, b) in self.test_set.iter() {
            e_out += self.net.forward(a, b);
        }
        e_out / self.test_set.len() as f64
    }
}
