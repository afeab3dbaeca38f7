//! Run outputs.
//!
//! The training loop only talks to a [`RunSink`]. [`ExperimentDir`] is the
//! on-disk implementation:
//!
//! ```text
//! {output_root}/rsf_{scale} lr_{lr} rp_{reg} seed_{seed} exp_id_{id}/
//!     data_info.txt
//!     config.json                  (feature `serde`)
//!     W1A_epoch{n}.dat  W1B_epoch{n}.dat  W2_epoch{n}.dat
//!     in_sample_error.dat  out_sample_error.dat
//! ```
//!
//! Every file is self-contained, so a run killed mid-epoch leaves a usable
//! prefix of checkpoints behind.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::format::{self, read_matrix};
use crate::{Error, ErrorTrace, Linear, Result, RunConfig, WeightSet};

/// Destination for checkpoints and the final error trace.
pub trait RunSink {
    /// Persist a weight snapshot tagged with `epoch`.
    fn save_weights(&mut self, epoch: usize, weights: &WeightSet) -> Result<()>;

    /// Persist the full error trace.
    fn save_errors(&mut self, trace: &ErrorTrace) -> Result<()>;
}

/// Discards everything. For evaluation-only runs and benchmarks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RunSink for NullSink {
    fn save_weights(&mut self, _epoch: usize, _weights: &WeightSet) -> Result<()> {
        Ok(())
    }

    fn save_errors(&mut self, _trace: &ErrorTrace) -> Result<()> {
        Ok(())
    }
}

/// Private output directory of one training instance.
#[derive(Debug, Clone)]
pub struct ExperimentDir {
    path: PathBuf,
}

impl ExperimentDir {
    /// Create the instance directory and write its metadata.
    pub fn create(cfg: &RunConfig) -> Result<Self> {
        let path = cfg.instance_dir();
        fs::create_dir_all(&path).map_err(|e| Error::io(&path, e))?;

        let dir = Self { path };
        dir.write("data_info.txt", &data_info(cfg))?;

        #[cfg(feature = "serde")]
        {
            let json = serde_json::to_string_pretty(cfg)
                .map_err(|e| Error::InvalidData(format!("failed to serialize config: {e}")))?;
            dir.write("config.json", &json)?;
        }

        log::debug!("created experiment directory {}", dir.path.display());
        Ok(dir)
    }

    /// Open an existing directory without writing anything.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn weight_file(&self, name: &str, epoch: usize) -> PathBuf {
        self.path.join(format!("{name}_epoch{epoch}.dat"))
    }

    /// Load the snapshot written for `epoch`.
    pub fn load_weights(&self, epoch: usize) -> Result<WeightSet> {
        let load = |name: &str| -> Result<Linear> {
            let m = read_matrix(&self.weight_file(name, epoch))?;
            Linear::from_parts(m.cols, m.rows, m.data)
        };
        Ok(WeightSet {
            w1a: load("W1A")?,
            w1b: load("W1B")?,
            w2: load("W2")?,
        })
    }

    fn write(&self, file: &str, contents: &str) -> Result<()> {
        let p = self.path.join(file);
        fs::write(&p, contents).map_err(|e| Error::io(&p, e))
    }

    fn write_linear(&self, name: &str, epoch: usize, l: &Linear) -> Result<()> {
        let p = self.weight_file(name, epoch);
        let text = format::matrix_to_string(l.weights(), l.out_dim(), l.in_dim());
        fs::write(&p, text).map_err(|e| Error::io(&p, e))
    }
}

impl RunSink for ExperimentDir {
    fn save_weights(&mut self, epoch: usize, weights: &WeightSet) -> Result<()> {
        self.write_linear("W1A", epoch, &weights.w1a)?;
        self.write_linear("W1B", epoch, &weights.w1b)?;
        self.write_linear("W2", epoch, &weights.w2)
    }

    fn save_errors(&mut self, trace: &ErrorTrace) -> Result<()> {
        self.write(
            "in_sample_error.dat",
            &format::vector_to_string(trace.in_sample()),
        )?;
        self.write(
            "out_sample_error.dat",
            &format::vector_to_string(trace.out_sample()),
        )
    }
}

/// Human-readable `key: value` metadata.
pub fn data_info(cfg: &RunConfig) -> String {
    let sci = format::scientific;
    let mut s = String::new();
    let _ = writeln!(
        s,
        "matrix dimensions: {} {} {}",
        cfg.dims.m, cfg.dims.n, cfg.dims.k
    );
    let _ = writeln!(s, "rank estimate: {}", cfg.rank);
    let _ = writeln!(s, "initial seed: {}", cfg.seed);
    let _ = writeln!(s, "epochs: {}", cfg.epochs);
    let _ = writeln!(s, "learning rate: {}", sci(cfg.learning_rate));
    let _ = writeln!(s, "regularization parameter: {}", sci(cfg.regularization));
    let _ = writeln!(s, "training data: {}", cfg.training_size);
    let _ = writeln!(s, "test data: {}", cfg.test_size);
    let _ = writeln!(s, "range scale factor: {}", sci(cfg.range_scale));
    let _ = writeln!(s, "threshold out-of-sample error: {}", sci(cfg.threshold_error_out));
    let _ = writeln!(s, "update method: {}", cfg.update_rule.name());
    let _ = writeln!(s, "comment: {}", cfg.comment);
    s
}
