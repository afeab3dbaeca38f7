//! Gradient search for low-rank bilinear matrix multiplication algorithms.
//!
//! `strassen-search` looks for an exact rank-`R` bilinear algorithm for
//! `(m x n) * (n x k)` matrix products, the structure behind Strassen's 7
//! multiplication scheme for `2x2` matrices. The product `(A, B) -> A * B` is
//! modeled as a fixed three-layer network:
//!
//! - two linear projections of `vec(A)` and `vec(B)` to `R` signals,
//! - their elementwise product (one multiplication per hidden unit),
//! - a linear readout to `vec(C)`.
//!
//! Training runs online SGD (momentum by default, Adam on request) over
//! freshly generated random operands every epoch, and snaps the weights to
//! integers after each epoch. Integer weights with zero test error are an
//! exact algorithm using `R` multiplications.
//!
//! # Panics vs `Result`
//!
//! - Hot path (panics on misuse): [`BilinearNetwork::forward`],
//!   [`BilinearNetwork::backward`], [`UpdaterState::step`]. Operand and buffer
//!   shapes are contracts and are checked with `assert!`.
//! - Construction and I/O ([`RunConfig::validate`], [`Search::new`],
//!   [`ExperimentDir::create`], [`Search::run`]) return [`Result`].
//!
//! # Data layout
//!
//! - Scalars are `f64`.
//! - Operands and the product are flattened column-major: `vec(A)[i + j*m] = A[i][j]`.
//! - Weight matrices are row-major with shape `(out_dim, in_dim)`.
//!
//! # Quick start
//!
//! ```rust
//! use strassen_search::{BilinearNetwork, Dims, WeightSet};
//!
//! # fn main() -> strassen_search::Result<()> {
//! let mut net = BilinearNetwork::new(Dims::new(2, 2, 2)?, WeightSet::strassen())?;
//!
//! // A = [[1, 2], [3, 4]], B = [[5, 6], [7, 8]], column-major.
//! let loss = net.forward(&[1.0, 3.0, 2.0, 4.0], &[5.0, 7.0, 6.0, 8.0]);
//! assert!(loss < 1e-10);
//! # Ok(())
//! # }
//! ```
//!
//! # Running a search
//!
//! ```rust
//! use strassen_search::{NullSink, RunConfig, Search};
//!
//! # fn main() -> strassen_search::Result<()> {
//! let cfg = RunConfig {
//!     epochs: 2,
//!     training_size: 100,
//!     test_size: 10,
//!     learning_rate: 1e-4,
//!     ..RunConfig::default()
//! };
//! let mut search = Search::new(cfg)?;
//! let report = search.run(&mut NullSink)?;
//! assert_eq!(search.trace().len(), 2);
//! assert!(search.weights().is_integral() || report.diverged_at.is_some());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod format;
pub mod layer;
pub(crate) mod matmul;
pub mod network;
pub mod optim;
pub mod output;
pub mod trace;
pub mod train;

#[cfg(feature = "serde")]
pub mod snapshot;

pub use config::{Dims, RunConfig, SweepConfig};
pub use data::{OperandBatch, TRAINING_RANGE_SCALE};
pub use error::{Error, Result};
pub use layer::Linear;
pub use network::{Activations, BilinearNetwork, Sensitivities, WeightSet};
pub use optim::{UpdateRule, UpdaterState, Updaters};
pub use output::{ExperimentDir, NullSink, RunSink};
pub use trace::ErrorTrace;
pub use train::{EpochReport, RunReport, Search};

/// Validate, create the output directory, and run one instance.
///
/// Convenience wrapper for drivers that do not need to inspect the
/// [`Search`] afterwards.
pub fn run_instance(config: RunConfig, init: Option<WeightSet>) -> Result<RunReport> {
    let mut search = match init {
        Some(w) => Search::with_weights(config, w)?,
        None => Search::new(config)?,
    };
    let mut dir = ExperimentDir::create(search.config())?;
    search.run(&mut dir)
}
