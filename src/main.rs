use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rayon::prelude::*;

use strassen_search::{
    Dims, ExperimentDir, RunConfig, SweepConfig, UpdateRule, WeightSet, run_instance,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Search for low-rank bilinear matrix multiplication algorithms"
)]
struct Cli {
    /// Matrix dimensions m n k (A: m x n, B: n x k); a single value means square.
    #[arg(short = 'd', long = "dims", num_args = 1..=3, default_values_t = [2, 2, 2])]
    dims: Vec<usize>,

    /// Rank estimate (hidden width, number of multiplications).
    #[arg(short = 'k', long, default_value_t = 7)]
    rank: usize,

    /// Initial seed; incremented before each instance.
    #[arg(short = 's', long = "seed-init", default_value_t = 0)]
    seed: u64,

    #[arg(short = 'e', long, default_value_t = 5000)]
    epochs: usize,

    /// Training samples per epoch.
    #[arg(short = 'x', long = "train", default_value_t = 10_000)]
    training_size: usize,

    /// Test samples per evaluation.
    #[arg(short = 'y', long = "test", default_value_t = 1000)]
    test_size: usize,

    /// Repetitions per hyperparameter combination.
    #[arg(short = 'n', long = "exps", default_value_t = 5)]
    repetitions: usize,

    /// Save weights when out-of-sample error drops below this and improves.
    #[arg(short = 'o', long = "threshold-eout", default_value_t = 1e-8)]
    threshold_error_out: f64,

    /// Range scale factors for test data, e.g. `1 100`.
    #[arg(short = 'c', long = "scale-factor", num_args = 1.., default_values_t = [1.0])]
    range_scales: Vec<f64>,

    /// Learning rates, e.g. `1e-2 1e-3`.
    #[arg(short = 'l', long = "learning-rate", num_args = 1.., default_values_t = [1e-2])]
    learning_rates: Vec<f64>,

    /// Regularization parameters, e.g. `0 1e-3`.
    #[arg(short = 'r', long = "reg-param", num_args = 1.., default_values_t = [0.0])]
    regularizations: Vec<f64>,

    /// Weight update method: momentum or adam.
    #[arg(
        short = 'u',
        long = "update-method",
        default_value = "momentum",
        value_parser = clap::value_parser!(UpdateRule)
    )]
    update_method: UpdateRule,

    /// Output directory for the whole series.
    #[arg(short = 'p', long)]
    path: Option<PathBuf>,

    /// Free-text comment stored with each instance.
    #[arg(short = 'm', long, default_value = "")]
    comment: String,

    /// Worker threads for independent instances (default: all cores).
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Stop an instance at its first non-finite error.
    #[arg(long)]
    halt_on_divergence: bool,

    /// Start from the canonical Strassen weights (2x2x2, rank 7 only).
    #[arg(long, conflicts_with = "init_weights")]
    strassen_init: bool,

    /// Start from a saved instance directory (with --init-epoch) or a JSON snapshot.
    #[arg(long)]
    init_weights: Option<PathBuf>,

    /// Epoch tag of the `.dat` snapshot to load from --init-weights.
    #[arg(long, requires = "init_weights")]
    init_epoch: Option<usize>,
}

fn die(msg: impl std::fmt::Display) -> ExitCode {
    log::error!("{msg}");
    ExitCode::FAILURE
}

fn default_series_path(dims: Dims, rank: usize, epochs: usize) -> PathBuf {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    PathBuf::from(format!(
        "DATA matrix_dimensions_{}_{}_{} rank_{rank} epochs_{epochs} {now}",
        dims.m, dims.n, dims.k
    ))
}

fn load_init(cli: &Cli) -> strassen_search::Result<Option<WeightSet>> {
    if cli.strassen_init {
        return Ok(Some(WeightSet::strassen()));
    }
    let Some(path) = &cli.init_weights else {
        return Ok(None);
    };
    match cli.init_epoch {
        Some(epoch) => ExperimentDir::open(path).load_weights(epoch).map(Some),
        None => load_json_init(path),
    }
}

#[cfg(feature = "serde")]
fn load_json_init(path: &std::path::Path) -> strassen_search::Result<Option<WeightSet>> {
    WeightSet::load_json(path).map(|(_, w)| Some(w))
}

#[cfg(not(feature = "serde"))]
fn load_json_init(_path: &std::path::Path) -> strassen_search::Result<Option<WeightSet>> {
    Err(strassen_search::Error::InvalidConfig(
        "JSON snapshots require the `serde` feature; pass --init-epoch to load .dat files"
            .to_owned(),
    ))
}

fn build_sweep(cli: &Cli) -> strassen_search::Result<SweepConfig> {
    let dims = Dims::parse(&cli.dims)?;
    let output_root = cli
        .path
        .clone()
        .unwrap_or_else(|| default_series_path(dims, cli.rank, cli.epochs));

    Ok(SweepConfig {
        base: RunConfig {
            dims,
            rank: cli.rank,
            seed: cli.seed,
            epochs: cli.epochs,
            training_size: cli.training_size,
            test_size: cli.test_size,
            threshold_error_out: cli.threshold_error_out,
            update_rule: cli.update_method,
            halt_on_divergence: cli.halt_on_divergence,
            output_root,
            comment: cli.comment.clone(),
            ..RunConfig::default()
        },
        range_scales: cli.range_scales.clone(),
        learning_rates: cli.learning_rates.clone(),
        regularizations: cli.regularizations.clone(),
        repetitions: cli.repetitions,
    })
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    // Configuration errors abort before any instance directory exists.
    let runs = match build_sweep(&cli).and_then(|s| s.expand()) {
        Ok(runs) => runs,
        Err(e) => return die(e),
    };
    let init = match load_init(&cli) {
        Ok(init) => init,
        Err(e) => return die(e),
    };
    if let Some(w) = &init {
        if let Err(e) = w.validate(runs[0].dims, runs[0].rank) {
            return die(e);
        }
    }

    if let Some(jobs) = cli.jobs {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
        {
            return die(format!("failed to configure worker pool: {e}"));
        }
    }

    log::info!(
        "running {} instances into {}",
        runs.len(),
        runs[0].output_root.display()
    );

    let failures: usize = runs
        .into_par_iter()
        .map(|cfg| {
            let name = cfg.instance_dir_name();
            match run_instance(cfg, init.clone()) {
                Ok(report) => {
                    if let Some(epoch) = report.diverged_at {
                        log::warn!("{name}: diverged at epoch {epoch}");
                    }
                    0
                }
                Err(e) => {
                    log::error!("{name}: {e}");
                    1
                }
            }
        })
        .sum();

    if failures > 0 {
        return die(format!("{failures} instance(s) failed"));
    }
    ExitCode::SUCCESS
}
