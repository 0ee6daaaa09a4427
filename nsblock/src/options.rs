//! Tunables of every driver.
//!
//! Each struct has a `Default` and derives `clap::Args`, so an embedding
//! binary can expose it with `#[command(flatten)]`.

use crate::error::NsbmError;
use clap::Args;
use mcmc_util::{Schedule, StopFlag};

/// Options of the refinement search.
#[derive(Args, Debug, Clone)]
pub struct RefineOptions {
    /// Number of independent search trials
    #[arg(
        long,
        default_value_t = 5,
        long_help = "Number of independent search trials started from the same seed partition.\n\
                     Each trial works on its own copy; the lowest-entropy result wins."
    )]
    pub trials: usize,

    /// Sweeps per trial
    #[arg(long, default_value_t = 100)]
    pub sweeps_per_trial: usize,

    /// Proposals per sweep
    #[arg(long, default_value_t = 10)]
    pub iters_per_sweep: usize,

    /// Inverse temperature schedule
    #[arg(
        long,
        default_value = "greedy",
        long_help = "Inverse temperature schedule of each trial:\n\
                     greedy            only moves that do not increase the entropy\n\
                     fixed:<beta>      Metropolis at a constant beta\n\
                     linear:<a>:<b>    beta annealed linearly from a to b over the sweeps"
    )]
    pub schedule: Schedule,

    /// Random seed; trial `t` uses `seed + t`
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Run trials in parallel
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub parallel: bool,

    /// Cancellation flag checked between sweeps
    #[arg(skip)]
    pub stop: Option<StopFlag>,
}

impl Default for RefineOptions {
    fn default() -> Self {
        RefineOptions {
            trials: 5,
            sweeps_per_trial: 100,
            iters_per_sweep: 10,
            schedule: Schedule::Greedy,
            seed: 42,
            parallel: true,
            stop: None,
        }
    }
}

impl RefineOptions {
    /// Check counts and schedule.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.trials == 0 {
            return Err(NsbmError::invalid_option("trials", "must be >= 1").into());
        }
        if self.iters_per_sweep == 0 {
            return Err(NsbmError::invalid_option("iters_per_sweep", "must be >= 1").into());
        }
        if !self.schedule.is_valid() {
            return Err(NsbmError::invalid_option(
                "schedule",
                format!("{} needs positive inverse temperatures", self.schedule),
            )
            .into());
        }
        Ok(())
    }
}

/// Options of the equilibration sampler.
#[derive(Args, Debug, Clone)]
pub struct EquilibrateOptions {
    /// Burn-in sweeps whose states are discarded
    #[arg(long, default_value_t = 100)]
    pub burn_in: usize,

    /// Proposals per sweep
    #[arg(long, default_value_t = 10)]
    pub sweep_iters: usize,

    /// Sweeps to record after burn-in (one snapshot per sweep)
    #[arg(long)]
    pub sample_sweeps: Option<usize>,

    /// Inverse temperature (1 samples the posterior)
    #[arg(long, default_value_t = 1.0)]
    pub beta: f64,

    /// Random seed; chain `c` uses `seed + c`
    #[arg(long = "sample-seed", id = "sample_seed", default_value_t = 42)]
    pub seed: u64,

    /// Show a progress bar
    #[arg(long)]
    pub show_progress: bool,

    /// Cancellation flag checked between sweeps
    #[arg(skip)]
    pub stop: Option<StopFlag>,
}

impl Default for EquilibrateOptions {
    fn default() -> Self {
        EquilibrateOptions {
            burn_in: 100,
            sweep_iters: 10,
            sample_sweeps: None,
            beta: 1.0,
            seed: 42,
            show_progress: false,
            stop: None,
        }
    }
}

impl EquilibrateOptions {
    /// Check counts and temperature.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sweep_iters == 0 {
            return Err(NsbmError::invalid_option("sweep_iters", "must be >= 1").into());
        }
        if !(self.beta > 0.0) {
            return Err(NsbmError::invalid_option("beta", format!("must be > 0, got {}", self.beta)).into());
        }
        Ok(())
    }
}

/// Options of the consensus mode search.
#[derive(Args, Debug, Clone)]
pub struct ConsensusOptions {
    /// Maximum alignment iterations
    #[arg(long, default_value_t = 100)]
    pub max_align_iter: usize,
}

impl Default for ConsensusOptions {
    fn default() -> Self {
        ConsensusOptions { max_align_iter: 100 }
    }
}

impl ConsensusOptions {
    /// Check the iteration bound.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_align_iter == 0 {
            return Err(NsbmError::invalid_option("max_align_iter", "must be >= 1").into());
        }
        Ok(())
    }
}

/// Options of the mode clustering.
#[derive(Args, Debug, Clone)]
pub struct ModeOptions {
    /// Independent clustering trials (random visiting orders and starts)
    #[arg(long = "mode-trials", id = "mode_trials", default_value_t = 4)]
    pub trials: usize,

    /// Maximum greedy sweeps per trial
    #[arg(long = "mode-max-sweeps", default_value_t = 50)]
    pub max_sweeps: usize,

    /// Random seed of the clustering search
    #[arg(long = "mode-seed", id = "mode_seed", default_value_t = 42)]
    pub seed: u64,

    /// Dirichlet concentration of the per-node label distributions
    #[arg(long, default_value_t = 1.0)]
    pub alpha: f64,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub consensus: ConsensusOptions,
}

impl Default for ModeOptions {
    fn default() -> Self {
        ModeOptions {
            trials: 4,
            max_sweeps: 50,
            seed: 42,
            alpha: 1.0,
            consensus: ConsensusOptions::default(),
        }
    }
}

impl ModeOptions {
    /// Check counts and concentration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.trials == 0 {
            return Err(NsbmError::invalid_option("mode_trials", "must be >= 1").into());
        }
        if !(self.alpha > 0.0 && self.alpha.is_finite()) {
            return Err(NsbmError::invalid_option("alpha", format!("must be > 0, got {}", self.alpha)).into());
        }
        self.consensus.validate()
    }
}

/// Options of the initial partition heuristic.
#[derive(Args, Debug, Clone)]
pub struct MinimizeOptions {
    /// Initial number of level-0 blocks (0 = ceil(sqrt(n)))
    #[arg(long, default_value_t = 0)]
    pub init_blocks: usize,

    /// Maximum number of hierarchy levels
    #[arg(long, default_value_t = 10)]
    pub max_levels: usize,

    /// Greedy sweeps (n proposals each) after every level is added
    #[arg(long, default_value_t = 10)]
    pub greedy_sweeps: usize,

    /// Random seed
    #[arg(long = "init-seed", id = "init_seed", default_value_t = 42)]
    pub seed: u64,
}

impl Default for MinimizeOptions {
    fn default() -> Self {
        MinimizeOptions {
            init_blocks: 0,
            max_levels: 10,
            greedy_sweeps: 10,
            seed: 42,
        }
    }
}

impl MinimizeOptions {
    /// Check the level bound.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_levels == 0 {
            return Err(NsbmError::invalid_option("max_levels", "must be >= 1").into());
        }
        Ok(())
    }
}
