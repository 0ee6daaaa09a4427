//! Refinement search: independent zero-temperature trials from a common
//! seed partition, keeping the lowest description length found.
//!
//! Trial `t` draws its moves from `SmallRng::seed_from_u64(seed + t)` and
//! owns a deep copy of the seed state, so trials can run in parallel (rayon)
//! and the outcome does not depend on scheduling. The winner is selected in
//! trial order and must be strictly better than everything before it.

use crate::error::finite_entropy;
use crate::options::RefineOptions;
use crate::state::{PartitionState, SweepStats};
use log::{debug, info};
use mcmc_util::chain_seed;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;

/// Outcome of a refinement search.
#[derive(Debug, Clone)]
pub struct Refined<S> {
    /// Best state found (a copy of the seed if no trial improved on it)
    pub state: S,
    /// Entropy of `state`
    pub entropy: f64,
    /// Entropy of the seed partition
    pub seed_entropy: f64,
    /// Final entropy of every trial, in trial order
    pub trial_entropies: Vec<f64>,
    /// Index of the winning trial; `None` if the seed was kept
    pub best_trial: Option<usize>,
    /// Proposal counters summed over all trials
    pub stats: SweepStats,
}

impl<S> Refined<S> {
    /// Whether some trial improved on the seed
    pub fn improved(&self) -> bool {
        self.best_trial.is_some()
    }
}

/// Run `opts.trials` independent searches from `seed` and keep the best.
///
/// The seed state is never modified. Errors raised by the state's entropy
/// or sweep propagate unchanged; a NaN or infinite entropy becomes
/// [`NsbmError::NonFiniteEntropy`](crate::error::NsbmError::NonFiniteEntropy).
pub fn refine<S: PartitionState>(seed: &S, opts: &RefineOptions) -> anyhow::Result<Refined<S>> {
    opts.validate()?;
    let seed_entropy = finite_entropy(seed.entropy()?)?;

    let outcomes: Vec<anyhow::Result<(S, f64, SweepStats)>> = if opts.parallel {
        (0..opts.trials)
            .into_par_iter()
            .map(|t| run_trial(seed, opts, t))
            .collect()
    } else {
        (0..opts.trials).map(|t| run_trial(seed, opts, t)).collect()
    };

    let mut best: Option<(usize, S)> = None;
    let mut best_entropy = seed_entropy;
    let mut trial_entropies = Vec::with_capacity(opts.trials);
    let mut stats = SweepStats::default();

    for (t, outcome) in outcomes.into_iter().enumerate() {
        let (state, entropy, trial_stats) = outcome?;
        debug!(
            "trial {}: entropy {:.4}, acceptance {:.3}",
            t,
            entropy,
            trial_stats.acceptance_rate()
        );
        trial_entropies.push(entropy);
        stats.add(trial_stats);
        if entropy < best_entropy {
            best_entropy = entropy;
            best = Some((t, state));
        }
    }

    let (best_trial, state) = match best {
        Some((t, state)) => (Some(t), state),
        None => (None, seed.clone()),
    };

    info!(
        "refine: {} trials x {} sweeps x {} iters ({}), entropy {:.4} -> {:.4}",
        opts.trials,
        opts.sweeps_per_trial,
        opts.iters_per_sweep,
        opts.schedule,
        seed_entropy,
        best_entropy
    );

    Ok(Refined {
        state,
        entropy: best_entropy,
        seed_entropy,
        trial_entropies,
        best_trial,
        stats,
    })
}

fn run_trial<S: PartitionState>(
    seed: &S,
    opts: &RefineOptions,
    trial: usize,
) -> anyhow::Result<(S, f64, SweepStats)> {
    let mut rng = SmallRng::seed_from_u64(chain_seed(opts.seed, trial));
    let mut state = seed.clone();
    let mut stats = SweepStats::default();

    for sweep in 0..opts.sweeps_per_trial {
        if opts.stop.as_ref().is_some_and(|s| s.is_stopped()) {
            debug!("trial {} stopped after {} sweeps", trial, sweep);
            break;
        }
        let beta = opts.schedule.beta(sweep, opts.sweeps_per_trial);
        stats.add(state.sweep(beta, opts.iters_per_sweep, &mut rng)?);
    }

    let entropy = finite_entropy(state.entropy()?)?;
    Ok((state, entropy, stats))
}
