//! Equilibration sampler: burn-in sweeps followed by recorded sweeps.
//!
//! After each recorded sweep a snapshot of the partition (canonicalized
//! copy) and its entropy is handed to the collector in chronological order.

use crate::error::{finite_entropy, NsbmError};
use crate::options::EquilibrateOptions;
use crate::partition::NestedPartition;
use crate::state::{PartitionState, SweepStats};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{debug, info};
use mcmc_util::{chain_seed, McmcChain};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;

/// Posterior samples in sweep order with their entropies
pub type SampleTrace = McmcChain<NestedPartition>;

/// Run the sampler on `state` and return the recorded snapshots.
///
/// `state` is left at the last visited configuration.
pub fn equilibrate<S: PartitionState>(state: &mut S, opts: &EquilibrateOptions) -> anyhow::Result<SampleTrace> {
    let mut trace = SampleTrace::with_capacity(opts.sample_sweeps.unwrap_or(0));
    equilibrate_with(state, opts, |_, partition, entropy| {
        trace.push(partition, entropy);
        Ok(())
    })?;
    if let Some(mean) = trace.mean_energy() {
        debug!("{} snapshots, mean entropy {:.4}", trace.n_samples(), mean);
    }
    Ok(trace)
}

/// Run the sampler, streaming snapshots to `collect`.
///
/// `collect(sweep, partition, entropy)` is called once per recorded sweep
/// with a strictly increasing sweep index (counted from the first burn-in
/// sweep). An error returned by the collector stops the run.
pub fn equilibrate_with<S, F>(state: &mut S, opts: &EquilibrateOptions, mut collect: F) -> anyhow::Result<SweepStats>
where
    S: PartitionState,
    F: FnMut(usize, NestedPartition, f64) -> anyhow::Result<()>,
{
    opts.validate()?;
    let num_samples = opts.sample_sweeps.unwrap_or(0);
    let total = opts.burn_in + num_samples;
    let mut rng = SmallRng::seed_from_u64(opts.seed);
    let mut stats = SweepStats::default();

    let pb = ProgressBar::new(total as u64);
    if !opts.show_progress {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    for sweep in 0..total {
        if opts.stop.as_ref().is_some_and(|s| s.is_stopped()) {
            debug!("stopped after {} of {} sweeps", sweep, total);
            break;
        }

        stats.add(state.sweep(opts.beta, opts.sweep_iters, &mut rng)?);
        pb.inc(1);

        if sweep >= opts.burn_in {
            let mut snapshot = state.partition().clone();
            snapshot.canonicalize();
            collect(sweep, snapshot, finite_entropy(state.entropy()?)?)?;
        }
    }
    pb.finish_and_clear();

    info!(
        "equilibrate: {} burn-in + {} recorded sweeps at beta={}, acceptance {:.3}, entropy {:.4}",
        opts.burn_in,
        num_samples,
        opts.beta,
        stats.acceptance_rate(),
        state.entropy()?
    );
    Ok(stats)
}

/// Run `n_chains` independent samplers from copies of `state` and
/// concatenate their traces in chain order.
///
/// Chain `c` is seeded with `opts.seed + c`.
pub fn sample_chains<S: PartitionState>(
    state: &S,
    opts: &EquilibrateOptions,
    n_chains: usize,
) -> anyhow::Result<SampleTrace> {
    if n_chains == 0 {
        return Err(NsbmError::invalid_option("n_chains", "must be >= 1").into());
    }
    opts.validate()?;

    let traces = (0..n_chains)
        .into_par_iter()
        .map(|c| {
            let chain_opts = EquilibrateOptions {
                seed: chain_seed(opts.seed, c),
                show_progress: false,
                ..opts.clone()
            };
            let mut chain_state = state.clone();
            equilibrate(&mut chain_state, &chain_opts)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(SampleTrace::concat(traces))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_state::{BlockState, PoissonNsbm};
    use crate::model::{EdgeModel, GammaPrior};
    use crate::sim::{planted_nested_graph, PlantedArgs};
    use crate::state::EntropyModel;
    use std::sync::Arc;

    fn seed_state() -> BlockState {
        let planted = planted_nested_graph(&PlantedArgs::default(), 13).unwrap();
        let partition = planted.partition().unwrap();
        let model = PoissonNsbm::new(
            Arc::new(planted.graph),
            GammaPrior::default(),
            EdgeModel::Weighted,
        )
        .unwrap();
        BlockState::new(Arc::new(model), partition).unwrap()
    }

    #[test]
    fn test_snapshot_count_and_order() {
        let mut state = seed_state();
        let opts = EquilibrateOptions {
            burn_in: 5,
            sample_sweeps: Some(12),
            ..Default::default()
        };

        let mut sweeps = vec![];
        equilibrate_with(&mut state, &opts, |sweep, partition, entropy| {
            assert!(partition.validate().is_ok());
            assert!(entropy.is_finite());
            sweeps.push(sweep);
            Ok(())
        })
        .unwrap();
        assert_eq!(sweeps, (5..17).collect::<Vec<_>>());
    }

    #[test]
    fn test_trace_matches_state() {
        let mut state = seed_state();
        let opts = EquilibrateOptions {
            burn_in: 2,
            sample_sweeps: Some(6),
            ..Default::default()
        };
        let trace = equilibrate(&mut state, &opts).unwrap();
        assert_eq!(trace.n_samples(), 6);

        let model = state.model().clone();
        for (p, e) in trace.iter() {
            let fresh = model.entropy(p).unwrap();
            assert!((fresh - e).abs() < 1e-6);
        }

        // the last snapshot is the final state, up to relabelling
        let mut last = state.partition().clone();
        last.canonicalize();
        assert_eq!(trace.samples.last(), Some(&last));
    }

    #[test]
    fn test_burn_in_only() {
        let mut state = seed_state();
        for sample_sweeps in [None, Some(0)] {
            let opts = EquilibrateOptions {
                burn_in: 3,
                sample_sweeps,
                ..Default::default()
            };
            assert!(equilibrate(&mut state, &opts).unwrap().is_empty());
        }
    }

    #[test]
    fn test_collector_error_stops_run() {
        let mut state = seed_state();
        let opts = EquilibrateOptions {
            burn_in: 0,
            sample_sweeps: Some(10),
            ..Default::default()
        };
        let mut calls = 0;
        let res = equilibrate_with(&mut state, &opts, |_, _, _| {
            calls += 1;
            anyhow::ensure!(calls < 3, "collector full");
            Ok(())
        });
        assert!(res.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_chains_are_concatenated_in_order() {
        let state = seed_state();
        let opts = EquilibrateOptions {
            burn_in: 1,
            sample_sweeps: Some(4),
            seed: 5,
            ..Default::default()
        };
        let all = sample_chains(&state, &opts, 3).unwrap();
        assert_eq!(all.n_samples(), 12);

        let second = EquilibrateOptions {
            seed: 6,
            ..opts.clone()
        };
        let alone = equilibrate(&mut state.clone(), &second).unwrap();
        assert_eq!(&all.samples[4..8], &alone.samples[..]);
        assert_eq!(&all.energies[4..8], &alone.energies[..]);

        assert!(sample_chains(&state, &opts, 0).is_err());
    }
}
