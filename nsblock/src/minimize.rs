//! Initial nested partition heuristic.
//!
//! Round-robin level-0 blocks polished by greedy sweeps, then upper levels
//! stacked by pairing adjacent block labels until a single block remains.

use crate::block_state::{BlockState, PoissonNsbm};
use crate::options::MinimizeOptions;
use crate::partition::NestedPartition;
use crate::state::PartitionState;
use log::{debug, info};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;

/// Build a seed state for refinement. Deterministic given `opts.seed`.
pub fn minimize_partition(model: &Arc<PoissonNsbm>, opts: &MinimizeOptions) -> anyhow::Result<BlockState> {
    opts.validate()?;
    let n = model.graph().num_nodes();
    let k0 = if opts.init_blocks == 0 {
        (n as f64).sqrt().ceil() as usize
    } else {
        opts.init_blocks
    }
    .clamp(1, n);

    let mut rng = SmallRng::seed_from_u64(opts.seed);
    let labels: Vec<usize> = (0..n).map(|v| v % k0).collect();
    let mut state = BlockState::from_labels(model.clone(), labels)?;
    polish(&mut state, opts.greedy_sweeps, &mut rng)?;
    debug!(
        "level 0: {} -> {} blocks, entropy {:.4}",
        k0,
        state.num_blocks(0),
        state.entropy()?
    );

    loop {
        let partition = state.partition();
        let top = partition.num_levels() - 1;
        let nb = partition.num_blocks(top);
        if nb <= 1 || partition.num_levels() >= opts.max_levels {
            break;
        }

        let mut levels = partition.levels().to_vec();
        levels.push((0..nb).map(|r| r / 2).collect());
        state = BlockState::new(model.clone(), NestedPartition::new(levels)?)?;
        polish(&mut state, opts.greedy_sweeps, &mut rng)?;
        debug!(
            "level {}: {} blocks, entropy {:.4}",
            top + 1,
            state.num_blocks(top + 1),
            state.entropy()?
        );
    }

    let partition = state.partition();
    let sizes: Vec<usize> = (0..partition.num_levels())
        .map(|l| partition.num_blocks(l))
        .collect();
    info!(
        "minimize: n={}, blocks per level {:?}, entropy {:.4} (per level {:?})",
        n,
        sizes,
        state.entropy()?,
        state.level_entropies()
    );
    Ok(state)
}

/// Greedy sweeps of `n` proposals each.
fn polish(state: &mut BlockState, sweeps: usize, rng: &mut SmallRng) -> anyhow::Result<()> {
    let n = state.num_nodes();
    for _ in 0..sweeps {
        state.sweep(f64::INFINITY, n, rng)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EdgeModel, GammaPrior};
    use crate::sim::{planted_nested_graph, PlantedArgs};
    use crate::state::EntropyModel;

    fn model() -> Arc<PoissonNsbm> {
        let planted = planted_nested_graph(&PlantedArgs::default(), 3).unwrap();
        Arc::new(
            PoissonNsbm::new(
                Arc::new(planted.graph),
                GammaPrior::default(),
                EdgeModel::Weighted,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_hierarchy_ends_in_one_block() {
        let model = model();
        let state = minimize_partition(&model, &MinimizeOptions::default()).unwrap();
        let p = state.partition();
        assert!(p.validate().is_ok());
        assert_eq!(p.num_blocks(p.num_levels() - 1), 1);
        assert!(p.num_levels() <= 10);

        let fresh = model.entropy(p).unwrap();
        assert!((fresh - state.entropy().unwrap()).abs() < 1e-6);
        assert_eq!(state.level_entropies().len(), p.num_levels());
        let summed: f64 = state.level_entropies().iter().sum();
        assert!((summed - fresh).abs() < 1e-6);
    }

    #[test]
    fn test_is_deterministic() {
        let model = model();
        let opts = MinimizeOptions {
            greedy_sweeps: 3,
            ..Default::default()
        };
        let a = minimize_partition(&model, &opts).unwrap();
        let b = minimize_partition(&model, &opts).unwrap();
        assert_eq!(a.partition(), b.partition());
    }

    #[test]
    fn test_level_bound() {
        let model = model();
        let opts = MinimizeOptions {
            max_levels: 1,
            init_blocks: 4,
            ..Default::default()
        };
        let state = minimize_partition(&model, &opts).unwrap();
        assert_eq!(state.partition().num_levels(), 1);

        let opts = MinimizeOptions {
            max_levels: 0,
            ..Default::default()
        };
        assert!(minimize_partition(&model, &opts).is_err());
    }
}
