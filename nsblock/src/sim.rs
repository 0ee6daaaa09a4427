//! Planted nested block graphs for tests and benchmarks.

use crate::graph::Graph;
use crate::partition::NestedPartition;
use clap::Args;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};

/// Parameters of a planted two-level block graph.
#[derive(Args, Debug, Clone)]
pub struct PlantedArgs {
    /// Nodes per planted block
    #[arg(long, default_value_t = 10)]
    pub n_per_block: usize,

    /// Number of planted blocks
    #[arg(long, default_value_t = 4)]
    pub n_blocks: usize,

    /// Planted blocks per super-block (level 1)
    #[arg(long, default_value_t = 2)]
    pub blocks_per_group: usize,

    /// Edge probability inside a block
    #[arg(long, default_value_t = 0.4)]
    pub p_in: f64,

    /// Edge probability between blocks of the same super-block
    #[arg(long, default_value_t = 0.1)]
    pub p_group: f64,

    /// Edge probability between super-blocks
    #[arg(long, default_value_t = 0.02)]
    pub p_out: f64,

    /// Mean extra weight per edge; weights are `1 + Poisson(mean)`
    #[arg(long, default_value_t = 0.0)]
    pub extra_weight: f64,
}

impl Default for PlantedArgs {
    fn default() -> Self {
        PlantedArgs {
            n_per_block: 10,
            n_blocks: 4,
            blocks_per_group: 2,
            p_in: 0.4,
            p_group: 0.1,
            p_out: 0.02,
            extra_weight: 0.0,
        }
    }
}

/// A planted graph with its generating partition.
pub struct Planted {
    /// The sampled graph
    pub graph: Graph,
    /// Planted block of every node
    pub labels: Vec<usize>,
    /// Planted super-block of every block
    pub groups: Vec<usize>,
}

impl Planted {
    /// The planted two-level partition
    pub fn partition(&self) -> anyhow::Result<NestedPartition> {
        NestedPartition::new(vec![self.labels.clone(), self.groups.clone()])
    }
}

/// Sample a directed planted partition graph.
pub fn planted_nested_graph(args: &PlantedArgs, seed: u64) -> anyhow::Result<Planted> {
    anyhow::ensure!(args.n_per_block > 0, "n_per_block must be > 0");
    anyhow::ensure!(args.n_blocks > 0, "n_blocks must be > 0");
    anyhow::ensure!(args.blocks_per_group > 0, "blocks_per_group must be > 0");

    let n = args.n_per_block * args.n_blocks;
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut labels = Vec::with_capacity(n);
    for b in 0..args.n_blocks {
        for _ in 0..args.n_per_block {
            labels.push(b);
        }
    }
    let groups: Vec<usize> = (0..args.n_blocks).map(|b| b / args.blocks_per_group).collect();

    let extra = if args.extra_weight > 0.0 {
        Some(Poisson::new(args.extra_weight)?)
    } else {
        None
    };

    let mut edges = Vec::new();
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let (bi, bj) = (labels[i], labels[j]);
            let p = if bi == bj {
                args.p_in
            } else if groups[bi] == groups[bj] {
                args.p_group
            } else {
                args.p_out
            };
            if rng.random::<f64>() < p {
                let w = 1.0 + extra.as_ref().map(|d| d.sample(&mut rng)).unwrap_or(0.0);
                edges.push((i, j, w));
            }
        }
    }

    Ok(Planted {
        graph: Graph::from_edges(n, edges)?,
        labels,
        groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planted_is_reproducible() {
        let args = PlantedArgs {
            extra_weight: 1.5,
            ..Default::default()
        };
        let a = planted_nested_graph(&args, 42).unwrap();
        let b = planted_nested_graph(&args, 42).unwrap();
        assert_eq!(a.graph.edges(), b.graph.edges());
        assert_eq!(a.labels.len(), 40);
        assert_eq!(a.groups, vec![0, 0, 1, 1]);
        assert!(a.graph.edges().iter().all(|&(i, j, w)| i != j && w >= 1.0));
        assert_eq!(a.partition().unwrap().num_levels(), 2);
    }
}
