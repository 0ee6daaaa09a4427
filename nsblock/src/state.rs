//! Capabilities the search and aggregation drivers consume.
//!
//! Drivers never look inside a block model: they only evaluate entropies
//! and ask for sweeps of proposals. Any likelihood can be plugged in by
//! implementing these traits.

use crate::partition::NestedPartition;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

/// Proposal counters of one or more sweeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepStats {
    /// Proposals attempted
    pub proposals: usize,
    /// Proposals accepted
    pub accepted: usize,
}

impl SweepStats {
    /// Accumulate another set of counters.
    pub fn add(&mut self, other: SweepStats) {
        self.proposals += other.proposals;
        self.accepted += other.accepted;
    }

    /// Fraction of accepted proposals (0 if none were made)
    pub fn acceptance_rate(&self) -> f64 {
        if self.proposals == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposals as f64
        }
    }
}

/// A nested partition bound to a graph and a model, which can evaluate its
/// description length and mutate itself by MCMC proposals.
///
/// `Clone` must be a deep copy of the partition: independent clones never
/// observe each other's moves. The graph may be shared read-only.
pub trait PartitionState: Clone + Send + Sync {
    /// Description length of the current partition. Deterministic.
    fn entropy(&self) -> anyhow::Result<f64>;

    /// Run `niter` single-item proposals at inverse temperature `beta`.
    ///
    /// With `beta = f64::INFINITY` only moves that do not increase the
    /// entropy are accepted.
    fn sweep(&mut self, beta: f64, niter: usize, rng: &mut SmallRng)
        -> anyhow::Result<SweepStats>;

    /// Current partition
    fn partition(&self) -> &NestedPartition;

    /// Number of nodes in the graph
    fn num_nodes(&self) -> usize {
        self.partition().num_nodes()
    }
}

/// Description-length evaluator for arbitrary partitions of a fixed graph.
pub trait EntropyModel: Send + Sync {
    /// Description length of `partition`. Deterministic.
    fn entropy(&self, partition: &NestedPartition) -> anyhow::Result<f64>;
}
