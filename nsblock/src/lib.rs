//! Posterior refinement and consensus for nested stochastic block models.
//!
//! Given a weighted directed graph and a nested block partition of it, the
//! crate
//!
//! 1. **refines** the partition by independent zero-temperature MCMC
//!    trials, keeping the lowest description length,
//! 2. **samples** the posterior by Metropolis sweeps after a burn-in,
//! 3. **aggregates** the samples into a consensus partition with per-node
//!    marginal block probabilities, and
//! 4. **clusters** the samples into modes, i.e. distinct competing
//!    explanations of the network.
//!
//! The drivers only need a [`PartitionState`] (entropy + sweeps). The
//! bundled [`PoissonNsbm`]/[`BlockState`] pair is a Gamma-Poisson nested
//! block model.
//!
//! # Usage
//!
//! ```ignore
//! use nsblock::*;
//! use std::sync::Arc;
//!
//! let graph = Arc::new(Graph::from_edges(n, edges)?);
//! let model = Arc::new(PoissonNsbm::new(graph, GammaPrior::default(), EdgeModel::Weighted)?);
//!
//! let seed = minimize_partition(&model, &MinimizeOptions::default())?;
//! let refined = refine(&seed, &RefineOptions::default())?;
//!
//! let mut state = refined.state;
//! let opts = EquilibrateOptions { sample_sweeps: Some(1000), ..Default::default() };
//! let trace = equilibrate(&mut state, &opts)?;
//!
//! let consensus = build_consensus(&trace, Some(model.as_ref()))?;
//! let modes = cluster_modes(&trace, &ModeOptions::default())?;
//! ```

#![deny(missing_docs)]
#![deny(warnings)]

/// Error taxonomy
pub mod error;

/// Immutable weighted directed graph
pub mod graph;

/// Flat and nested partitions with canonical relabelling
pub mod partition;

/// Gamma-Poisson scores and partition description length
pub mod model;

/// Per-level block matrices and sizes
pub mod level_stats;

/// Capability traits consumed by the drivers
pub mod state;

/// Reference nested Poisson block model and its MCMC moves
pub mod block_state;

/// Initial partition heuristic
pub mod minimize;

/// Multi-trial refinement search
pub mod refine;

/// Equilibration sampler
pub mod equilibrate;

/// Maximum-overlap label alignment
pub mod matching;

/// Consensus partition and marginals
pub mod consensus;

/// Clustering of samples into modes
pub mod modes;

/// Option structs (clap-derivable)
pub mod options;

/// Planted nested block graphs
pub mod sim;

pub use block_state::{BlockState, PoissonNsbm};
pub use consensus::{build_consensus, build_consensus_with, BlockDistribution, ConsensusResult};
pub use equilibrate::{equilibrate, equilibrate_with, sample_chains, SampleTrace};
pub use error::NsbmError;
pub use graph::{Graph, WeightedEdge};
pub use matching::align_labels;
pub use minimize::minimize_partition;
pub use model::{EdgeModel, GammaPrior};
pub use modes::{cluster_modes, single_mode, Mode};
pub use options::{ConsensusOptions, EquilibrateOptions, MinimizeOptions, ModeOptions, RefineOptions};
pub use partition::{NestedPartition, Partition};
pub use refine::{refine, Refined};
pub use state::{EntropyModel, PartitionState, SweepStats};

pub use mcmc_util::{Schedule, StopFlag};
