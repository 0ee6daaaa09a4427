//! Sufficient statistics of one hierarchy level.
//!
//! Tracks the B×B directed block matrix `M = Z' X Z` (edge weight from
//! block r to block s) and the number of items in each block. Level 0 is
//! built from the graph, upper levels by aggregating the matrix of the
//! level below.
//!
//! Level 0 supports O(degree) incremental updates when a single vertex
//! moves; an upper level is re-aggregated from the level below in
//! O(B²), the same order as scoring it.

use crate::graph::Graph;
use crate::model::{ln_gamma, partition_dl, poisson_score, EdgeModel, GammaPrior};

/// Block-level statistics of one level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelStats {
    /// Number of blocks
    pub k: usize,
    /// K×K directed edge count matrix, flattened row-major: `edge_counts[r * k + s]`
    pub edge_counts: Vec<f64>,
    /// Number of items (nodes, or blocks of the level below) in each block
    pub block_size: Vec<f64>,
}

impl LevelStats {
    /// Build level-0 statistics from the graph.
    ///
    /// * `graph` - The graph
    /// * `edge_model` - How edge weights are counted
    /// * `membership` - Block of every node (labels in `0..k`)
    /// * `k` - Number of blocks
    pub fn from_graph(graph: &Graph, edge_model: EdgeModel, membership: &[usize], k: usize) -> Self {
        let mut edge_counts = vec![0.0; k * k];
        let mut block_size = vec![0.0; k];

        for &r in membership {
            block_size[r] += 1.0;
        }

        for &(i, j, w) in graph.edges() {
            edge_counts[membership[i] * k + membership[j]] += edge_model.count(w);
        }

        LevelStats {
            k,
            edge_counts,
            block_size,
        }
    }

    /// Aggregate the block matrix of the level below.
    ///
    /// * `lower` - Statistics of the level below (its blocks are our items)
    /// * `membership` - Block of every lower block (length `lower.k`)
    /// * `k` - Number of blocks at this level
    pub fn aggregate(lower: &LevelStats, membership: &[usize], k: usize) -> Self {
        debug_assert_eq!(membership.len(), lower.k);
        let mut edge_counts = vec![0.0; k * k];
        let mut block_size = vec![0.0; k];

        for &r in membership {
            block_size[r] += 1.0;
        }

        let kl = lower.k;
        for a in 0..kl {
            let ra = membership[a] * k;
            for b in 0..kl {
                let e = lower.edge_counts[a * kl + b];
                if e != 0.0 {
                    edge_counts[ra + membership[b]] += e;
                }
            }
        }

        LevelStats {
            k,
            edge_counts,
            block_size,
        }
    }

    /// Edge count from block `r` to block `s`.
    #[inline]
    pub fn edge_stat(&self, r: usize, s: usize) -> f64 {
        self.edge_counts[r * self.k + s]
    }

    /// Number of ordered item pairs from block `r` to block `s`.
    #[inline]
    pub fn total_stat(&self, r: usize, s: usize) -> f64 {
        self.block_size[r] * self.block_size[s]
    }

    /// Move weight `w` from block pair `from` to block pair `to`.
    #[inline]
    pub fn shift_edge(&mut self, from: (usize, usize), to: (usize, usize), w: f64) {
        self.edge_counts[from.0 * self.k + from.1] -= w;
        self.edge_counts[to.0 * self.k + to.1] += w;
    }

    /// Append an empty block.
    pub fn push_block(&mut self) {
        let k = self.k;
        let mut edge_counts = vec![0.0; (k + 1) * (k + 1)];
        for r in 0..k {
            edge_counts[r * (k + 1)..r * (k + 1) + k]
                .copy_from_slice(&self.edge_counts[r * k..(r + 1) * k]);
        }
        self.edge_counts = edge_counts;
        self.block_size.push(0.0);
        self.k = k + 1;
    }

    /// Remove block `r`; the last block takes over label `r`.
    pub fn swap_remove_block(&mut self, r: usize) {
        let k = self.k;
        let last = k - 1;
        let mut edge_counts = vec![0.0; last * last];
        let relabel = |x: usize| if x == last { r } else { x };
        for a in 0..k {
            if a == r {
                continue;
            }
            for b in 0..k {
                if b == r {
                    continue;
                }
                edge_counts[relabel(a) * last + relabel(b)] = self.edge_counts[a * k + b];
            }
        }
        self.edge_counts = edge_counts;
        self.block_size.swap_remove(r);
        self.k = last;
    }

    /// Log-likelihood of the block matrix plus the partition description
    /// length, as a description length (lower is better).
    pub fn score(&self, prior: &GammaPrior) -> f64 {
        let mut llik = 0.0;
        for r in 0..self.k {
            if self.block_size[r] == 0.0 {
                continue;
            }
            for s in 0..self.k {
                if self.block_size[s] == 0.0 {
                    continue;
                }
                llik += poisson_score(
                    prior.a0,
                    prior.b0,
                    self.edge_stat(r, s),
                    self.total_stat(r, s),
                );
            }
        }
        partition_dl(&self.block_size) - llik
    }

    /// `sum_{r,s} lnΓ(M[r,s] + 1)`: the data term of the level above,
    /// whose items are these blocks.
    pub fn data_term(&self) -> f64 {
        self.edge_counts
            .iter()
            .filter(|&&e| e > 0.0)
            .map(|&e| ln_gamma(e + 1.0))
            .sum()
    }
}
