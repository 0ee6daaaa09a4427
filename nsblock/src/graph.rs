//! Immutable weighted directed graph.
//!
//! Built once and shared read-only (behind `Arc`) by every state and chain
//! of a run.

use crate::error::NsbmError;
use serde::{Deserialize, Serialize};

/// A weighted directed edge `(src, dst, weight)`
pub type WeightedEdge = (usize, usize, f64);

/// Weighted directed graph over nodes `0..n`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    n: usize,
    edges: Vec<WeightedEdge>,
    /// `out_adj[v]` = vec of (target, weight)
    out_adj: Vec<Vec<(usize, f64)>>,
    /// `in_adj[v]` = vec of (source, weight)
    in_adj: Vec<Vec<(usize, f64)>>,
}

impl Graph {
    /// Build a graph from an edge list.
    ///
    /// * `n` - Number of nodes
    /// * `edges` - Directed edges; weights must be finite and non-negative.
    ///   Self loops and parallel edges are allowed.
    pub fn from_edges(n: usize, edges: Vec<WeightedEdge>) -> anyhow::Result<Self> {
        if n == 0 {
            return Err(NsbmError::InvalidGraph("graph has no nodes".into()).into());
        }

        let mut out_adj = vec![Vec::new(); n];
        let mut in_adj = vec![Vec::new(); n];

        for (e, &(i, j, w)) in edges.iter().enumerate() {
            if i >= n || j >= n {
                return Err(NsbmError::InvalidGraph(format!(
                    "edge {} ({} -> {}) has an endpoint outside 0..{}",
                    e, i, j, n
                ))
                .into());
            }
            if !w.is_finite() || w < 0.0 {
                return Err(NsbmError::InvalidGraph(format!(
                    "edge {} ({} -> {}) has invalid weight {}",
                    e, i, j, w
                ))
                .into());
            }
            out_adj[i].push((j, w));
            in_adj[j].push((i, w));
        }

        Ok(Graph {
            n,
            edges,
            out_adj,
            in_adj,
        })
    }

    /// Number of nodes
    pub fn num_nodes(&self) -> usize {
        self.n
    }

    /// Number of edges
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// All edges in insertion order
    pub fn edges(&self) -> &[WeightedEdge] {
        &self.edges
    }

    /// Outgoing `(target, weight)` pairs of `v`
    pub fn out_neighbors(&self, v: usize) -> &[(usize, f64)] {
        &self.out_adj[v]
    }

    /// Incoming `(source, weight)` pairs of `v`
    pub fn in_neighbors(&self, v: usize) -> &[(usize, f64)] {
        &self.in_adj[v]
    }

    /// Sum of all edge weights
    pub fn total_weight(&self) -> f64 {
        self.edges.iter().map(|&(_, _, w)| w).sum()
    }
}
