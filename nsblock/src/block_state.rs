//! Reference nested Poisson block model: entropy evaluator and
//! Metropolis single-item moves.
//!
//! For every level `l` with items (nodes at level 0, blocks of level `l-1`
//! above) the description length is
//!
//! ```text
//! S_l = partition_dl(n) + sum_{i,j} lgamma(X[i,j] + 1) - sum_{r,s} score(a0, b0, M[r,s], n_r * n_s)
//! ```
//!
//! where `X` is the item-level matrix and `M` the block-level matrix. For
//! integer edge weights every `S_l` is a negative log probability, hence
//! non-negative.

use crate::error::{finite_entropy, NsbmError};
use crate::graph::Graph;
use crate::level_stats::LevelStats;
use crate::model::{ln_gamma, EdgeModel, GammaPrior};
use crate::partition::NestedPartition;
use crate::state::{EntropyModel, PartitionState, SweepStats};
use fnv::FnvHashMap as HashMap;
use log::debug;
use rand::rngs::SmallRng;
use rand::Rng;
use std::sync::Arc;

/// Nested Poisson stochastic block model on a fixed graph.
#[derive(Debug)]
pub struct PoissonNsbm {
    graph: Arc<Graph>,
    prior: GammaPrior,
    edge_model: EdgeModel,
    /// `sum_{i,j} lgamma(X[i,j] + 1)` over node pairs; partition independent
    data_term: f64,
}

impl PoissonNsbm {
    /// Bind a model configuration to a graph.
    pub fn new(graph: Arc<Graph>, prior: GammaPrior, edge_model: EdgeModel) -> anyhow::Result<Self> {
        if !(prior.a0 > 0.0 && prior.a0.is_finite()) {
            return Err(NsbmError::invalid_option("a0", format!("must be > 0, got {}", prior.a0)).into());
        }
        if !(prior.b0 > 0.0 && prior.b0.is_finite()) {
            return Err(NsbmError::invalid_option("b0", format!("must be > 0, got {}", prior.b0)).into());
        }

        let mut pair_counts: HashMap<(usize, usize), f64> = HashMap::default();
        for &(i, j, w) in graph.edges() {
            *pair_counts.entry((i, j)).or_insert(0.0) += edge_model.count(w);
        }
        let data_term = pair_counts
            .values()
            .filter(|&&x| x > 0.0)
            .map(|&x| ln_gamma(x + 1.0))
            .sum();

        debug!(
            "model: {} nodes, {} edges, total weight {}, {:?}",
            graph.num_nodes(),
            graph.num_edges(),
            graph.total_weight(),
            edge_model
        );

        Ok(PoissonNsbm {
            graph,
            prior,
            edge_model,
            data_term,
        })
    }

    /// The graph this model describes
    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Gamma prior of the block-pair rates
    pub fn prior(&self) -> GammaPrior {
        self.prior
    }

    /// How edge weights are counted
    pub fn edge_model(&self) -> EdgeModel {
        self.edge_model
    }

    fn check_partition(&self, partition: &NestedPartition) -> anyhow::Result<()> {
        if partition.num_nodes() != self.graph.num_nodes() {
            return Err(NsbmError::NodeCountMismatch {
                expected: self.graph.num_nodes(),
                found: partition.num_nodes(),
            }
            .into());
        }
        partition.validate()
    }

    fn level_stats(&self, partition: &NestedPartition) -> Vec<LevelStats> {
        let nl = partition.num_levels();
        let mut stats = Vec::with_capacity(nl);
        stats.push(LevelStats::from_graph(
            &self.graph,
            self.edge_model,
            partition.level(0),
            partition.num_blocks(0),
        ));
        for l in 1..nl {
            let upper = LevelStats::aggregate(&stats[l - 1], partition.level(l), partition.num_blocks(l));
            stats.push(upper);
        }
        stats
    }

    fn level_term(&self, stats: &[LevelStats], level: usize) -> f64 {
        let data = if level == 0 {
            self.data_term
        } else {
            stats[level - 1].data_term()
        };
        data + stats[level].score(&self.prior)
    }
}

impl EntropyModel for PoissonNsbm {
    fn entropy(&self, partition: &NestedPartition) -> anyhow::Result<f64> {
        self.check_partition(partition)?;
        let stats = self.level_stats(partition);
        let total = (0..stats.len()).map(|l| self.level_term(&stats, l)).sum();
        finite_entropy(total)
    }
}

/// A nested partition of the model's graph with cached per-level
/// statistics.
///
/// Labels stay compact (`0..B_l`) after every move but are not kept in
/// first-appearance order; call `NestedPartition::canonicalize` on a copy
/// when a canonical form is needed.
#[derive(Debug, Clone)]
pub struct BlockState {
    model: Arc<PoissonNsbm>,
    partition: NestedPartition,
    stats: Vec<LevelStats>,
    /// Per-level description length
    terms: Vec<f64>,
}

impl BlockState {
    /// Bind `partition` to `model`.
    pub fn new(model: Arc<PoissonNsbm>, partition: NestedPartition) -> anyhow::Result<Self> {
        model.check_partition(&partition)?;
        let stats = model.level_stats(&partition);
        let terms = (0..stats.len()).map(|l| model.level_term(&stats, l)).collect();
        Ok(BlockState {
            model,
            partition,
            stats,
            terms,
        })
    }

    /// Single-level state from node labels.
    pub fn from_labels(model: Arc<PoissonNsbm>, labels: Vec<usize>) -> anyhow::Result<Self> {
        Self::new(model, NestedPartition::flat(labels)?)
    }

    /// The model this state is bound to
    pub fn model(&self) -> &Arc<PoissonNsbm> {
        &self.model
    }

    /// Number of blocks at `level`
    pub fn num_blocks(&self, level: usize) -> usize {
        self.stats[level].k
    }

    /// Description length contributed by each level
    pub fn level_entropies(&self) -> &[f64] {
        &self.terms
    }

    /// Draw a random single-item proposal `(level, item, target block)`.
    ///
    /// `target == num_blocks(level)` opens a new block. Returns `None` for
    /// proposals that cannot change anything.
    fn propose(&self, rng: &mut SmallRng) -> Option<(usize, usize, usize)> {
        let level = rng.random_range(0..self.partition.num_levels());
        let labels = self.partition.level(level);
        let item = rng.random_range(0..labels.len());
        let r = labels[item];
        let nb = self.stats[level].k;

        // new block with probability 1/(B+1)
        let target = if rng.random_range(0..=nb) == nb {
            if self.stats[level].block_size[r] <= 1.0 {
                return None;
            }
            nb
        } else {
            if nb < 2 {
                return None;
            }
            let t = rng.random_range(0..nb - 1);
            if t >= r {
                t + 1
            } else {
                t
            }
        };
        Some((level, item, target))
    }

    /// Move `item` of `level` into block `target`, keeping labels compact
    /// and the statistics of every level up to date.
    fn apply_move(&mut self, level: usize, item: usize, target: usize) {
        let r = self.partition.level(level)[item];
        if r == target {
            return;
        }
        if target == self.stats[level].k {
            self.push_block(level, r);
        }
        if level == 0 {
            self.move_vertex(item, r, target);
        } else {
            self.partition.levels_mut()[level][item] = target;
        }
        self.remove_empty_blocks(level);
        self.refresh(level);
    }

    /// Open a new block at `level` under the same parent as block `like`.
    fn push_block(&mut self, level: usize, like: usize) {
        let levels = self.partition.levels_mut();
        if level + 1 < levels.len() {
            let parent = levels[level + 1][like];
            levels[level + 1].push(parent);
        }
        self.stats[level].push_block();
    }

    /// Incremental level-0 update when vertex `v` moves from `r` to `t`.
    fn move_vertex(&mut self, v: usize, r: usize, t: usize) {
        let graph = &self.model.graph;
        let edge_model = self.model.edge_model;
        let labels = &mut self.partition.levels_mut()[0];
        let stats = &mut self.stats[0];

        for &(u, w) in graph.out_neighbors(v) {
            let c = edge_model.count(w);
            if u == v {
                stats.shift_edge((r, r), (t, t), c);
            } else {
                let s = labels[u];
                stats.shift_edge((r, s), (t, s), c);
            }
        }
        for &(u, w) in graph.in_neighbors(v) {
            if u == v {
                continue; // self loops were handled above
            }
            let s = labels[u];
            stats.shift_edge((s, r), (s, t), edge_model.count(w));
        }

        stats.block_size[r] -= 1.0;
        stats.block_size[t] += 1.0;
        labels[v] = t;
    }

    /// Drop blocks left without items at `level` and above.
    fn remove_empty_blocks(&mut self, level: usize) {
        for l in level..self.partition.num_levels() {
            loop {
                let mut used = vec![false; self.stats[l].k];
                for &x in self.partition.level(l) {
                    used[x] = true;
                }
                match used.iter().position(|&u| !u) {
                    Some(q) => self.remove_block(l, q),
                    None => break,
                }
            }
        }
    }

    /// Remove empty block `q` of level `l`; the last label takes its place.
    fn remove_block(&mut self, l: usize, q: usize) {
        let last = self.stats[l].k - 1;
        let levels = self.partition.levels_mut();
        if q != last {
            for x in levels[l].iter_mut() {
                if *x == last {
                    *x = q;
                }
            }
        }
        if l + 1 < levels.len() {
            levels[l + 1].swap_remove(q);
        }
        self.stats[l].swap_remove_block(q);
    }

    /// Re-aggregate the levels above `level` and recompute the entropy
    /// terms from `level` up.
    fn refresh(&mut self, level: usize) {
        let levels = self.partition.levels();
        for l in level.max(1)..levels.len() {
            let k = self.stats[l].k;
            self.stats[l] = LevelStats::aggregate(&self.stats[l - 1], &levels[l], k);
        }
        for l in level..levels.len() {
            self.terms[l] = self.model.level_term(&self.stats, l);
        }
    }
}

/// Labels and statistics of the levels a block removal can touch.
#[derive(Debug)]
struct Checkpoint {
    level: usize,
    labels: Vec<Vec<usize>>,
    stats: Vec<LevelStats>,
    terms: Vec<f64>,
}

impl BlockState {
    fn checkpoint(&self, level: usize) -> Checkpoint {
        Checkpoint {
            level,
            labels: self.partition.levels()[level..].to_vec(),
            stats: self.stats[level..].to_vec(),
            terms: self.terms[level..].to_vec(),
        }
    }

    /// Undo a rejected move of `item` out of block `r`.
    ///
    /// A move that kept `r` occupied is undone by moving the item back,
    /// which also drops a block the move may have opened. A move that
    /// emptied `r` is restored from its checkpoint.
    fn revert(&mut self, level: usize, item: usize, r: usize, saved: Option<Checkpoint>) {
        match saved {
            Some(c) => {
                let levels = self.partition.levels_mut();
                levels.truncate(c.level);
                levels.extend(c.labels);
                self.stats.truncate(c.level);
                self.stats.extend(c.stats);
                self.terms.truncate(c.level);
                self.terms.extend(c.terms);
            }
            None => self.apply_move(level, item, r),
        }
    }
}

/// Metropolis acceptance at inverse temperature `beta`.
fn accept(delta: f64, beta: f64, rng: &mut SmallRng) -> bool {
    if delta <= 0.0 {
        return true;
    }
    beta.is_finite() && rng.random::<f64>() < (-beta * delta).exp()
}

impl PartitionState for BlockState {
    fn entropy(&self) -> anyhow::Result<f64> {
        finite_entropy(self.terms.iter().sum())
    }

    fn sweep(&mut self, beta: f64, niter: usize, rng: &mut SmallRng) -> anyhow::Result<SweepStats> {
        let mut ret = SweepStats::default();
        let mut current: f64 = self.terms.iter().sum();

        for _ in 0..niter {
            ret.proposals += 1;
            let Some((level, item, target)) = self.propose(rng) else {
                continue;
            };

            let r = self.partition.level(level)[item];
            // emptying `r` relabels blocks; keep what the removal touches
            let saved = (self.stats[level].block_size[r] <= 1.0).then(|| self.checkpoint(level));
            self.apply_move(level, item, target);
            let proposed: f64 = self.terms.iter().sum();

            if !proposed.is_finite() {
                self.revert(level, item, r, saved);
                return Err(NsbmError::NonFiniteEntropy(proposed).into());
            }

            if accept(proposed - current, beta, rng) {
                current = proposed;
                ret.accepted += 1;
            } else {
                self.revert(level, item, r, saved);
            }
        }

        Ok(ret)
    }

    fn partition(&self) -> &NestedPartition {
        &self.partition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{planted_nested_graph, PlantedArgs};
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    fn planted_model(seed: u64) -> (Arc<PoissonNsbm>, Vec<usize>) {
        let planted = planted_nested_graph(
            &PlantedArgs {
                n_per_block: 8,
                n_blocks: 4,
                p_in: 0.5,
                p_out: 0.03,
                ..Default::default()
            },
            seed,
        )
        .unwrap();
        let model = PoissonNsbm::new(
            Arc::new(planted.graph),
            GammaPrior::default(),
            EdgeModel::Weighted,
        )
        .unwrap();
        (Arc::new(model), planted.labels)
    }

    #[test]
    fn test_entropy_is_deterministic_and_matches_model() {
        let (model, labels) = planted_model(7);
        let p = NestedPartition::new(vec![labels, vec![0, 0, 1, 1], vec![0, 0]]).unwrap();
        let state = BlockState::new(model.clone(), p.clone()).unwrap();

        let s1 = state.entropy().unwrap();
        let s2 = state.entropy().unwrap();
        let s3 = model.entropy(&p).unwrap();
        assert_eq!(s1, s2);
        assert_abs_diff_eq!(s1, s3, epsilon = 1e-9);
        assert!(s1 >= 0.0);
    }

    #[test]
    fn test_planted_partition_beats_random() {
        let (model, labels) = planted_model(11);
        let n = labels.len();
        let planted = model.entropy(&NestedPartition::flat(labels).unwrap()).unwrap();

        let mut rng = SmallRng::seed_from_u64(3);
        let random: Vec<usize> = (0..n).map(|_| rng.random_range(0..4)).collect();
        let random = model.entropy(&NestedPartition::flat(random).unwrap()).unwrap();

        assert!(
            planted < random,
            "planted={:.3} should be lower than random={:.3}",
            planted,
            random
        );
    }

    #[test]
    fn test_cached_entropy_tracks_moves() {
        let (model, _) = planted_model(5);
        let n = model.graph().num_nodes();
        let labels: Vec<usize> = (0..n).map(|v| v % 6).collect();
        let p = NestedPartition::new(vec![labels, vec![0, 0, 1, 1, 2, 2], vec![0, 1, 1]]).unwrap();
        let mut state = BlockState::new(model.clone(), p).unwrap();
        let mut rng = SmallRng::seed_from_u64(17);

        for _ in 0..20 {
            let stats = state.sweep(1.0, 25, &mut rng).unwrap();
            assert_eq!(stats.proposals, 25);
            assert!(state.partition().validate().is_ok());
            assert_eq!(state.partition().num_levels(), 3);

            let fresh = model.entropy(state.partition()).unwrap();
            assert_abs_diff_eq!(state.entropy().unwrap(), fresh, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_reverted_moves_restore_the_state() {
        let (model, _) = planted_model(31);
        let n = model.graph().num_nodes();
        let labels: Vec<usize> = (0..n).map(|v| v % 5).collect();
        let p = NestedPartition::new(vec![labels, vec![0, 0, 1, 1, 2], vec![0, 0, 1]]).unwrap();
        let mut state = BlockState::new(model, p).unwrap();
        let mut rng = SmallRng::seed_from_u64(8);

        let mut emptying = 0;
        let mut tried = 0;
        while tried < 300 {
            let Some((level, item, target)) = state.propose(&mut rng) else {
                continue;
            };
            tried += 1;

            let before = state.clone();
            let r = state.partition().level(level)[item];
            let saved = (state.stats[level].block_size[r] <= 1.0).then(|| state.checkpoint(level));
            if saved.is_some() {
                emptying += 1;
            }
            state.apply_move(level, item, target);
            state.revert(level, item, r, saved);

            assert_eq!(state.partition(), before.partition());
            for (a, b) in state.stats.iter().zip(before.stats.iter()) {
                assert_eq!(a.k, b.k);
                assert_eq!(a.block_size, b.block_size);
                for (x, y) in a.edge_counts.iter().zip(b.edge_counts.iter()) {
                    assert_abs_diff_eq!(*x, *y, epsilon = 1e-9);
                }
            }
            assert_abs_diff_eq!(state.entropy().unwrap(), before.entropy().unwrap(), epsilon = 1e-9);

            // wander so that later proposals start from elsewhere
            state.apply_move(level, item, target);
        }
        assert!(emptying > 0, "no proposal emptied a block");
    }

    #[test]
    fn test_greedy_sweeps_never_increase_entropy() {
        let (model, _) = planted_model(23);
        let n = model.graph().num_nodes();
        let labels: Vec<usize> = (0..n).map(|v| v % 3).collect();
        let mut state = BlockState::from_labels(model, labels).unwrap();
        let mut rng = SmallRng::seed_from_u64(99);

        let mut last = state.entropy().unwrap();
        for _ in 0..30 {
            state.sweep(f64::INFINITY, n, &mut rng).unwrap();
            let now = state.entropy().unwrap();
            assert!(now <= last + 1e-9, "entropy went up: {} -> {}", last, now);
            last = now;
        }
    }

    #[test]
    fn test_node_count_mismatch() {
        let (model, _) = planted_model(1);
        let err = BlockState::from_labels(model, vec![0, 1, 0]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NsbmError>(),
            Some(NsbmError::NodeCountMismatch { .. })
        ));
    }

    #[test]
    fn test_self_loops_are_tracked() {
        let graph = Graph::from_edges(
            4,
            vec![(0, 0, 2.0), (0, 1, 1.0), (1, 0, 3.0), (2, 3, 1.0), (3, 3, 1.0)],
        )
        .unwrap();
        let model =
            Arc::new(PoissonNsbm::new(Arc::new(graph), GammaPrior::default(), EdgeModel::Weighted).unwrap());
        let mut state = BlockState::from_labels(model.clone(), vec![0, 0, 1, 1]).unwrap();

        // move node 0 (with its self loop) into block 1
        state.apply_move(0, 0, 1);
        let direct = LevelStats::from_graph(model.graph(), EdgeModel::Weighted, &[1, 0, 1, 1], 2);
        assert_eq!(state.stats[0].edge_counts, direct.edge_counts);
        assert_eq!(state.stats[0].block_size, direct.block_size);

        // open a new block for node 3, then empty block 0 (node 1 leaves)
        state.apply_move(0, 3, 2);
        state.apply_move(0, 1, 1);
        assert!(state.partition().validate().is_ok());
        let fresh = model.entropy(state.partition()).unwrap();
        assert_abs_diff_eq!(state.entropy().unwrap(), fresh, epsilon = 1e-9);
        assert_eq!(state.num_blocks(0), 2);
    }
}
