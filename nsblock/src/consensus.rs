//! Consensus partition of a sample trace, with per-node marginal block
//! probabilities at every level.
//!
//! Level 0: start from the lowest-entropy sample, align every sample to
//! the current reference, let every node vote for its most frequent
//! aligned block, repeat until the reference stops changing.
//!
//! Level `l >= 1`: the same loop on node → level-`l` projections, except
//! that votes are pooled over the members of each consensus block of level
//! `l - 1` so the consensus stays nested.

use crate::equilibrate::SampleTrace;
use crate::error::NsbmError;
use crate::matching::match_labels;
use crate::options::ConsensusOptions;
use crate::partition::{NestedPartition, Partition};
use crate::state::EntropyModel;
use fnv::FnvHashMap as HashMap;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Probability of every block a node was assigned to, sorted by block id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockDistribution {
    probs: Vec<(usize, f64)>,
}

impl BlockDistribution {
    fn from_counts(counts: &Tally, relabel: &HashMap<usize, usize>, total: f64) -> Self {
        let mut probs: Vec<(usize, f64)> = counts
            .iter()
            .map(|(&b, &c)| (relabel[&b], c as f64 / total))
            .collect();
        probs.sort_by_key(|&(b, _)| b);
        BlockDistribution { probs }
    }

    /// `(block, probability)` pairs with positive probability
    pub fn entries(&self) -> &[(usize, f64)] {
        &self.probs
    }

    /// Probability of `block`
    pub fn prob(&self, block: usize) -> f64 {
        self.probs
            .binary_search_by_key(&block, |&(b, _)| b)
            .map(|i| self.probs[i].1)
            .unwrap_or(0.0)
    }

    /// Largest probability
    pub fn max_prob(&self) -> f64 {
        self.probs.iter().map(|&(_, p)| p).fold(0.0, f64::max)
    }

    /// Sum of all probabilities (1 up to rounding)
    pub fn total(&self) -> f64 {
        self.probs.iter().map(|&(_, p)| p).sum()
    }
}

/// Consensus of a sample trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Canonical consensus partition
    pub partition: NestedPartition,
    /// `marginals[level][node]`, block ids as in `partition.project(level)`.
    ///
    /// Level 0 counts the aligned labels of the node itself. Above, the
    /// counts are pooled over the node's consensus block one level down,
    /// so nodes of that block share a distribution and the node's own
    /// consensus block always has positive probability.
    pub marginals: Vec<Vec<BlockDistribution>>,
    /// Description length of the consensus (when a model was given)
    pub entropy: Option<f64>,
    /// Mean over nodes of `1 - max` level-0 marginal
    pub uncertainty: f64,
    /// Alignment iterations used at level 0
    pub iterations: usize,
}

impl ConsensusResult {
    /// Marginal distribution of `node` at `level`
    pub fn marginal(&self, level: usize, node: usize) -> &BlockDistribution {
        &self.marginals[level][node]
    }
}

/// Consensus with default options.
pub fn build_consensus(trace: &SampleTrace, model: Option<&dyn EntropyModel>) -> anyhow::Result<ConsensusResult> {
    build_consensus_with(trace, model, &ConsensusOptions::default())
}

/// Consensus of `trace`. The entropy of the result is evaluated by `model`
/// if one is given.
pub fn build_consensus_with(
    trace: &SampleTrace,
    model: Option<&dyn EntropyModel>,
    opts: &ConsensusOptions,
) -> anyhow::Result<ConsensusResult> {
    opts.validate()?;
    let projections = trace_projections(trace)?;
    let best = trace.argmin_energy().ok_or(NsbmError::EmptyTrace)?;
    let alignments = align_trace(&projections, best, opts.max_align_iter);

    let consensus: Vec<Partition> = alignments.iter().map(|a| a.reference.clone()).collect();
    let partition = NestedPartition::from_projections(&consensus)?;

    let n = partition.num_nodes();
    let total = trace.n_samples() as f64;
    let mut marginals = Vec::with_capacity(alignments.len());
    for (l, alignment) in alignments.iter().enumerate() {
        let relabel = canonical_relabel(&alignment.reference, &partition.project(l), &alignment.tallies);
        let level: Vec<BlockDistribution> = if l == 0 {
            alignment
                .tallies
                .iter()
                .map(|t| BlockDistribution::from_counts(t, &relabel, total))
                .collect()
        } else {
            // a node shares the votes of its lower consensus block
            let lower = &alignments[l - 1].reference;
            let pooled: HashMap<usize, BlockDistribution> = pool_tallies(lower, &alignment.tallies)
                .into_iter()
                .map(|(r, t)| {
                    let votes = t.values().sum::<usize>() as f64;
                    (r, BlockDistribution::from_counts(&t, &relabel, votes))
                })
                .collect();
            lower.iter().map(|r| pooled[r].clone()).collect()
        };
        marginals.push(level);
    }

    let uncertainty = marginals[0].iter().map(|d| 1.0 - d.max_prob()).sum::<f64>() / n as f64;
    let entropy = model.map(|m| m.entropy(&partition)).transpose()?;
    let iterations = alignments[0].iterations;

    debug!(
        "consensus of {} samples: {} levels, {} alignment iterations, uncertainty {:.4}",
        trace.n_samples(),
        partition.num_levels(),
        iterations,
        uncertainty
    );

    Ok(ConsensusResult {
        partition,
        marginals,
        entropy,
        uncertainty,
        iterations,
    })
}

/// Per-node label counts
pub(crate) type Tally = HashMap<usize, usize>;

/// Samples of one level aligned to a consensus reference.
pub(crate) struct LevelAlignment {
    /// Consensus labels (node → block), not necessarily compact
    pub reference: Partition,
    /// Every sample relabelled to agree with `reference`
    pub aligned: Vec<Partition>,
    /// Per-node counts of aligned labels
    pub tallies: Vec<Tally>,
    pub iterations: usize,
}

/// `projections[sample][level]` after checking that every sample covers
/// the same nodes with the same number of levels.
pub(crate) fn trace_projections(trace: &SampleTrace) -> anyhow::Result<Vec<Vec<Partition>>> {
    let first = trace.samples.first().ok_or(NsbmError::EmptyTrace)?;
    let (n, nl) = (first.num_nodes(), first.num_levels());
    for p in &trace.samples {
        if p.num_nodes() != n {
            return Err(NsbmError::NodeCountMismatch {
                expected: n,
                found: p.num_nodes(),
            }
            .into());
        }
        if p.num_levels() != nl {
            return Err(NsbmError::LevelCountMismatch {
                expected: nl,
                found: p.num_levels(),
            }
            .into());
        }
    }
    Ok(trace.samples.iter().map(|p| p.projections()).collect())
}

/// Align every level of every sample, level 0 first, starting from the
/// projections of sample `best`.
pub(crate) fn align_trace(projections: &[Vec<Partition>], best: usize, max_iter: usize) -> Vec<LevelAlignment> {
    let nl = projections[best].len();
    let mut ret: Vec<LevelAlignment> = Vec::with_capacity(nl);

    for l in 0..nl {
        let samples: Vec<&[usize]> = projections.iter().map(|p| p[l].as_slice()).collect();
        let init = projections[best][l].clone();
        let alignment = match ret.last() {
            None => align_level(&samples, init, max_iter, |tallies| {
                tallies.iter().map(argmax).collect()
            }),
            Some(lower) => {
                let lower = &lower.reference;
                align_level(&samples, init, max_iter, |tallies| pooled_vote(lower, tallies))
            }
        };
        ret.push(alignment);
    }
    ret
}

fn align_level<F>(samples: &[&[usize]], init: Partition, max_iter: usize, vote: F) -> LevelAlignment
where
    F: Fn(&[Tally]) -> Partition,
{
    let n = init.len();
    let mut reference = init;
    let mut iterations = 0;

    loop {
        iterations += 1;
        let aligned: Vec<Partition> = samples
            .par_iter()
            .map(|s| {
                let mapping = match_labels(&reference, s);
                s.iter().map(|&r| mapping[r]).collect()
            })
            .collect();

        let mut tallies: Vec<Tally> = vec![Tally::default(); n];
        for sample in &aligned {
            for (v, &b) in sample.iter().enumerate() {
                *tallies[v].entry(b).or_insert(0) += 1;
            }
        }

        let next = vote(&tallies);
        let converged = next == reference;
        if converged || iterations >= max_iter {
            if !converged {
                debug!("alignment stopped after {} iterations without converging", iterations);
            }
            return LevelAlignment {
                reference: next,
                aligned,
                tallies,
                iterations,
            };
        }
        reference = next;
    }
}

/// Most frequent label; the smallest one on ties.
fn argmax(tally: &Tally) -> usize {
    let mut best: Option<(usize, usize)> = None;
    for (&b, &c) in tally {
        best = match best {
            Some((bb, bc)) if bc > c || (bc == c && bb < b) => Some((bb, bc)),
            _ => Some((b, c)),
        };
    }
    best.map(|(b, _)| b).unwrap_or(0)
}

/// Label counts summed over the members of each block of `lower`.
fn pool_tallies(lower: &[usize], tallies: &[Tally]) -> HashMap<usize, Tally> {
    let mut pooled: HashMap<usize, Tally> = HashMap::default();
    for (v, tally) in tallies.iter().enumerate() {
        let acc = pooled.entry(lower[v]).or_default();
        for (&b, &c) in tally {
            *acc.entry(b).or_insert(0) += c;
        }
    }
    pooled
}

/// Every block of `lower` takes the label with the most votes over its
/// member nodes.
fn pooled_vote(lower: &[usize], tallies: &[Tally]) -> Partition {
    let winner: HashMap<usize, usize> = pool_tallies(lower, tallies)
        .iter()
        .map(|(&r, t)| (r, argmax(t)))
        .collect();
    lower.iter().map(|r| winner[r]).collect()
}

/// Map aligned labels to canonical block ids. Labels that only occur in
/// the tallies get ids after the consensus blocks, in increasing order.
fn canonical_relabel(aligned: &[usize], canonical: &[usize], tallies: &[Tally]) -> HashMap<usize, usize> {
    let mut relabel: HashMap<usize, usize> = aligned.iter().copied().zip(canonical.iter().copied()).collect();
    let mut next = relabel.len();

    let mut extra: Vec<usize> = tallies
        .iter()
        .flat_map(|t| t.keys().copied())
        .filter(|b| !relabel.contains_key(b))
        .collect();
    extra.sort_unstable();
    extra.dedup();
    for b in extra {
        relabel.insert(b, next);
        next += 1;
    }
    relabel
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn trace_of(partitions: Vec<Vec<Partition>>) -> SampleTrace {
        let mut trace = SampleTrace::default();
        for (i, levels) in partitions.into_iter().enumerate() {
            trace.push(NestedPartition::new(levels).unwrap(), 10.0 + i as f64);
        }
        trace
    }

    #[test]
    fn test_identical_samples() {
        let p = vec![vec![0, 0, 1, 1, 2, 2], vec![0, 0, 1]];
        let trace = trace_of(vec![p.clone(); 20]);
        let c = build_consensus(&trace, None).unwrap();

        assert_eq!(c.partition, NestedPartition::new(p).unwrap());
        for l in 0..2 {
            for v in 0..6 {
                let block = c.partition.project(l)[v];
                assert_abs_diff_eq!(c.marginal(l, v).prob(block), 1.0);
            }
        }
        assert_abs_diff_eq!(c.uncertainty, 0.0);
        assert_eq!(c.iterations, 1);
        assert!(c.entropy.is_none());
    }

    #[test]
    fn test_label_switching_is_undone() {
        let trace = trace_of(vec![
            vec![vec![0, 0, 0, 1, 1, 1]],
            vec![vec![1, 1, 1, 0, 0, 0]],
            vec![vec![1, 1, 0, 0, 0, 0]],
        ]);
        let c = build_consensus(&trace, None).unwrap();
        assert_eq!(c.partition.level(0), &[0, 0, 0, 1, 1, 1]);

        // node 2 sits in block 0 in two of three samples
        assert_abs_diff_eq!(c.marginal(0, 2).prob(0), 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c.marginal(0, 2).prob(1), 1.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c.uncertainty, (1.0 / 3.0) / 6.0, epsilon = 1e-12);

        for dist in &c.marginals[0] {
            assert_abs_diff_eq!(dist.total(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_upper_levels_stay_nested() {
        let trace = trace_of(vec![
            vec![vec![0, 0, 1, 1, 2, 2, 3, 3], vec![0, 0, 1, 1]],
            vec![vec![0, 0, 1, 1, 2, 2, 3, 3], vec![0, 1, 1, 1]],
            vec![vec![0, 0, 1, 1, 2, 2, 3, 3], vec![0, 0, 1, 1]],
        ]);
        let c = build_consensus(&trace, None).unwrap();
        assert!(c.partition.validate().is_ok());
        assert_eq!(c.partition.level(1), &[0, 0, 1, 1]);
        // block 1 joins the other side in one sample out of three
        assert_abs_diff_eq!(c.marginal(1, 2).prob(0), 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c.marginal(1, 2).prob(1), 1.0 / 3.0, epsilon = 1e-12);
        assert_eq!(c.marginal(1, 2), c.marginal(1, 3));
    }

    #[test]
    fn test_upper_marginals_cover_the_consensus_block() {
        // node 3 leaves block 1 at level 0 in two samples and lands on the
        // other side of level 1 each time
        let trace = trace_of(vec![
            vec![vec![0, 0, 0, 1, 1, 2, 2], vec![0, 0, 1]],
            vec![vec![0, 0, 1, 2, 1, 2, 2], vec![0, 0, 1]],
            vec![vec![0, 0, 1, 2, 1, 2, 2], vec![0, 0, 1]],
            vec![vec![0, 0, 1, 1, 1, 2, 2], vec![0, 0, 1]],
            vec![vec![0, 0, 1, 1, 1, 2, 2], vec![0, 0, 1]],
        ]);
        let c = build_consensus(&trace, None).unwrap();
        assert_eq!(c.partition.level(0), &[0, 0, 1, 1, 1, 2, 2]);
        assert_eq!(c.partition.level(1), &[0, 0, 1]);

        // 13 of the 15 level-1 votes of block 1 go to the left side
        for v in 2..5 {
            assert_abs_diff_eq!(c.marginal(1, v).prob(0), 13.0 / 15.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(c.marginal(0, 3).prob(1), 3.0 / 5.0, epsilon = 1e-12);

        for l in 0..c.partition.num_levels() {
            let blocks = c.partition.project(l);
            for (v, &b) in blocks.iter().enumerate() {
                assert!(c.marginal(l, v).prob(b) > 0.0, "level {} node {}", l, v);
                assert_abs_diff_eq!(c.marginal(l, v).total(), 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_input_errors() {
        let err = build_consensus(&SampleTrace::default(), None).unwrap_err();
        assert_eq!(err.downcast_ref::<NsbmError>(), Some(&NsbmError::EmptyTrace));

        let trace = trace_of(vec![vec![vec![0, 1]], vec![vec![0, 1, 1]]]);
        let err = build_consensus(&trace, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NsbmError>(),
            Some(NsbmError::NodeCountMismatch { .. })
        ));

        let trace = trace_of(vec![vec![vec![0, 1]], vec![vec![0, 1], vec![0, 0]]]);
        let err = build_consensus(&trace, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NsbmError>(),
            Some(NsbmError::LevelCountMismatch { .. })
        ));
    }
}
