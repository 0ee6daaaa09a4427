//! Clustering of posterior samples into modes.
//!
//! Every sample is aligned to the global consensus labelling, so a sample
//! becomes a vector of labels over `(level, node)` positions. A clustering
//! of the samples is scored by its description length
//!
//! ```text
//! DL = partition_dl(mode sizes) + sum_modes sum_positions DirMult(label counts; alpha)
//! ```
//!
//! with the Dirichlet-multinomial taken over the aligned label alphabet of
//! each level. Modes are searched greedily: single-sample moves to the
//! cheapest mode (or a new one), then whole-mode merges, from several
//! starting clusterings; the lowest description length wins.

use crate::consensus::{align_trace, build_consensus, build_consensus_with, trace_projections, ConsensusResult, Tally};
use crate::equilibrate::SampleTrace;
use crate::error::NsbmError;
use crate::model::{ln_binom, ln_gamma, partition_dl};
use crate::options::ModeOptions;
use fnv::FnvHashSet as HashSet;
use log::{debug, info, warn};
use mcmc_util::chain_seed;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Gains smaller than this are treated as ties.
const TOL: f64 = 1e-9;

/// A group of samples sharing one explanation of the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mode {
    /// Indices into the trace, increasing
    pub members: Vec<usize>,
    /// `members.len() / trace.len()`
    pub relative_size: f64,
    /// Lowest-entropy member (earliest on ties)
    pub representative: usize,
    /// Entropy of the representative
    pub representative_entropy: f64,
    /// Consensus of the members alone
    pub consensus: ConsensusResult,
}

/// Cluster the samples of `trace` into modes, largest first (ties by
/// earliest member).
///
/// Fewer than two samples is reported as `NsbmError::DegenerateTrace`;
/// `single_mode` builds the trivial answer in that case.
pub fn cluster_modes(trace: &SampleTrace, opts: &ModeOptions) -> anyhow::Result<Vec<Mode>> {
    opts.validate()?;
    let ns = trace.n_samples();
    if ns < 2 {
        warn!("cannot cluster {} sample(s) into modes", ns);
        return Err(NsbmError::DegenerateTrace(ns).into());
    }

    let projections = trace_projections(trace)?;
    let best = trace.argmin_energy().ok_or(NsbmError::EmptyTrace)?;
    let alignments = align_trace(&projections, best, opts.consensus.max_align_iter);

    // label vector of each sample over (level, node) positions
    let mut kalpha = vec![];
    for alignment in &alignments {
        let alphabet: HashSet<usize> = alignment.aligned.iter().flatten().copied().collect();
        let n = alignment.reference.len();
        kalpha.extend(std::iter::repeat(alphabet.len() as f64 * opts.alpha).take(n));
    }
    let labels: Vec<Vec<usize>> = (0..ns)
        .map(|s| {
            alignments
                .iter()
                .flat_map(|a| a.aligned[s].iter().copied())
                .collect()
        })
        .collect();

    let problem = ModeProblem {
        labels: &labels,
        kalpha: &kalpha,
        alpha: opts.alpha,
    };

    let outcomes: Vec<(Vec<usize>, f64)> = (0..opts.trials)
        .into_par_iter()
        .map(|t| problem.search(t, opts))
        .collect();

    let mut winner = 0;
    for (t, (_, dl)) in outcomes.iter().enumerate() {
        debug!("mode trial {}: description length {:.4}", t, dl);
        if *dl < outcomes[winner].1 {
            winner = t;
        }
    }
    let (assign, dl) = &outcomes[winner];

    let modes = collect_modes(trace, assign, opts)?;
    info!(
        "modes: {} samples -> {} mode(s), description length {:.4}, sizes {:?}",
        ns,
        modes.len(),
        dl,
        modes.iter().map(|m| m.members.len()).collect::<Vec<_>>()
    );
    Ok(modes)
}

/// All samples of `trace` as one mode.
pub fn single_mode(trace: &SampleTrace) -> anyhow::Result<Mode> {
    let consensus = build_consensus(trace, None)?;
    let representative = trace.argmin_energy().ok_or(NsbmError::EmptyTrace)?;
    Ok(Mode {
        members: (0..trace.n_samples()).collect(),
        relative_size: 1.0,
        representative,
        representative_entropy: trace.energies[representative],
        consensus,
    })
}

fn collect_modes(trace: &SampleTrace, assign: &[usize], opts: &ModeOptions) -> anyhow::Result<Vec<Mode>> {
    let nm = assign.iter().max().map(|&m| m + 1).unwrap_or(0);
    let mut groups: Vec<Vec<usize>> = vec![vec![]; nm];
    for (s, &m) in assign.iter().enumerate() {
        groups[m].push(s);
    }
    groups.retain(|g| !g.is_empty());
    groups.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));

    let total = trace.n_samples() as f64;
    groups
        .into_iter()
        .map(|members| {
            let sub = trace.subset(&members);
            let consensus = build_consensus_with(&sub, None, &opts.consensus)?;
            let local = sub.argmin_energy().ok_or(NsbmError::EmptyTrace)?;
            Ok(Mode {
                relative_size: members.len() as f64 / total,
                representative: members[local],
                representative_entropy: sub.energies[local],
                members,
                consensus,
            })
        })
        .collect()
}

/// Label counts of the samples in one mode.
#[derive(Clone)]
struct ModeCounts {
    size: usize,
    counts: Vec<Tally>,
}

impl ModeCounts {
    fn new(positions: usize) -> Self {
        ModeCounts {
            size: 0,
            counts: vec![Tally::default(); positions],
        }
    }

    fn add(&mut self, labels: &[usize]) {
        self.size += 1;
        for (tally, &b) in self.counts.iter_mut().zip(labels) {
            *tally.entry(b).or_insert(0) += 1;
        }
    }

    fn remove(&mut self, labels: &[usize]) {
        self.size -= 1;
        for (tally, &b) in self.counts.iter_mut().zip(labels) {
            if let Some(c) = tally.get_mut(&b) {
                *c -= 1;
                if *c == 0 {
                    tally.remove(&b);
                }
            }
        }
    }

    fn merge(&mut self, other: &ModeCounts) {
        self.size += other.size;
        for (tally, o) in self.counts.iter_mut().zip(&other.counts) {
            for (&b, &c) in o {
                *tally.entry(b).or_insert(0) += c;
            }
        }
    }

    /// Increase of this mode's description length when `labels` joins
    fn join_cost(&self, labels: &[usize], kalpha: &[f64], alpha: f64) -> f64 {
        let n = self.size as f64;
        self.counts
            .iter()
            .zip(labels)
            .zip(kalpha)
            .map(|((tally, b), &ka)| {
                let c = tally.get(b).copied().unwrap_or(0) as f64;
                (ka + n).ln() - (alpha + c).ln()
            })
            .sum()
    }

    /// Negative log Dirichlet-multinomial marginal of all positions
    fn dl(&self, kalpha: &[f64], alpha: f64) -> f64 {
        let n = self.size as f64;
        let la = ln_gamma(alpha);
        self.counts
            .iter()
            .zip(kalpha)
            .map(|(tally, &ka)| {
                let counts: f64 = tally.values().map(|&c| ln_gamma(alpha + c as f64) - la).sum();
                ln_gamma(ka + n) - ln_gamma(ka) - counts
            })
            .sum()
    }

    /// `dl` of the union of two modes, without building it
    fn merged_dl(&self, other: &ModeCounts, kalpha: &[f64], alpha: f64) -> f64 {
        let n = (self.size + other.size) as f64;
        let la = ln_gamma(alpha);
        self.counts
            .iter()
            .zip(&other.counts)
            .zip(kalpha)
            .map(|((a, b), &ka)| {
                let mut counts = 0.0;
                for (label, &c) in a {
                    let c = c + b.get(label).copied().unwrap_or(0);
                    counts += ln_gamma(alpha + c as f64) - la;
                }
                for (label, &c) in b {
                    if !a.contains_key(label) {
                        counts += ln_gamma(alpha + c as f64) - la;
                    }
                }
                ln_gamma(ka + n) - ln_gamma(ka) - counts
            })
            .sum()
    }
}

struct ModeProblem<'a> {
    labels: &'a [Vec<usize>],
    kalpha: &'a [f64],
    alpha: f64,
}

impl ModeProblem<'_> {
    fn positions(&self) -> usize {
        self.kalpha.len()
    }

    /// Greedy search from the `trial`-th starting clustering. Returns the
    /// compact mode assignment and its description length.
    fn search(&self, trial: usize, opts: &ModeOptions) -> (Vec<usize>, f64) {
        let ns = self.labels.len();
        let mut rng = SmallRng::seed_from_u64(chain_seed(opts.seed, trial));

        let assign: Vec<usize> = match trial {
            0 => vec![0; ns],
            1 => (0..ns).collect(),
            _ => {
                let k = (ns as f64).sqrt().ceil() as usize;
                (0..ns).map(|_| rng.random_range(0..k)).collect()
            }
        };
        let (mut assign, mut modes) = self.build(assign);

        let mut order: Vec<usize> = (0..ns).collect();
        for sweep in 0..opts.max_sweeps {
            order.shuffle(&mut rng);
            let mut changed = false;
            for &s in &order {
                changed |= self.move_sample(s, &mut assign, &mut modes);
            }
            changed |= self.merge_modes(&mut assign, &mut modes);
            if !changed {
                debug!("mode trial {} converged after {} sweeps", trial, sweep + 1);
                break;
            }
        }

        let dl = self.total_dl(&modes);
        (assign, dl)
    }

    /// Compact an assignment and count labels per mode.
    fn build(&self, mut assign: Vec<usize>) -> (Vec<usize>, Vec<ModeCounts>) {
        let remap = crate::partition::relabel_first_appearance(&mut assign);
        let nm = remap.iter().flatten().count();
        let mut modes = vec![ModeCounts::new(self.positions()); nm];
        for (s, &m) in assign.iter().enumerate() {
            modes[m].add(&self.labels[s]);
        }
        (assign, modes)
    }

    fn total_dl(&self, modes: &[ModeCounts]) -> f64 {
        let sizes: Vec<f64> = modes.iter().map(|m| m.size as f64).collect();
        partition_dl(&sizes) + modes.iter().map(|m| m.dl(self.kalpha, self.alpha)).sum::<f64>()
    }

    /// Move sample `s` to the mode where it costs least. Returns whether
    /// it moved.
    fn move_sample(&self, s: usize, assign: &mut [usize], modes: &mut Vec<ModeCounts>) -> bool {
        let labels = &self.labels[s];
        let a = assign[s];
        modes[a].remove(labels);

        let ns = self.labels.len() as f64;
        let occupied = modes.iter().filter(|m| m.size > 0).count() as f64;
        let fresh_cost = self
            .kalpha
            .iter()
            .map(|&ka| ka.ln() - self.alpha.ln())
            .sum::<f64>()
            + ln_binom(ns - 1.0, occupied)
            - ln_binom(ns - 1.0, occupied - 1.0);

        let cost = |m: &ModeCounts| {
            if m.size == 0 {
                fresh_cost
            } else {
                m.join_cost(labels, self.kalpha, self.alpha) - (m.size as f64 + 1.0).ln()
            }
        };

        // staying put wins ties
        let mut best = a;
        let mut best_cost = cost(&modes[a]);
        for (m, mode) in modes.iter().enumerate() {
            if m == a || mode.size == 0 {
                continue;
            }
            let c = cost(mode);
            if c < best_cost - TOL {
                best = m;
                best_cost = c;
            }
        }
        if modes[a].size > 0 && fresh_cost < best_cost - TOL {
            best = modes.len();
            modes.push(ModeCounts::new(self.positions()));
        }

        modes[best].add(labels);
        assign[s] = best;
        if modes[a].size == 0 {
            remove_mode(a, assign, modes);
        }
        best != a
    }

    /// Apply the best improving merge of two modes until none is left.
    fn merge_modes(&self, assign: &mut [usize], modes: &mut Vec<ModeCounts>) -> bool {
        let mut merged_any = false;
        loop {
            let dls: Vec<f64> = modes.iter().map(|m| m.dl(self.kalpha, self.alpha)).collect();
            let sizes: Vec<f64> = modes.iter().map(|m| m.size as f64).collect();
            let part = partition_dl(&sizes);

            let mut best: Option<(usize, usize)> = None;
            let mut best_delta = -TOL;
            for a in 0..modes.len() {
                for b in a + 1..modes.len() {
                    let mut merged_sizes = sizes.clone();
                    merged_sizes[a] += merged_sizes[b];
                    merged_sizes[b] = 0.0;
                    let delta = modes[a].merged_dl(&modes[b], self.kalpha, self.alpha) - dls[a] - dls[b]
                        + partition_dl(&merged_sizes)
                        - part;
                    if delta < best_delta {
                        best = Some((a, b));
                        best_delta = delta;
                    }
                }
            }

            let Some((a, b)) = best else {
                return merged_any;
            };
            let other = modes[b].clone();
            modes[a].merge(&other);
            for x in assign.iter_mut() {
                if *x == b {
                    *x = a;
                }
            }
            modes[b].size = 0;
            remove_mode(b, assign, modes);
            merged_any = true;
        }
    }
}

/// Drop empty mode `m`; the last mode takes its index.
fn remove_mode(m: usize, assign: &mut [usize], modes: &mut Vec<ModeCounts>) {
    let last = modes.len() - 1;
    modes.swap_remove(m);
    if m != last {
        for x in assign.iter_mut() {
            if *x == last {
                *x = m;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::NestedPartition;
    use approx::assert_abs_diff_eq;

    fn trace_of(parts: &[(Vec<usize>, usize)]) -> SampleTrace {
        let mut trace = SampleTrace::default();
        for (labels, copies) in parts {
            for _ in 0..*copies {
                trace.push(NestedPartition::flat(labels.clone()).unwrap(), 1.0);
            }
        }
        trace
    }

    #[test]
    fn test_identical_samples_form_one_mode() {
        let trace = trace_of(&[(vec![0, 0, 1, 1, 2, 2], 12)]);
        let modes = cluster_modes(&trace, &ModeOptions::default()).unwrap();
        assert_eq!(modes.len(), 1);
        assert_abs_diff_eq!(modes[0].relative_size, 1.0);
        assert_eq!(modes[0].members, (0..12).collect::<Vec<_>>());
        assert_eq!(modes[0].representative, 0);
    }

    #[test]
    fn test_two_distinct_groups() {
        let a = vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2];
        let b = vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2];
        let mut trace = trace_of(&[(a.clone(), 6), (b.clone(), 4)]);
        trace.energies[7] = 0.5;

        let modes = cluster_modes(&trace, &ModeOptions::default()).unwrap();
        assert_eq!(modes.len(), 2);
        assert_eq!(modes[0].members, (0..6).collect::<Vec<_>>());
        assert_eq!(modes[1].members, (6..10).collect::<Vec<_>>());
        assert_abs_diff_eq!(modes[0].relative_size, 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(modes[1].relative_size, 0.4, epsilon = 1e-12);
        assert_eq!(modes[1].representative, 7);
        assert_abs_diff_eq!(modes[1].representative_entropy, 0.5);

        assert_eq!(modes[0].consensus.partition, NestedPartition::flat(a).unwrap());
        assert_eq!(modes[1].consensus.partition, NestedPartition::flat(b).unwrap());
    }

    #[test]
    fn test_merged_dl_matches_merge() {
        let labels = vec![vec![0, 1, 1], vec![0, 0, 1], vec![2, 1, 0]];
        let kalpha = vec![3.0, 2.0, 2.0];
        let mut x = ModeCounts::new(3);
        x.add(&labels[0]);
        x.add(&labels[1]);
        let mut y = ModeCounts::new(3);
        y.add(&labels[2]);

        let predicted = x.merged_dl(&y, &kalpha, 1.0);
        let before = x.dl(&kalpha, 1.0);
        let join = x.join_cost(&labels[2], &kalpha, 1.0);
        x.merge(&y);
        assert_abs_diff_eq!(x.dl(&kalpha, 1.0), predicted, epsilon = 1e-9);
        assert_abs_diff_eq!(before + join, predicted, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_trace() {
        let trace = trace_of(&[(vec![0, 1, 1], 1)]);
        let err = cluster_modes(&trace, &ModeOptions::default()).unwrap_err();
        assert_eq!(err.downcast_ref::<NsbmError>(), Some(&NsbmError::DegenerateTrace(1)));

        let mode = single_mode(&trace).unwrap();
        assert_eq!(mode.members, vec![0]);
        assert_abs_diff_eq!(mode.relative_size, 1.0);
        assert!(single_mode(&SampleTrace::default()).is_err());
    }
}
