//! Flat and nested block partitions.
//!
//! Level 0 maps every node to a block. Level `l + 1` maps every block label
//! of level `l` to a block of level `l + 1`, so each upper block is a union
//! of lower blocks. Canonical partitions use compact labels `0..B_l`
//! assigned in order of first appearance.

use crate::error::NsbmError;
use serde::{Deserialize, Serialize};

/// Item → block assignment at a single level
pub type Partition = Vec<usize>;

/// Hierarchy of partitions, level 0 finest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NestedPartition {
    levels: Vec<Partition>,
}

impl NestedPartition {
    /// Build a canonical nested partition.
    ///
    /// Labels need not be compact, but level `l + 1` must have an entry for
    /// every label used at level `l`.
    pub fn new(levels: Vec<Partition>) -> anyhow::Result<Self> {
        if levels.is_empty() {
            return Err(NsbmError::InvalidPartition("no levels".into()).into());
        }
        if levels[0].is_empty() {
            return Err(NsbmError::InvalidPartition("level 0 is empty".into()).into());
        }
        for l in 1..levels.len() {
            let needed = levels[l - 1].iter().max().map(|&m| m + 1).unwrap_or(0);
            if levels[l].len() < needed {
                return Err(NsbmError::InvalidPartition(format!(
                    "level {} has {} entries but level {} uses label {}",
                    l,
                    levels[l].len(),
                    l - 1,
                    needed - 1
                ))
                .into());
            }
        }
        let mut ret = NestedPartition { levels };
        ret.canonicalize();
        Ok(ret)
    }

    /// Single-level partition.
    pub fn flat(labels: Partition) -> anyhow::Result<Self> {
        Self::new(vec![labels])
    }

    /// Build from node → block projections, one per level.
    ///
    /// Fails if some block of level `l - 1` is split across several blocks
    /// of level `l`.
    pub fn from_projections(projections: &[Partition]) -> anyhow::Result<Self> {
        if projections.is_empty() {
            return Err(NsbmError::InvalidPartition("no levels".into()).into());
        }
        let n = projections[0].len();
        let mut levels = vec![projections[0].clone()];

        for l in 1..projections.len() {
            let lower = &projections[l - 1];
            let upper = &projections[l];
            if upper.len() != n {
                return Err(NsbmError::NodeCountMismatch {
                    expected: n,
                    found: upper.len(),
                }
                .into());
            }
            let nb = lower.iter().max().map(|&m| m + 1).unwrap_or(0);
            let mut parent: Vec<Option<usize>> = vec![None; nb];
            for v in 0..n {
                match parent[lower[v]] {
                    None => parent[lower[v]] = Some(upper[v]),
                    Some(p) if p == upper[v] => {}
                    Some(p) => {
                        return Err(NsbmError::InvalidPartition(format!(
                            "block {} of level {} is split between blocks {} and {} of level {}",
                            lower[v],
                            l - 1,
                            p,
                            upper[v],
                            l
                        ))
                        .into());
                    }
                }
            }
            levels.push(parent.into_iter().map(|p| p.unwrap_or(0)).collect());
        }

        Self::new(levels)
    }

    /// Relabel every level by first appearance and drop unused labels.
    pub fn canonicalize(&mut self) {
        let mut remap = relabel_first_appearance(&mut self.levels[0]);
        for l in 1..self.levels.len() {
            // remap[old] = new label of the level below
            let mut next = vec![0; remap.iter().flatten().count()];
            for (old, new) in remap.iter().enumerate() {
                if let Some(new) = *new {
                    next[new] = self.levels[l][old];
                }
            }
            self.levels[l] = next;
            remap = relabel_first_appearance(&mut self.levels[l]);
        }
    }

    /// Check the structural invariants of a canonical partition.
    pub fn validate(&self) -> anyhow::Result<()> {
        for l in 0..self.levels.len() {
            let b = count_blocks(&self.levels[l]);
            if self.levels[l].is_empty() {
                return Err(NsbmError::InvalidPartition(format!("level {} is empty", l)).into());
            }
            if !is_compact(&self.levels[l]) {
                return Err(NsbmError::InvalidPartition(format!(
                    "level {} labels are not compact",
                    l
                ))
                .into());
            }
            if let Some(up) = self.levels.get(l + 1) {
                if up.len() != b {
                    return Err(NsbmError::InvalidPartition(format!(
                        "level {} has {} entries for {} blocks of level {}",
                        l + 1,
                        up.len(),
                        b,
                        l
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Number of hierarchy levels
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Number of nodes covered by level 0
    pub fn num_nodes(&self) -> usize {
        self.levels[0].len()
    }

    /// Item → block assignment at `level`
    pub fn level(&self, level: usize) -> &[usize] {
        &self.levels[level]
    }

    /// All levels, finest first
    pub fn levels(&self) -> &[Partition] {
        &self.levels
    }

    pub(crate) fn levels_mut(&mut self) -> &mut Vec<Partition> {
        &mut self.levels
    }

    /// Number of blocks at `level`
    pub fn num_blocks(&self, level: usize) -> usize {
        count_blocks(&self.levels[level])
    }

    /// Node → block assignment at `level`
    pub fn project(&self, level: usize) -> Partition {
        let mut ret = self.levels[0].clone();
        for l in 1..=level {
            let up = &self.levels[l];
            for r in ret.iter_mut() {
                *r = up[*r];
            }
        }
        ret
    }

    /// Node → block projections of every level
    pub fn projections(&self) -> Vec<Partition> {
        (0..self.num_levels()).map(|l| self.project(l)).collect()
    }
}

/// Number of labels in `0..=max(labels)`.
pub(crate) fn count_blocks(labels: &[usize]) -> usize {
    labels.iter().max().map(|&m| m + 1).unwrap_or(0)
}

fn is_compact(labels: &[usize]) -> bool {
    let b = count_blocks(labels);
    let mut seen = vec![false; b];
    for &r in labels {
        seen[r] = true;
    }
    seen.into_iter().all(|x| x)
}

/// Relabel in place by order of first appearance.
///
/// Returns `remap[old] = Some(new)` for labels in use.
pub(crate) fn relabel_first_appearance(labels: &mut [usize]) -> Vec<Option<usize>> {
    let mut remap: Vec<Option<usize>> = vec![None; count_blocks(labels)];
    let mut next = 0;
    for r in labels.iter_mut() {
        let new = match remap[*r] {
            Some(x) => x,
            None => {
                remap[*r] = Some(next);
                next += 1;
                next - 1
            }
        };
        *r = new;
    }
    remap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_relabel() {
        let p = NestedPartition::new(vec![vec![5, 5, 2, 2, 7], vec![0, 0, 1, 0, 0, 3, 0, 3]])
            .unwrap();
        assert_eq!(p.level(0), &[0, 0, 1, 1, 2]);
        // old 5 -> 0 (parent 3), old 2 -> 1 (parent 1), old 7 -> 2 (parent 3)
        assert_eq!(p.level(1), &[0, 1, 0]);
        assert_eq!(p.project(1), vec![0, 0, 1, 1, 0]);
        assert!(p.validate().is_ok());
        assert_eq!(p.num_blocks(0), 3);
        assert_eq!(p.num_blocks(1), 2);
    }

    #[test]
    fn test_from_projections_roundtrip() {
        let p = NestedPartition::new(vec![vec![0, 1, 1, 2, 3], vec![0, 0, 1, 1], vec![0, 0]])
            .unwrap();
        let q = NestedPartition::from_projections(&p.projections()).unwrap();
        assert_eq!(p, q);
    }

    #[test]
    fn test_split_block_is_rejected() {
        let err = NestedPartition::from_projections(&[vec![0, 0, 1], vec![0, 1, 1]]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NsbmError>(),
            Some(NsbmError::InvalidPartition(_))
        ));
    }

    #[test]
    fn test_short_upper_level_is_rejected() {
        assert!(NestedPartition::new(vec![vec![0, 1, 2], vec![0, 0]]).is_err());
        assert!(NestedPartition::new(vec![vec![]]).is_err());
    }
}
