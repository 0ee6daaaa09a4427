//! Label correspondence between partitions of the same items.
//!
//! Block labels are arbitrary, so before two partitions can be compared
//! the labels of one are renamed to agree with the other as much as
//! possible: the one-to-one label matching maximizing the number of items
//! placed in corresponding blocks (Hungarian algorithm on the contingency
//! table).

use crate::error::NsbmError;
use crate::partition::{count_blocks, Partition};

/// Rename the labels of `sample` to best agree with `reference`.
///
/// Every sample label is matched to at most one reference label. Sample
/// labels left without an overlapping partner get fresh labels starting at
/// `max(reference) + 1`, in increasing order of their original value.
pub fn align_labels(reference: &[usize], sample: &[usize]) -> anyhow::Result<Partition> {
    if reference.len() != sample.len() {
        return Err(NsbmError::NodeCountMismatch {
            expected: reference.len(),
            found: sample.len(),
        }
        .into());
    }

    let mapping = match_labels(reference, sample);
    Ok(sample.iter().map(|&r| mapping[r]).collect())
}

/// `mapping[sample label] = aligned label`
pub(crate) fn match_labels(reference: &[usize], sample: &[usize]) -> Vec<usize> {
    let ka = count_blocks(reference);
    let kb = count_blocks(sample);
    let m = ka.max(kb);

    let mut overlap = vec![0_i64; kb * ka];
    for (&a, &b) in reference.iter().zip(sample) {
        overlap[b * ka + a] += 1;
    }

    let mut cost = vec![0_i64; m * m];
    for b in 0..kb {
        for a in 0..ka {
            cost[b * m + a] = -overlap[b * ka + a];
        }
    }
    let assign = hungarian(&cost, m);

    let mut next = ka;
    (0..kb)
        .map(|b| {
            let a = assign[b];
            if a < ka && overlap[b * ka + a] > 0 {
                a
            } else {
                next += 1;
                next - 1
            }
        })
        .collect()
}

/// Minimum-cost perfect assignment on a square `m x m` cost matrix
/// (row-major), by shortest augmenting paths with dual potentials.
///
/// Returns `assign[row] = column`.
fn hungarian(cost: &[i64], m: usize) -> Vec<usize> {
    const INF: i64 = i64::MAX / 4;

    // 1-based; column 0 is the virtual root of each augmenting search
    let mut u = vec![0_i64; m + 1];
    let mut v = vec![0_i64; m + 1];
    let mut row_of = vec![0_usize; m + 1];
    let mut way = vec![0_usize; m + 1];

    for i in 1..=m {
        row_of[0] = i;
        let mut j0 = 0;
        let mut minv = vec![INF; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = row_of[j0];
            let mut delta = INF;
            let mut j1 = 0;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = cost[(i0 - 1) * m + (j - 1)] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[row_of[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if row_of[j0] == 0 {
                break;
            }
        }

        // flip the augmenting path
        loop {
            let j1 = way[j0];
            row_of[j0] = row_of[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assign = vec![0; m];
    for j in 1..=m {
        if row_of[j] > 0 {
            assign[row_of[j] - 1] = j - 1;
        }
    }
    assign
}
