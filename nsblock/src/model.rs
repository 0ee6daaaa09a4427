//! Description-length terms of the Poisson (Gamma-Poisson conjugate)
//! nested block model.
//!
//! # Score formula (log marginal likelihood of one block pair)
//!
//! ```text
//! score(a0, b0, edge, total) = a0 * ln(b0) + lgamma(a0 + edge)
//!                              - lgamma(a0) - (a0 + edge) * ln(b0 + total)
//! ```
//!
//! # Partition description length
//!
//! ```text
//! partition_dl(N, n) = ln C(N - 1, B - 1) + lgamma(N + 1) - sum_r lgamma(n_r + 1) + ln N
//! ```

use serde::{Deserialize, Serialize};
use special::Gamma as SpecialGamma;

/// Gamma prior on the Poisson rate of every block pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GammaPrior {
    /// Gamma shape parameter (> 0)
    pub a0: f64,
    /// Gamma rate parameter (> 0)
    pub b0: f64,
}

impl Default for GammaPrior {
    fn default() -> Self {
        GammaPrior { a0: 1.0, b0: 1.0 }
    }
}

/// How edge weights enter the likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EdgeModel {
    /// Edge weights are Poisson counts
    #[default]
    Weighted,
    /// Every edge counts once regardless of its weight
    Unweighted,
}

impl EdgeModel {
    /// Count contributed by an edge of weight `w`
    #[inline]
    pub fn count(&self, w: f64) -> f64 {
        match self {
            EdgeModel::Weighted => w,
            EdgeModel::Unweighted => 1.0,
        }
    }
}

/// `ln Γ(x)`
#[inline]
pub fn ln_gamma(x: f64) -> f64 {
    SpecialGamma::ln_gamma(x).0
}

/// Poisson-Gamma conjugate score of one block pair.
///
/// This is the hot path of every entropy evaluation, called O(B²) times
/// per level.
///
/// * `a0` - Gamma shape parameter (> 0)
/// * `b0` - Gamma rate parameter (> 0)
/// * `edge` - Observed edge count (sum of weights) for this block pair
/// * `total` - Number of item pairs for this block pair
#[inline]
pub fn poisson_score(a0: f64, b0: f64, edge: f64, total: f64) -> f64 {
    a0 * b0.ln() + ln_gamma(a0 + edge) - ln_gamma(a0) - (a0 + edge) * (b0 + total).ln()
}

/// `ln C(n, k)`
#[inline]
pub fn ln_binom(n: f64, k: f64) -> f64 {
    ln_gamma(n + 1.0) - ln_gamma(k + 1.0) - ln_gamma(n - k + 1.0)
}

/// Description length of a partition of `N = sum(sizes)` items.
///
/// Encodes the number of blocks, the block sizes and the assignment given
/// the sizes. Empty blocks in `sizes` are ignored.
pub fn partition_dl(sizes: &[f64]) -> f64 {
    let nn: f64 = sizes.iter().sum();
    if nn < 1.0 {
        return 0.0;
    }
    let bb = sizes.iter().filter(|&&s| s > 0.0).count() as f64;
    let mut dl = ln_binom(nn - 1.0, bb - 1.0) + ln_gamma(nn + 1.0) + nn.ln();
    for &s in sizes {
        if s > 0.0 {
            dl -= ln_gamma(s + 1.0);
        }
    }
    dl
}
