use serde::{Deserialize, Serialize};

/// Collected MCMC samples with their energies, in sweep order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McmcChain<P> {
    pub samples: Vec<P>,
    pub energies: Vec<f64>,
}

impl<P> Default for McmcChain<P> {
    fn default() -> Self {
        Self {
            samples: vec![],
            energies: vec![],
        }
    }
}

impl<P> McmcChain<P> {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            samples: Vec::with_capacity(n),
            energies: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, sample: P, energy: f64) {
        self.samples.push(sample);
        self.energies.push(energy);
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&P, f64)> {
        self.samples.iter().zip(self.energies.iter().copied())
    }

    /// Index of the lowest-energy sample; the earliest one wins ties.
    pub fn argmin_energy(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &e) in self.energies.iter().enumerate() {
            match best {
                Some((_, b)) if e >= b => {}
                _ => best = Some((i, e)),
            }
        }
        best.map(|(i, _)| i)
    }

    /// Append another chain after this one.
    pub fn extend(&mut self, other: McmcChain<P>) {
        self.samples.extend(other.samples);
        self.energies.extend(other.energies);
    }

    /// Concatenate chains in the given order.
    pub fn concat(chains: impl IntoIterator<Item = McmcChain<P>>) -> Self {
        let mut ret = Self::default();
        for c in chains {
            ret.extend(c);
        }
        ret
    }

    /// Average energy; `None` for an empty chain.
    pub fn mean_energy(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(self.energies.iter().sum::<f64>() / self.n_samples() as f64)
    }
}

impl<P: Clone> McmcChain<P> {
    /// A sub-chain made of the samples at `indices`, in that order.
    pub fn subset(&self, indices: &[usize]) -> Self {
        let mut ret = Self::with_capacity(indices.len());
        for &i in indices {
            ret.push(self.samples[i].clone(), self.energies[i]);
        }
        ret
    }
}
