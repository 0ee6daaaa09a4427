use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Inverse temperature (beta) used by each sweep of a run.
///
/// `Greedy` is beta = ∞: only moves that do not increase the energy are kept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Schedule {
    #[default]
    Greedy,
    Fixed(f64),
    /// Linear interpolation of beta from `from` (first sweep) to `to` (last sweep)
    Linear { from: f64, to: f64 },
}

impl Schedule {
    /// Beta for sweep `sweep` out of `num_sweeps`.
    pub fn beta(&self, sweep: usize, num_sweeps: usize) -> f64 {
        match *self {
            Schedule::Greedy => f64::INFINITY,
            Schedule::Fixed(beta) => beta,
            Schedule::Linear { from, to } => {
                if num_sweeps <= 1 {
                    return to;
                }
                let frac = sweep.min(num_sweeps - 1) as f64 / (num_sweeps - 1) as f64;
                from + (to - from) * frac
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        match *self {
            Schedule::Greedy => true,
            Schedule::Fixed(beta) => beta > 0.0 && !beta.is_nan(),
            Schedule::Linear { from, to } => from > 0.0 && to > 0.0 && from.is_finite() && !to.is_nan(),
        }
    }
}

/// Parses `greedy`, `fixed:<beta>` and `linear:<from>:<to>`.
impl FromStr for Schedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let num = |x: &str| {
            x.trim()
                .parse::<f64>()
                .map_err(|e| format!("bad beta `{}` in schedule `{}`: {}", x, s, e))
        };
        let ret = match parts.as_slice() {
            ["greedy"] | ["inf"] => Schedule::Greedy,
            ["fixed", beta] => Schedule::Fixed(num(beta)?),
            ["linear", from, to] => Schedule::Linear {
                from: num(from)?,
                to: num(to)?,
            },
            _ => return Err(format!("unknown schedule `{}`", s)),
        };
        if !ret.is_valid() {
            return Err(format!("schedule `{}` needs positive inverse temperatures", s));
        }
        Ok(ret)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Greedy => write!(f, "greedy"),
            Schedule::Fixed(beta) => write!(f, "fixed:{}", beta),
            Schedule::Linear { from, to } => write!(f, "linear:{}:{}", from, to),
        }
    }
}
