//! Generic plumbing shared by MCMC drivers: sample containers,
//! inverse-temperature schedules and run control.

pub mod chain;
pub mod control;
pub mod schedule;

pub use chain::McmcChain;
pub use control::{chain_seed, StopFlag};
pub use schedule::Schedule;
