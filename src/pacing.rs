//! Poisson pacing
//!
//! Inter-arrival delays are drawn independently from an exponential
//! distribution with mean `1/rate`, giving a memoryless arrival process at the
//! requested average rate.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp1};
use std::time::Duration;

/// Exponential inter-arrival sampler
#[derive(Debug, Clone)]
pub struct Pacer {
    rng: StdRng,
}

impl Pacer {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic sampler for reproducible runs
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Delay before the next event at `rate` events per second.
    ///
    /// Returns `None` when the delay is unbounded: a zero (or otherwise
    /// non-positive) rate pauses emission.
    pub fn next_delay(&mut self, rate: f64) -> Option<Duration> {
        if !(rate > 0.0) || !rate.is_finite() {
            return None;
        }
        let sample: f64 = Exp1.sample(&mut self.rng);
        Duration::try_from_secs_f64(sample / rate).ok()
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new()
    }
}
