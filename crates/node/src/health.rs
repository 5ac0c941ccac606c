// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local health probing behind a trait so the simulated walk can be
//! swapped for a real metrics source (or a scripted one in tests).

use std::collections::VecDeque;

use canary_core::HealthSample;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of local health observations.
///
/// Sampled by the participant's vote gate and by the periodic snapshot
/// loop; each call may advance internal state.
pub trait HealthProbe: Send {
    fn sample(&mut self) -> HealthSample;
}

/// Simulated service health: a bounded random walk around a healthy
/// baseline. Stays within the gate thresholds most of the time but can
/// drift across them.
pub struct SimulatedProbe {
    sample: HealthSample,
    rng: StdRng,
}

impl SimulatedProbe {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic walk for reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self { sample: HealthSample::default(), rng }
    }
}

impl Default for SimulatedProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthProbe for SimulatedProbe {
    fn sample(&mut self) -> HealthSample {
        self.sample.p95 = (self.sample.p95 + self.rng.gen_range(-15.0..15.0)).clamp(40.0, 400.0);
        self.sample.error_rate =
            (self.sample.error_rate + self.rng.gen_range(-0.01..0.01)).clamp(0.0, 0.2);
        self.sample.n += 1;
        self.sample.clone()
    }
}

/// Probe returning the same observation forever. Test double for forcing
/// a gate verdict.
pub struct FixedProbe(pub HealthSample);

impl FixedProbe {
    /// A sample comfortably inside the gate.
    pub fn healthy() -> Self {
        Self(HealthSample { p95: 120.0, error_rate: 0.01, n: 1 })
    }

    /// A sample that fails the gate on latency.
    pub fn unhealthy() -> Self {
        Self(HealthSample { p95: 500.0, error_rate: 0.12, n: 1 })
    }
}

impl HealthProbe for FixedProbe {
    fn sample(&mut self) -> HealthSample {
        let mut sample = self.0.clone();
        self.0.n += 1;
        sample.n = self.0.n;
        sample
    }
}

/// Probe that plays back a script of observations, then repeats the last
/// one. Test double for gates that change verdict between attempts.
pub struct ScriptedProbe {
    steps: VecDeque<HealthSample>,
    last: HealthSample,
}

impl ScriptedProbe {
    pub fn new(steps: impl IntoIterator<Item = HealthSample>) -> Self {
        let steps: VecDeque<HealthSample> = steps.into_iter().collect();
        let last = steps.back().cloned().unwrap_or_default();
        Self { steps, last }
    }
}

impl HealthProbe for ScriptedProbe {
    fn sample(&mut self) -> HealthSample {
        match self.steps.pop_front() {
            Some(sample) => {
                self.last = sample.clone();
                sample
            }
            None => self.last.clone(),
        }
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
