// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local health observation shared by the vote gate and the data plane.

use serde::{Deserialize, Serialize};

/// One observation of local service health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    /// 95th-percentile request latency in milliseconds.
    pub p95: f64,
    /// Fraction of failing requests in the window, 0.0..=1.0.
    pub error_rate: f64,
    /// Number of samples taken so far.
    pub n: u64,
}

impl Default for HealthSample {
    fn default() -> Self {
        Self { p95: 120.0, error_rate: 0.01, n: 0 }
    }
}
