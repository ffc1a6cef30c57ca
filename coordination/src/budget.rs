//! Budget Governor — the session-wide cost / time / iteration ledger.
//!
//! One [`Budget`] is built per session and threaded by `&mut` through every
//! tier. Nothing in here decides what exhaustion means; callers do.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LadderError;

/// Why the ledger refused another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// Spent has reached the cost cap.
    Cost,
    /// Elapsed has reached the duration cap.
    Duration,
    /// The next attempt, at the average cost so far, would cross the cost cap.
    ProjectedCost,
    /// The next attempt, at the average duration so far, would cross the duration cap.
    ProjectedDuration,
    /// The optional global iteration ceiling was hit.
    Iterations,
}

impl std::fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cost => write!(f, "cost cap reached"),
            Self::Duration => write!(f, "duration cap reached"),
            Self::ProjectedCost => write!(f, "next attempt would exceed cost cap"),
            Self::ProjectedDuration => write!(f, "next attempt would exceed duration cap"),
            Self::Iterations => write!(f, "iteration ceiling reached"),
        }
    }
}

/// Session-scoped mutable ledger.
///
/// `spent_usd`, `elapsed` and `iterations` only ever grow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    max_cost_usd: f64,
    spent_usd: f64,
    max_duration: Duration,
    elapsed: Duration,
    max_iterations: Option<u32>,
    iterations: u32,
    tokens_used: u64,
}

impl Budget {
    pub fn new(max_cost_usd: f64, max_duration: Duration) -> Self {
        Self {
            max_cost_usd,
            spent_usd: 0.0,
            max_duration,
            elapsed: Duration::ZERO,
            max_iterations: None,
            iterations: 0,
            tokens_used: 0,
        }
    }

    /// Add a global iteration ceiling on top of the tier-local caps.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Check the caps themselves are usable.
    pub fn validate(&self) -> Result<(), LadderError> {
        if !self.max_cost_usd.is_finite() || self.max_cost_usd <= 0.0 {
            return Err(LadderError::InvalidBudget {
                reason: format!("cost cap must be positive, got {}", self.max_cost_usd),
            });
        }
        if self.max_duration.is_zero() {
            return Err(LadderError::InvalidBudget {
                reason: "duration cap must be positive".to_string(),
            });
        }
        if self.max_iterations == Some(0) {
            return Err(LadderError::InvalidBudget {
                reason: "iteration ceiling must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Record one finished attempt. Negative or non-finite costs are ignored
    /// so spend stays monotonic.
    pub fn record_spend(&mut self, cost_usd: f64, duration_delta: Duration) {
        if cost_usd.is_finite() && cost_usd > 0.0 {
            self.spent_usd += cost_usd;
        }
        self.elapsed += duration_delta;
        self.iterations += 1;
    }

    pub fn record_tokens(&mut self, tokens: u64) {
        self.tokens_used = self.tokens_used.saturating_add(tokens);
    }

    /// True once spent ≥ cost cap or elapsed ≥ duration cap.
    pub fn is_exhausted(&self) -> bool {
        self.spent_usd >= self.max_cost_usd || self.elapsed >= self.max_duration
    }

    /// Pre-start gate for the next attempt.
    ///
    /// Beyond the hard caps this projects the next attempt at the running
    /// average, so a session stops *before* an attempt that would cross a cap
    /// rather than after it.
    pub fn pre_attempt_check(&self) -> Option<ExhaustionReason> {
        if self.spent_usd >= self.max_cost_usd {
            return Some(ExhaustionReason::Cost);
        }
        if self.elapsed >= self.max_duration {
            return Some(ExhaustionReason::Duration);
        }
        if let Some(max) = self.max_iterations {
            if self.iterations >= max {
                return Some(ExhaustionReason::Iterations);
            }
        }
        if self.iterations > 0 {
            let avg_cost = self.spent_usd / f64::from(self.iterations);
            if self.spent_usd + avg_cost > self.max_cost_usd {
                return Some(ExhaustionReason::ProjectedCost);
            }
            let avg_duration = self.elapsed / self.iterations;
            if self.elapsed + avg_duration > self.max_duration {
                return Some(ExhaustionReason::ProjectedDuration);
            }
        }
        None
    }

    pub fn spent_usd(&self) -> f64 {
        self.spent_usd
    }

    pub fn max_cost_usd(&self) -> f64 {
        self.max_cost_usd
    }

    pub fn remaining_usd(&self) -> f64 {
        (self.max_cost_usd - self.spent_usd).max(0.0)
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn max_iterations(&self) -> Option<u32> {
        self.max_iterations
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens_used
    }

    /// One-line summary for logging
    pub fn summary(&self) -> String {
        format!(
            "spent=${:.2}/${:.2} elapsed={}s/{}s iterations={} tokens={}",
            self.spent_usd,
            self.max_cost_usd,
            self.elapsed.as_secs(),
            self.max_duration.as_secs(),
            self.iterations,
            self.tokens_used,
        )
    }
}
