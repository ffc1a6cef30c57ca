//! Circuit breaker (entropy detector) for repeating failures.
//!
//! Tracks normalised failure signatures of non-adversarial failed attempts
//! in a rolling window. When one signature reaches the threshold inside the
//! window the circuit opens and the session stops, whatever budget or tier
//! headroom remains. Signatures are counted independently; a different error
//! does not reset anyone else's count.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::LazyLock;

use crate::record::AttemptRecord;

/// Breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Number of most recent signatures kept.
    pub window: usize,
    /// Occurrences of one signature within the window that trip the breaker.
    pub threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window: 10,
            threshold: 3,
        }
    }
}

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Attempts allowed.
    Closed,
    /// Tripped: the session must stop.
    Open,
}

/// Details of a trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerTrip {
    /// Normalised signature that repeated.
    pub signature: String,
    pub occurrences: u32,
    pub tier_name: String,
    pub attempt: u32,
}

static HEX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b0x[0-9a-f]+\b").unwrap());

static PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[a-z]:)?(?:[/\\][\w.\-]+){2,}").unwrap());

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b").unwrap()
});

/// Standalone numbers, optionally carrying a time unit (`30s`, `0.52s`).
/// Digits inside identifiers such as `test_case_1` are left alone.
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?(ms|us|ns|s)?\b").unwrap());

/// Normalise a raw error message so incidental detail (line numbers,
/// addresses, absolute paths, ids) does not split one failure into many.
pub fn normalize_signature(raw: &str) -> String {
    let text = raw.to_lowercase();
    let text = HEX_RE.replace_all(&text, "<hex>");
    let text = PATH_RE.replace_all(&text, "<path>");
    let text = UUID_RE.replace_all(&text, "<uuid>");
    let text = NUMBER_RE.replace_all(&text, "#${1}");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rolling-window repeat detector for one session.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    window: VecDeque<String>,
    trip: Option<BreakerTrip>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let config = BreakerConfig {
            window: config.window.max(1),
            threshold: config.threshold.max(1),
        };
        Self {
            config,
            window: VecDeque::with_capacity(config.window),
            trip: None,
        }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Feed one attempt. Passing attempts are ignored; adversarial notes are
    /// never part of the signature.
    pub fn observe(&mut self, record: &AttemptRecord) -> Option<BreakerTrip> {
        let raw = record.failure_signature()?;
        let (signature, occurrences) = self.observe_signature(&raw)?;
        let trip = BreakerTrip {
            signature,
            occurrences,
            tier_name: record.tier_name.clone(),
            attempt: record.attempt,
        };
        self.trip = Some(trip.clone());
        Some(trip)
    }

    /// Push a raw signature; returns the normalised signature and its count
    /// if this push reached the threshold.
    pub fn observe_signature(&mut self, raw: &str) -> Option<(String, u32)> {
        let signature = normalize_signature(raw);
        if self.window.len() == self.config.window {
            self.window.pop_front();
        }
        self.window.push_back(signature.clone());

        let occurrences = self.count(&signature);
        (occurrences >= self.config.threshold).then_some((signature, occurrences))
    }

    /// Occurrences of an already-normalised signature in the window.
    pub fn count(&self, signature: &str) -> u32 {
        self.window.iter().filter(|s| s.as_str() == signature).count() as u32
    }

    pub fn state(&self) -> CircuitState {
        if self.trip.is_some() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn trip(&self) -> Option<&BreakerTrip> {
        self.trip.as_ref()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
