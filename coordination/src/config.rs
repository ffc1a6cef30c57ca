//! Loop configuration: a TOML file plus `REPAIR_*` environment overrides.
//!
//! This is the outer layer. The engine itself only ever sees a validated
//! [`TierLadder`], a [`Budget`] and an [`EngineConfig`].
//!
//! ```toml
//! [budget]
//! max_cost_usd = 5.0
//! max_duration_secs = 3600
//! max_iterations = 20
//!
//! [circuit_breaker]
//! window = 10
//! threshold = 3
//!
//! [[tiers]]
//! name = "fast"
//! mode = "restricted"
//! max_attempts = 3
//! [tiers.models]
//! generate = "small-coder"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::accumulator::DEFAULT_CHAR_BUDGET;
use crate::audit::{AuditLog, JsonlAuditSink};
use crate::budget::Budget;
use crate::circuit_breaker::BreakerConfig;
use crate::engine::EngineConfig;
use crate::error::{AuditError, ConfigError, LadderError};
use crate::tier::{TierLadder, TierSpec};

pub const ENV_MAX_COST_USD: &str = "REPAIR_MAX_COST_USD";
pub const ENV_MAX_DURATION_SECS: &str = "REPAIR_MAX_DURATION_SECS";
pub const ENV_MAX_ITERATIONS: &str = "REPAIR_MAX_ITERATIONS";
pub const ENV_AUDIT_DIR: &str = "REPAIR_AUDIT_DIR";

const DEFAULT_AUDIT_DIR: &str = ".repair-audit";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSection {
    pub max_cost_usd: f64,
    pub max_duration_secs: u64,
    /// Optional global ceiling across all tiers.
    pub max_iterations: Option<u32>,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            max_cost_usd: 5.0,
            max_duration_secs: 3600,
            max_iterations: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorSection {
    pub char_budget: usize,
}

impl Default for AccumulatorSection {
    fn default() -> Self {
        Self {
            char_budget: DEFAULT_CHAR_BUDGET,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    /// `None` disables persistence.
    pub dir: Option<PathBuf>,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            dir: Some(PathBuf::from(DEFAULT_AUDIT_DIR)),
        }
    }
}

/// Everything needed to assemble one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub budget: BudgetSection,
    pub circuit_breaker: BreakerConfig,
    pub accumulator: AccumulatorSection,
    pub audit: AuditSection,
    pub tiers: Vec<TierSpec>,
}

fn parse_override<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl LoopConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a config file. No env overrides are applied.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply overrides from an arbitrary lookup (the process env in
    /// production, a map in tests).
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_MAX_COST_USD) {
            self.budget.max_cost_usd = parse_override(ENV_MAX_COST_USD, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_DURATION_SECS) {
            self.budget.max_duration_secs = parse_override(ENV_MAX_DURATION_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_ITERATIONS) {
            self.budget.max_iterations = Some(parse_override(ENV_MAX_ITERATIONS, &v)?);
        }
        if let Some(v) = lookup(ENV_AUDIT_DIR) {
            let v = v.trim();
            self.audit.dir = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Fresh ledger for one session.
    pub fn budget(&self) -> Budget {
        let budget = Budget::new(
            self.budget.max_cost_usd,
            Duration::from_secs(self.budget.max_duration_secs),
        );
        match self.budget.max_iterations {
            Some(max) => budget.with_max_iterations(max),
            None => budget,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            breaker: self.circuit_breaker,
            char_budget: self.accumulator.char_budget,
        }
    }

    pub fn ladder(&self) -> Result<TierLadder, LadderError> {
        TierLadder::validate(&self.tiers)
    }

    /// JSONL audit log under `audit.dir`, or a disabled one.
    pub fn audit_log(&self) -> Result<AuditLog, AuditError> {
        match &self.audit.dir {
            Some(dir) => Ok(AuditLog::new(Arc::new(JsonlAuditSink::open(dir)?))),
            None => Ok(AuditLog::disabled()),
        }
    }
}

/// Load a config file and apply environment overrides.
pub fn load_from_path(path: impl AsRef<Path>) -> anyhow::Result<LoopConfig> {
    let path = path.as_ref();
    let mut config = LoopConfig::load(path)
        .with_context(|| format!("loading loop config from {}", path.display()))?;
    config
        .apply_env_overrides()
        .context("applying REPAIR_* overrides")?;
    debug!(
        path = %path.display(),
        tiers = config.tiers.len(),
        max_cost_usd = config.budget.max_cost_usd,
        "loop config loaded"
    );
    Ok(config)
}
