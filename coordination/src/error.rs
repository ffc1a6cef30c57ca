//! Error taxonomy for the repair loop.
//!
//! Only [`LadderError`] ever stops a session before it starts. Collaborator
//! errors are folded into errored attempts, and audit errors are swallowed by
//! [`crate::audit::AuditLog`]. Budget and circuit-breaker stops are outcomes,
//! not errors.

use std::path::PathBuf;
use thiserror::Error;

use crate::collaborators::AgentRole;

/// Structural problems with a tier ladder or session caps.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LadderError {
    #[error("tier ladder is empty")]
    EmptyLadder,

    #[error("tier {index} has an empty name")]
    EmptyName { index: usize },

    #[error("duplicate tier name '{name}'")]
    DuplicateName { name: String },

    #[error("tier '{tier}': unknown pipeline mode '{mode}' (expected 'restricted' or 'full')")]
    UnknownMode { tier: String, mode: String },

    #[error("tier '{tier}': unknown agent role '{role}'")]
    UnknownRole { tier: String, role: String },

    #[error("tier '{tier}': no model assigned for role {role}")]
    MissingModel { tier: String, role: AgentRole },

    #[error("tier '{tier}': attempt cap must be positive, got {cap}")]
    NonPositiveCap { tier: String, cap: i64 },

    #[error("tier '{tier}': no agent registered for role {role}")]
    NoAgentForRole { tier: String, role: AgentRole },

    #[error("invalid budget: {reason}")]
    InvalidBudget { reason: String },
}

/// Failure reported by an agent collaborator.
#[derive(Error, Debug, Clone)]
#[error("{role} agent failed: {message}")]
pub struct AgentError {
    pub role: AgentRole,
    pub message: String,
    /// Spend already incurred before the failure, if the agent knows it.
    pub cost_usd: f64,
    pub tokens_used: u64,
}

impl AgentError {
    pub fn new(role: AgentRole, message: impl Into<String>) -> Self {
        Self {
            role,
            message: message.into(),
            cost_usd: 0.0,
            tokens_used: 0,
        }
    }

    /// Attach spend that was consumed before the agent gave up.
    pub fn with_spend(mut self, cost_usd: f64, tokens_used: u64) -> Self {
        self.cost_usd = cost_usd;
        self.tokens_used = tokens_used;
        self
    }
}

/// Failure to run the test command at all.
#[derive(Error, Debug)]
pub enum TestRunnerError {
    #[error("invalid test command: {0:?}")]
    InvalidCommand(String),

    #[error("failed to spawn '{command}' in {dir}: {source}")]
    Spawn {
        command: String,
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("test command timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("test runner failed: {0}")]
    Other(String),
}

/// Audit sink failures. Never surfaced past [`crate::audit::AuditLog`].
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit sink busy (lock contention on {0})")]
    Contention(String),

    #[error("audit lock poisoned")]
    LockPoisoned,

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Configuration loading failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidOverride { key: String, value: String },
}
