//! Tier definitions and ladder validation.
//!
//! Raw [`TierSpec`] entries come from configuration. [`TierLadder::validate`]
//! turns them into immutable [`TierDefinition`]s or rejects the whole ladder
//! before anything external is called.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::collaborators::{AgentRole, AgentRoster};
use crate::error::LadderError;

/// Which phases a tier runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// GENERATE → TEST
    Restricted,
    /// GATHER → GENERATE → REVIEW → TEST → optional ADVERSARIAL
    Full,
}

impl PipelineMode {
    pub fn parse_mode(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restricted" => Some(Self::Restricted),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    /// Roles that must have a model assigned.
    pub fn required_roles(self) -> &'static [AgentRole] {
        match self {
            Self::Restricted => &[AgentRole::Generate],
            Self::Full => &[AgentRole::Gather, AgentRole::Generate, AgentRole::Review],
        }
    }
}

impl std::fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restricted => write!(f, "restricted"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Unvalidated tier entry as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    pub name: String,
    pub mode: String,
    pub max_attempts: i64,
    /// role name → model identifier
    #[serde(default)]
    pub models: BTreeMap<String, String>,
}

impl TierSpec {
    pub fn new(name: impl Into<String>, mode: impl Into<String>, max_attempts: i64) -> Self {
        Self {
            name: name.into(),
            mode: mode.into(),
            max_attempts,
            models: BTreeMap::new(),
        }
    }

    pub fn with_model(mut self, role: AgentRole, model: impl Into<String>) -> Self {
        self.models.insert(role.as_str().to_string(), model.into());
        self
    }
}

/// Model assignment per role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleModels {
    models: BTreeMap<AgentRole, String>,
}

impl RoleModels {
    pub fn get(&self, role: AgentRole) -> Option<&str> {
        self.models.get(&role).map(String::as_str)
    }

    pub fn roles(&self) -> impl Iterator<Item = AgentRole> + '_ {
        self.models.keys().copied()
    }
}

/// A validated rung of the escalation ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierDefinition {
    pub name: String,
    pub mode: PipelineMode,
    pub models: RoleModels,
    /// Soft per-tier attempt cap, checked before each attempt.
    pub max_attempts: u32,
}

impl TierDefinition {
    /// Model for `role`, if this tier runs it.
    pub fn model_for(&self, role: AgentRole) -> Option<&str> {
        self.models.get(role)
    }

    /// Whether the ADVERSARIAL phase runs after a passing test.
    pub fn runs_adversarial(&self) -> bool {
        self.mode == PipelineMode::Full && self.models.get(AgentRole::Adversarial).is_some()
    }

    /// Roles this tier will actually invoke.
    pub fn active_roles(&self) -> Vec<AgentRole> {
        let mut roles = self.mode.required_roles().to_vec();
        if self.runs_adversarial() {
            roles.push(AgentRole::Adversarial);
        }
        roles
    }

    fn from_spec(index: usize, spec: &TierSpec) -> Result<Self, LadderError> {
        let name = spec.name.trim();
        if name.is_empty() {
            return Err(LadderError::EmptyName { index });
        }

        let mode = PipelineMode::parse_mode(&spec.mode).ok_or_else(|| LadderError::UnknownMode {
            tier: name.to_string(),
            mode: spec.mode.clone(),
        })?;

        if spec.max_attempts <= 0 {
            return Err(LadderError::NonPositiveCap {
                tier: name.to_string(),
                cap: spec.max_attempts,
            });
        }
        let max_attempts =
            u32::try_from(spec.max_attempts).map_err(|_| LadderError::NonPositiveCap {
                tier: name.to_string(),
                cap: spec.max_attempts,
            })?;

        let mut models = BTreeMap::new();
        for (role_name, model) in &spec.models {
            let role =
                AgentRole::parse_role(role_name.trim()).ok_or_else(|| LadderError::UnknownRole {
                    tier: name.to_string(),
                    role: role_name.clone(),
                })?;
            let model = model.trim();
            if !model.is_empty() {
                models.insert(role, model.to_string());
            }
        }

        for &role in mode.required_roles() {
            if !models.contains_key(&role) {
                return Err(LadderError::MissingModel {
                    tier: name.to_string(),
                    role,
                });
            }
        }

        Ok(Self {
            name: name.to_string(),
            mode,
            models: RoleModels { models },
            max_attempts,
        })
    }
}

/// Ordered, validated escalation ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLadder {
    tiers: Vec<TierDefinition>,
}

impl TierLadder {
    /// Validate every entry; the first structural problem rejects the ladder.
    pub fn validate(specs: &[TierSpec]) -> Result<Self, LadderError> {
        if specs.is_empty() {
            return Err(LadderError::EmptyLadder);
        }

        let mut seen = HashSet::new();
        let mut tiers = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            let tier = TierDefinition::from_spec(index, spec)?;
            if !seen.insert(tier.name.clone()) {
                return Err(LadderError::DuplicateName { name: tier.name });
            }
            tiers.push(tier);
        }

        Ok(Self { tiers })
    }

    /// Check every role the ladder will invoke has an agent behind it.
    pub fn check_roster(&self, roster: &AgentRoster) -> Result<(), LadderError> {
        for tier in &self.tiers {
            for role in tier.active_roles() {
                if !roster.has(role) {
                    return Err(LadderError::NoAgentForRole {
                        tier: tier.name.clone(),
                        role,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn tiers(&self) -> &[TierDefinition] {
        &self.tiers
    }

    pub fn get(&self, index: usize) -> Option<&TierDefinition> {
        self.tiers.get(index)
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}
