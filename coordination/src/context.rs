//! Immutable attempt context.
//!
//! A fresh [`AttemptContext`] is derived for every attempt from the tier's
//! base context. Each phase returns a new value with its own output folded
//! in; nothing is mutated in place and nothing carries across attempts except
//! the previous attempt's feedback and the escalation bundle.

use std::path::PathBuf;
use std::sync::Arc;

use crate::accumulator::EscalationBundle;
use crate::record::{AttemptRecord, Session, TestVerdict};
use crate::tier::TierDefinition;

/// What the previous attempt in the same tier produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorAttempt {
    pub attempt: u32,
    pub change_description: String,
    pub verdict: TestVerdict,
    pub failing_tests: Vec<String>,
    pub error_messages: Vec<String>,
}

impl From<&AttemptRecord> for PriorAttempt {
    fn from(record: &AttemptRecord) -> Self {
        Self {
            attempt: record.attempt,
            change_description: record.change_description.clone(),
            verdict: record.verdict,
            failing_tests: record.failing_tests.clone(),
            error_messages: record.error_messages.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub session_id: String,
    pub objective: String,
    pub working_dir: PathBuf,
    pub test_command: String,
    pub tier_index: usize,
    pub tier_name: String,
    /// 0 on the tier's base context, 1-based once an attempt is derived.
    pub attempt: u32,
    pub escalation_bundle: Option<Arc<EscalationBundle>>,
    pub prior_attempt: Option<PriorAttempt>,
    pub gathered: Option<String>,
    pub proposed_change: Option<String>,
    pub review: Option<String>,
}

impl AttemptContext {
    /// Base context for a tier. The bundle covers earlier tiers only.
    pub fn for_tier(
        session: &Session,
        tier_index: usize,
        tier: &TierDefinition,
        escalation_bundle: Option<Arc<EscalationBundle>>,
    ) -> Self {
        Self {
            session_id: session.id.clone(),
            objective: session.objective.clone(),
            working_dir: session.working_dir.clone(),
            test_command: session.test_command.clone(),
            tier_index,
            tier_name: tier.name.clone(),
            attempt: 0,
            escalation_bundle,
            prior_attempt: None,
            gathered: None,
            proposed_change: None,
            review: None,
        }
    }

    /// Fresh context for attempt `attempt`, dropping any phase output.
    pub fn for_attempt(&self, attempt: u32, prior_attempt: Option<PriorAttempt>) -> Self {
        Self {
            attempt,
            prior_attempt,
            gathered: None,
            proposed_change: None,
            review: None,
            ..self.clone()
        }
    }

    pub fn with_gathered(&self, gathered: impl Into<String>) -> Self {
        Self {
            gathered: Some(gathered.into()),
            ..self.clone()
        }
    }

    pub fn with_proposed_change(&self, change: impl Into<String>) -> Self {
        Self {
            proposed_change: Some(change.into()),
            ..self.clone()
        }
    }

    pub fn with_review(&self, review: impl Into<String>) -> Self {
        Self {
            review: Some(review.into()),
            ..self.clone()
        }
    }

    /// Markdown brief an agent can drop straight into a prompt.
    pub fn render_brief(&self) -> String {
        let mut brief = String::new();

        brief.push_str(&format!("# Objective: {}\n\n", self.objective));
        brief.push_str(&format!(
            "**Tier:** {} | **Attempt:** {} | **Test command:** `{}`\n\n",
            self.tier_name, self.attempt, self.test_command
        ));

        if let Some(bundle) = &self.escalation_bundle {
            if !bundle.is_empty() {
                brief.push_str("## Earlier Tiers\n");
                brief.push_str(bundle.text());
                brief.push_str("\n\n");
            }
        }

        if let Some(prior) = &self.prior_attempt {
            brief.push_str(&format!(
                "## Previous Attempt ({}): {}\n",
                prior.attempt, prior.verdict
            ));
            brief.push_str(&format!("Change: {}\n", prior.change_description));
            for test in &prior.failing_tests {
                brief.push_str(&format!("- failing: {test}\n"));
            }
            for err in &prior.error_messages {
                brief.push_str(&format!("- error: {err}\n"));
            }
            brief.push('\n');
        }

        if let Some(gathered) = &self.gathered {
            brief.push_str("## Gathered Context\n");
            brief.push_str(gathered);
            brief.push_str("\n\n");
        }

        if let Some(change) = &self.proposed_change {
            brief.push_str("## Proposed Change\n");
            brief.push_str(change);
            brief.push_str("\n\n");
        }

        if let Some(review) = &self.review {
            brief.push_str("## Review\n");
            brief.push_str(review);
            brief.push('\n');
        }

        brief
    }
}
