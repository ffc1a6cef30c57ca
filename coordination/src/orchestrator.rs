//! Iteration Orchestrator — one attempt through the phase pipeline.
//!
//! ```text
//! restricted:  GENERATE → TEST
//! full:        GATHER → GENERATE → REVIEW → TEST → [ADVERSARIAL]
//! ```
//!
//! Each phase calls exactly one collaborator and folds its output into a new
//! [`AttemptContext`]. A collaborator failure ends the attempt, not the tier:
//! it comes back as an errored [`AttemptRecord`]. TEST alone decides pass or
//! fail; REVIEW is advisory, and ADVERSARIAL only leaves notes.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::budget::Budget;
use crate::collaborators::{AgentRequest, AgentRole, AgentRoster, TestReport, TestRunner};
use crate::context::AttemptContext;
use crate::record::{AttemptRecord, Phase, ReviewVerdict, TestVerdict};
use crate::tier::{PipelineMode, TierDefinition};

/// Change description used when GENERATE never produced anything.
const NO_CHANGE: &str = "(no change produced)";

fn phase_of(role: AgentRole) -> Phase {
    match role {
        AgentRole::Gather => Phase::Gather,
        AgentRole::Generate => Phase::Generate,
        AgentRole::Review => Phase::Review,
        AgentRole::Adversarial => Phase::Adversarial,
    }
}

/// Spend accumulated across the phases of one attempt.
#[derive(Debug, Default, Clone, Copy)]
struct PhaseSpend {
    cost_usd: f64,
    tokens: u64,
}

impl PhaseSpend {
    fn add(&mut self, cost_usd: f64, tokens: u64) {
        if cost_usd.is_finite() && cost_usd > 0.0 {
            self.cost_usd += cost_usd;
        }
        self.tokens = self.tokens.saturating_add(tokens);
    }
}

#[derive(Debug)]
struct PhaseFailure {
    phase: Phase,
    message: String,
}

#[derive(Debug)]
struct PipelineResult {
    report: TestReport,
    review: Option<ReviewVerdict>,
    adversarial_notes: Option<String>,
}

/// Record plus the final context of one attempt.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub record: AttemptRecord,
    /// Context as it stood when the pipeline stopped.
    pub context: AttemptContext,
}

pub struct IterationOrchestrator {
    roster: AgentRoster,
    test_runner: Arc<dyn TestRunner>,
}

impl IterationOrchestrator {
    pub fn new(roster: AgentRoster, test_runner: Arc<dyn TestRunner>) -> Self {
        Self {
            roster,
            test_runner,
        }
    }

    pub fn roster(&self) -> &AgentRoster {
        &self.roster
    }

    /// Run one attempt and charge it to `budget`. Never fails.
    pub async fn run_attempt(
        &self,
        tier: &TierDefinition,
        context: AttemptContext,
        budget: &mut Budget,
    ) -> AttemptOutcome {
        let started = Instant::now();
        let mut spend = PhaseSpend::default();

        let (context, result) = self.run_pipeline(tier, context, &mut spend).await;

        let duration = started.elapsed();
        budget.record_spend(spend.cost_usd, duration);
        budget.record_tokens(spend.tokens);

        let change_description = context
            .proposed_change
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(NO_CHANGE)
            .to_string();

        let mut record = AttemptRecord {
            session_id: context.session_id.clone(),
            tier_index: context.tier_index,
            tier_name: context.tier_name.clone(),
            attempt: context.attempt,
            change_description,
            verdict: TestVerdict::Errored,
            failing_tests: Vec::new(),
            error_messages: Vec::new(),
            errored_phase: None,
            review: None,
            adversarial_notes: None,
            cost_usd: spend.cost_usd,
            tokens_used: spend.tokens,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            completed_at: Utc::now(),
        };

        match result {
            Ok(out) => {
                record.verdict = out.report.verdict;
                record.failing_tests = out.report.failing_tests;
                record.error_messages = out.report.error_messages;
                record.review = out.review;
                record.adversarial_notes = out.adversarial_notes;
                if out.report.verdict == TestVerdict::Errored {
                    record.errored_phase = Some(Phase::Test);
                }
            }
            Err(failure) => {
                warn!(
                    tier = %record.tier_name,
                    attempt = record.attempt,
                    phase = %failure.phase,
                    error = %failure.message,
                    "collaborator failed; attempt recorded as errored"
                );
                record.errored_phase = Some(failure.phase);
                record.error_messages = vec![failure.message];
            }
        }

        AttemptOutcome { record, context }
    }

    async fn run_pipeline(
        &self,
        tier: &TierDefinition,
        ctx: AttemptContext,
        spend: &mut PhaseSpend,
    ) -> (AttemptContext, Result<PipelineResult, PhaseFailure>) {
        let full = tier.mode == PipelineMode::Full;

        let ctx = if full {
            match self.invoke(AgentRole::Gather, tier, &ctx, spend).await {
                Ok(gathered) => ctx.with_gathered(gathered),
                Err(f) => return (ctx, Err(f)),
            }
        } else {
            ctx
        };

        let ctx = match self.invoke(AgentRole::Generate, tier, &ctx, spend).await {
            Ok(change) => ctx.with_proposed_change(change),
            Err(f) => return (ctx, Err(f)),
        };

        let (ctx, review) = if full {
            match self.invoke(AgentRole::Review, tier, &ctx, spend).await {
                Ok(review) => {
                    let verdict = ReviewVerdict::parse(&review);
                    (ctx.with_review(review), Some(verdict))
                }
                Err(f) => return (ctx, Err(f)),
            }
        } else {
            (ctx, None)
        };

        debug!(tier = %tier.name, attempt = ctx.attempt, "running tests");
        let report = match self
            .test_runner
            .run(&ctx.test_command, &ctx.working_dir)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                return (
                    ctx,
                    Err(PhaseFailure {
                        phase: Phase::Test,
                        message: e.to_string(),
                    }),
                )
            }
        };

        let adversarial_notes = if report.verdict.is_pass() && tier.runs_adversarial() {
            match self.invoke(AgentRole::Adversarial, tier, &ctx, spend).await {
                Ok(notes) => Some(notes),
                Err(f) => {
                    warn!(
                        tier = %tier.name,
                        error = %f.message,
                        "adversarial run failed; ignoring"
                    );
                    Some(format!("adversarial run failed: {}", f.message))
                }
            }
        } else {
            None
        };

        (
            ctx,
            Ok(PipelineResult {
                report,
                review,
                adversarial_notes,
            }),
        )
    }

    async fn invoke(
        &self,
        role: AgentRole,
        tier: &TierDefinition,
        ctx: &AttemptContext,
        spend: &mut PhaseSpend,
    ) -> Result<String, PhaseFailure> {
        let phase = phase_of(role);
        let model = tier.model_for(role).ok_or_else(|| PhaseFailure {
            phase,
            message: format!("tier '{}' has no model for {role}", tier.name),
        })?;
        let agent = self.roster.get(role).ok_or_else(|| PhaseFailure {
            phase,
            message: format!("no {role} agent registered"),
        })?;

        debug!(tier = %tier.name, attempt = ctx.attempt, %phase, model, "invoking agent");
        match agent
            .run(AgentRequest {
                role,
                model,
                context: ctx,
            })
            .await
        {
            Ok(out) => {
                spend.add(out.cost_usd, out.tokens_used);
                Ok(out.output)
            }
            Err(e) => {
                spend.add(e.cost_usd, e.tokens_used);
                Err(PhaseFailure {
                    phase,
                    message: e.to_string(),
                })
            }
        }
    }
}
