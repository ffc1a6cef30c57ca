//! Tier Escalation Engine — the top-level session driver.
//!
//! Walks the validated ladder strictly in order with an explicit index:
//!
//! ```text
//! tier 0 ──cap reached──► bundle ──► tier 1 ──cap reached──► … ──► all-tiers-exhausted
//!    │                                  │
//!    ├─ TEST passed ─────────────► success
//!    ├─ budget pre-check fails ──► budget-exhausted
//!    └─ signature repeats ───────► aborted-by-circuit-breaker
//! ```
//!
//! The ladder, the caps and the roster are validated before anything else
//! happens. A bad ladder costs zero attempts and leaves only a
//! validation-failed marker row in the audit log.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::accumulator::{build_bundle, EscalationBundle, DEFAULT_CHAR_BUDGET};
use crate::audit::{AuditLog, AuditReceipt};
use crate::budget::{Budget, ExhaustionReason};
use crate::circuit_breaker::{BreakerConfig, BreakerTrip, CircuitBreaker};
use crate::collaborators::{AgentRoster, TestRunner};
use crate::context::{AttemptContext, PriorAttempt};
use crate::error::LadderError;
use crate::orchestrator::IterationOrchestrator;
use crate::record::{
    AttemptRecord, Resolution, Session, SessionOutcome, SessionSummary, TestVerdict,
};
use crate::tier::{PipelineMode, TierDefinition, TierLadder, TierSpec};

/// Engine tuning that is not part of the ladder itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub breaker: BreakerConfig,
    /// Character budget for escalation bundles.
    pub char_budget: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            char_budget: DEFAULT_CHAR_BUDGET,
        }
    }
}

/// Why a tier stopped running attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TierExit {
    Passed,
    AttemptCapReached,
    BudgetExhausted { reason: ExhaustionReason },
    CircuitBreakerTripped,
}

impl std::fmt::Display for TierExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::AttemptCapReached => write!(f, "attempt cap reached"),
            Self::BudgetExhausted { reason } => write!(f, "budget exhausted ({reason})"),
            Self::CircuitBreakerTripped => write!(f, "circuit breaker tripped"),
        }
    }
}

/// Per-tier slice of the session breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierReport {
    pub tier_index: usize,
    pub tier_name: String,
    pub mode: PipelineMode,
    pub max_attempts: u32,
    pub attempts: u32,
    pub cost_usd: f64,
    pub tokens_used: u64,
    pub duration_ms: u64,
    pub last_verdict: Option<TestVerdict>,
    /// `None` only while the tier is still running.
    pub exit: Option<TierExit>,
}

impl TierReport {
    fn entered(tier_index: usize, tier: &TierDefinition) -> Self {
        Self {
            tier_index,
            tier_name: tier.name.clone(),
            mode: tier.mode,
            max_attempts: tier.max_attempts,
            attempts: 0,
            cost_usd: 0.0,
            tokens_used: 0,
            duration_ms: 0,
            last_verdict: None,
            exit: None,
        }
    }

    fn absorb(&mut self, record: &AttemptRecord) {
        self.attempts += 1;
        self.cost_usd += record.cost_usd;
        self.tokens_used = self.tokens_used.saturating_add(record.tokens_used);
        self.duration_ms = self.duration_ms.saturating_add(record.duration_ms);
        self.last_verdict = Some(record.verdict);
    }
}

/// One tier-to-tier hand-off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub from_index: usize,
    pub from_tier: String,
    pub to_index: usize,
    pub to_tier: String,
    pub reason: TierExit,
    /// Attempts summarised into the bundle.
    pub attempts_summarised: usize,
    pub bundle_chars: usize,
    pub bundle_truncated: bool,
    pub escalated_at: DateTime<Utc>,
}

/// Everything a caller learns about a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub outcome: SessionOutcome,
    /// One entry per tier entered, in ladder order.
    pub tiers: Vec<TierReport>,
    /// Every attempt, in execution order.
    pub attempts: Vec<AttemptRecord>,
    pub escalations: Vec<EscalationRecord>,
    pub resolved_by: Option<Resolution>,
    pub breaker_trip: Option<BreakerTrip>,
    pub exhaustion: Option<ExhaustionReason>,
    pub validation_error: Option<LadderError>,
    pub total_cost_usd: f64,
    pub tokens_used: u64,
    pub elapsed: Duration,
    /// Audit writes that failed. Informational; never changes the outcome.
    pub audit_writes_dropped: u32,
}

impl SessionReport {
    fn new(session: &Session, outcome: SessionOutcome) -> Self {
        Self {
            session_id: session.id.clone(),
            outcome,
            tiers: Vec::new(),
            attempts: Vec::new(),
            escalations: Vec::new(),
            resolved_by: None,
            breaker_trip: None,
            exhaustion: None,
            validation_error: None,
            total_cost_usd: 0.0,
            tokens_used: 0,
            elapsed: Duration::ZERO,
            audit_writes_dropped: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == SessionOutcome::Success
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn escalation_count(&self) -> usize {
        self.escalations.len()
    }

    /// Attempts made in one tier.
    pub fn attempts_in(&self, tier_index: usize) -> impl Iterator<Item = &AttemptRecord> {
        self.attempts
            .iter()
            .filter(move |r| r.tier_index == tier_index)
    }

    fn summary(&self, session: &Session) -> SessionSummary {
        let mut summary = SessionSummary::started(session);
        summary.total_attempts = u32::try_from(self.attempts.len()).unwrap_or(u32::MAX);
        summary.total_cost_usd = self.total_cost_usd;
        summary.resolved_by = self.resolved_by.clone();
        summary.detail = self.validation_error.as_ref().map(ToString::to_string);
        summary.finish(self.outcome)
    }
}

/// Record a dropped write and move on.
fn settle(receipt: AuditReceipt, dropped: &mut u32) {
    if !receipt.is_written() {
        *dropped += 1;
    }
    receipt.acknowledge();
}

pub struct EscalationEngine {
    orchestrator: IterationOrchestrator,
    audit: AuditLog,
    config: EngineConfig,
}

impl EscalationEngine {
    pub fn new(roster: AgentRoster, test_runner: Arc<dyn TestRunner>, audit: AuditLog) -> Self {
        Self {
            orchestrator: IterationOrchestrator::new(roster, test_runner),
            audit,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Validate everything up front, then drive the ladder.
    ///
    /// Never fails: a structural problem becomes a `validation-failed`
    /// report carrying the [`LadderError`].
    pub async fn run(
        &self,
        session: &Session,
        specs: &[TierSpec],
        budget: &mut Budget,
    ) -> SessionReport {
        match self.validate(specs, budget) {
            Ok(ladder) => self.run_ladder(session, &ladder, budget).await,
            Err(err) => {
                warn!(
                    session_id = %session.id,
                    error = %err,
                    "tier ladder rejected; no attempts made"
                );
                let mut report = SessionReport::new(session, SessionOutcome::ValidationFailed);
                report.validation_error = Some(err);
                settle(
                    self.audit.upsert(&report.summary(session)),
                    &mut report.audit_writes_dropped,
                );
                report
            }
        }
    }

    fn validate(&self, specs: &[TierSpec], budget: &Budget) -> Result<TierLadder, LadderError> {
        budget.validate()?;
        let ladder = TierLadder::validate(specs)?;
        ladder.check_roster(self.orchestrator.roster())?;
        Ok(ladder)
    }

    /// Drive a ladder that passed `validate` to a terminal outcome.
    async fn run_ladder(
        &self,
        session: &Session,
        ladder: &TierLadder,
        budget: &mut Budget,
    ) -> SessionReport {
        let started = Instant::now();
        let mut report = SessionReport::new(session, SessionOutcome::AllTiersExhausted);
        let mut breaker = CircuitBreaker::new(self.config.breaker);
        let mut bundle: Option<Arc<EscalationBundle>> = None;

        info!(
            session_id = %session.id,
            objective = %session.objective,
            tiers = ladder.len(),
            max_cost_usd = budget.max_cost_usd(),
            "session starting"
        );
        settle(
            self.audit.upsert(&SessionSummary::started(session)),
            &mut report.audit_writes_dropped,
        );

        let tiers = ladder.tiers();
        let mut index = 0;
        while let Some(tier) = tiers.get(index) {
            info!(
                session_id = %session.id,
                tier = %tier.name,
                tier_index = index,
                mode = %tier.mode,
                max_attempts = tier.max_attempts,
                "entering tier"
            );

            let exit = self
                .run_tier(session, index, tier, bundle.clone(), budget, &mut breaker, &mut report)
                .await;

            match exit {
                TierExit::Passed => {
                    report.outcome = SessionOutcome::Success;
                    break;
                }
                TierExit::BudgetExhausted { reason } => {
                    warn!(
                        session_id = %session.id,
                        tier = %tier.name,
                        %reason,
                        budget = %budget.summary(),
                        "budget exhausted"
                    );
                    report.outcome = SessionOutcome::BudgetExhausted;
                    report.exhaustion = Some(reason);
                    break;
                }
                TierExit::CircuitBreakerTripped => {
                    report.outcome = SessionOutcome::AbortedByCircuitBreaker;
                    break;
                }
                TierExit::AttemptCapReached => {
                    let Some(next) = tiers.get(index + 1) else {
                        break;
                    };
                    // Don't escalate into a tier that could not run a single attempt.
                    if let Some(reason) = budget.pre_attempt_check() {
                        warn!(
                            session_id = %session.id,
                            tier = %next.name,
                            %reason,
                            "budget exhausted before escalation"
                        );
                        report.outcome = SessionOutcome::BudgetExhausted;
                        report.exhaustion = Some(reason);
                        break;
                    }

                    let built = build_bundle(&report.attempts, self.config.char_budget);
                    let escalation = EscalationRecord {
                        from_index: index,
                        from_tier: tier.name.clone(),
                        to_index: index + 1,
                        to_tier: next.name.clone(),
                        reason: exit,
                        attempts_summarised: report.attempts.len(),
                        bundle_chars: built.char_len(),
                        bundle_truncated: built.truncated(),
                        escalated_at: Utc::now(),
                    };
                    info!(
                        session_id = %session.id,
                        from = %escalation.from_tier,
                        to = %escalation.to_tier,
                        bundle_chars = escalation.bundle_chars,
                        truncated = escalation.bundle_truncated,
                        "escalating"
                    );
                    report.escalations.push(escalation);
                    // Replace, never merge.
                    bundle = Some(Arc::new(built));
                    index += 1;
                }
            }
        }

        report.total_cost_usd = budget.spent_usd();
        report.tokens_used = budget.tokens_used();
        report.elapsed = started.elapsed();

        info!(
            session_id = %session.id,
            outcome = %report.outcome,
            attempts = report.attempts.len(),
            escalations = report.escalations.len(),
            cost = report.total_cost_usd,
            "session finished"
        );
        let summary = report.summary(session);
        settle(self.audit.upsert(&summary), &mut report.audit_writes_dropped);
        report
    }

    /// Run attempts in one tier until something stops it.
    #[allow(clippy::too_many_arguments)]
    async fn run_tier(
        &self,
        session: &Session,
        index: usize,
        tier: &TierDefinition,
        bundle: Option<Arc<EscalationBundle>>,
        budget: &mut Budget,
        breaker: &mut CircuitBreaker,
        report: &mut SessionReport,
    ) -> TierExit {
        let base = AttemptContext::for_tier(session, index, tier, bundle);
        let mut tier_report = TierReport::entered(index, tier);
        let mut prior: Option<PriorAttempt> = None;

        let exit = loop {
            if tier_report.attempts >= tier.max_attempts {
                debug!(tier = %tier.name, attempts = tier_report.attempts, "attempt cap reached");
                break TierExit::AttemptCapReached;
            }
            if let Some(reason) = budget.pre_attempt_check() {
                break TierExit::BudgetExhausted { reason };
            }

            let attempt = tier_report.attempts + 1;
            let context = base.for_attempt(attempt, prior.take());
            let record = self.orchestrator.run_attempt(tier, context, budget).await.record;

            info!(
                session_id = %session.id,
                tier = %tier.name,
                attempt,
                verdict = %record.verdict,
                cost = record.cost_usd,
                duration_ms = record.duration_ms,
                "attempt finished"
            );
            settle(self.audit.append(&record), &mut report.audit_writes_dropped);
            tier_report.absorb(&record);

            if record.passed() {
                report.resolved_by = Some(Resolution {
                    tier_index: index,
                    tier_name: tier.name.clone(),
                    attempt,
                });
                report.attempts.push(record);
                break TierExit::Passed;
            }

            if let Some(trip) = breaker.observe(&record) {
                warn!(
                    session_id = %session.id,
                    tier = %tier.name,
                    attempt,
                    signature = %trip.signature,
                    occurrences = trip.occurrences,
                    "circuit breaker tripped"
                );
                report.breaker_trip = Some(trip);
                report.attempts.push(record);
                break TierExit::CircuitBreakerTripped;
            }

            prior = Some(PriorAttempt::from(&record));
            report.attempts.push(record);
        };

        tier_report.exit = Some(exit);
        report.tiers.push(tier_report);
        exit
    }
}

impl std::fmt::Debug for EscalationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationEngine")
            .field("roster", self.orchestrator.roster())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
