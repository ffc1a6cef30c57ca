//! End-to-end session scenarios through the escalation engine.
//!
//! - A: one tier resolves on attempt 2, the next tier never runs
//! - B: tier 1 exhausts, tier 2 resolves with tier 1's bundle in hand
//! - C: the cost cap blocks attempt 3 before it starts
//! - D: a failing audit sink changes nothing but the warning count

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{restricted_tier, roster_of, ScriptedAgent, ScriptedTestRunner};
use repair_coordination::{
    AttemptRecord, AuditError, AuditLog, AuditSink, Budget, EscalationEngine, ExhaustionReason,
    MemoryAuditSink, Session, SessionOutcome, SessionSummary, TestVerdict, TierExit,
};

struct AlwaysFailingSink;

impl AuditSink for AlwaysFailingSink {
    fn append_attempt(&self, _record: &AttemptRecord) -> Result<(), AuditError> {
        Err(AuditError::Contention("attempts.jsonl".into()))
    }

    fn upsert_session(&self, _summary: &SessionSummary) -> Result<(), AuditError> {
        Err(AuditError::Unavailable("disk full".into()))
    }
}

fn budget(max_cost_usd: f64) -> Budget {
    Budget::new(max_cost_usd, Duration::from_secs(3600))
}

// ── Scenario A ─────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_success_on_second_attempt() {
    let agent = ScriptedAgent::always("tighten bounds check", 0.05);
    let sink = Arc::new(MemoryAuditSink::new());
    let engine = EscalationEngine::new(
        roster_of(agent.clone()),
        ScriptedTestRunner::passes_after(1),
        AuditLog::new(sink.clone()),
    );
    let session = Session::new("make tests pass", "/tmp/repo", "cargo test").with_id("scenario-a");

    let report = engine
        .run(
            &session,
            &[restricted_tier("first", 5), restricted_tier("second", 3)],
            &mut budget(10.0),
        )
        .await;

    assert_eq!(report.outcome, SessionOutcome::Success);
    assert_eq!(report.attempt_count(), 2);
    assert_eq!(report.escalation_count(), 0);
    assert_eq!(report.tiers.len(), 1, "second tier must never be entered");
    assert!(agent.contexts().iter().all(|c| c.tier_name == "first"));

    let rows = sink.attempts("scenario-a");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].verdict, TestVerdict::Failed);
    assert_eq!(rows[1].verdict, TestVerdict::Passed);
    assert_eq!(rows.iter().map(|r| r.attempt).collect::<Vec<_>>(), vec![1, 2]);

    let summary = sink.session("scenario-a").unwrap();
    assert_eq!(summary.outcome, Some(SessionOutcome::Success));
    assert_eq!(summary.total_attempts, 2);
    assert_eq!(summary.resolved_by.unwrap().attempt, 2);
}

#[tokio::test]
async fn scenario_a_second_attempt_sees_first_attempt_feedback() {
    let agent = ScriptedAgent::always("patch", 0.0);
    let engine = EscalationEngine::new(
        roster_of(agent.clone()),
        ScriptedTestRunner::passes_after(1),
        AuditLog::disabled(),
    );
    let session = Session::new("make tests pass", "/tmp/repo", "cargo test");

    engine
        .run(&session, &[restricted_tier("only", 5)], &mut budget(10.0))
        .await;

    let contexts = agent.contexts();
    assert!(contexts[0].prior_attempt.is_none());
    let prior = contexts[1].prior_attempt.as_ref().unwrap();
    assert_eq!(prior.attempt, 1);
    assert_eq!(prior.verdict, TestVerdict::Failed);
    assert_eq!(prior.error_messages, vec!["assertion failed in alpha case".to_string()]);
}

// ── Scenario B ─────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_b_escalates_with_bundle() {
    let agent = ScriptedAgent::always("rewrite parser loop", 0.05);
    let engine = EscalationEngine::new(
        roster_of(agent.clone()),
        ScriptedTestRunner::passes_after(3),
        AuditLog::disabled(),
    );
    let session = Session::new("make tests pass", "/tmp/repo", "cargo test");

    let report = engine
        .run(
            &session,
            &[restricted_tier("cheap", 3), restricted_tier("strong", 2)],
            &mut budget(10.0),
        )
        .await;

    assert_eq!(report.outcome, SessionOutcome::Success);
    assert_eq!(report.attempt_count(), 4);
    assert_eq!(report.escalation_count(), 1);
    assert_eq!(report.tiers[0].exit, Some(TierExit::AttemptCapReached));
    assert_eq!(report.tiers[1].exit, Some(TierExit::Passed));

    let resolved = report.resolved_by.clone().unwrap();
    assert_eq!(resolved.tier_name, "strong");
    assert_eq!(resolved.attempt, 1);

    let contexts = agent.contexts();
    assert_eq!(contexts.len(), 4);
    assert!(contexts[..3].iter().all(|c| c.escalation_bundle.is_none()));

    let bundle = contexts[3].escalation_bundle.as_ref().unwrap();
    let synopsis_lines = bundle
        .text()
        .lines()
        .filter(|l| l.starts_with("attempt "))
        .count();
    assert_eq!(synopsis_lines, 3);
    assert!(bundle.text().contains("[tier 1: cheap] 3 attempts"));
    assert!(!bundle.text().contains("strong"));

    let escalation = &report.escalations[0];
    assert_eq!(escalation.from_tier, "cheap");
    assert_eq!(escalation.to_tier, "strong");
    assert_eq!(escalation.attempts_summarised, 3);
    assert_eq!(escalation.bundle_chars, bundle.char_len());
}

#[tokio::test]
async fn last_tier_exhaustion_is_all_tiers_exhausted() {
    let engine = EscalationEngine::new(
        roster_of(ScriptedAgent::always("patch", 0.01)),
        ScriptedTestRunner::distinct_failures(),
        AuditLog::disabled(),
    );
    let session = Session::new("make tests pass", "/tmp/repo", "cargo test");

    let report = engine
        .run(
            &session,
            &[restricted_tier("a", 2), restricted_tier("b", 2), restricted_tier("c", 1)],
            &mut budget(10.0),
        )
        .await;

    assert_eq!(report.outcome, SessionOutcome::AllTiersExhausted);
    assert_eq!(report.attempt_count(), 5);
    // tiers attempted - 1
    assert_eq!(report.escalation_count(), 2);
    assert!(report.resolved_by.is_none());
}

// ── Scenario C ─────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_c_cost_cap_blocks_third_attempt() {
    let engine = EscalationEngine::new(
        roster_of(ScriptedAgent::always("patch", 0.40)),
        ScriptedTestRunner::distinct_failures(),
        AuditLog::disabled(),
    );
    let session = Session::new("make tests pass", "/tmp/repo", "cargo test");
    let mut budget = budget(1.00);

    let report = engine
        .run(&session, &[restricted_tier("only", 5)], &mut budget)
        .await;

    assert_eq!(report.outcome, SessionOutcome::BudgetExhausted);
    assert_eq!(report.attempt_count(), 2);
    assert_eq!(report.exhaustion, Some(ExhaustionReason::ProjectedCost));
    assert!((budget.spent_usd() - 0.80).abs() < 1e-9);
    assert!(budget.spent_usd() <= budget.max_cost_usd());
}

#[tokio::test]
async fn overshoot_is_bounded_by_one_attempt() {
    // First attempt alone blows the cap; nothing else may start.
    let engine = EscalationEngine::new(
        roster_of(ScriptedAgent::always("patch", 1.50)),
        ScriptedTestRunner::distinct_failures(),
        AuditLog::disabled(),
    );
    let session = Session::new("make tests pass", "/tmp/repo", "cargo test");
    let mut budget = budget(1.00);

    let report = engine
        .run(&session, &[restricted_tier("a", 5), restricted_tier("b", 5)], &mut budget)
        .await;

    assert_eq!(report.outcome, SessionOutcome::BudgetExhausted);
    assert_eq!(report.attempt_count(), 1);
    assert_eq!(report.exhaustion, Some(ExhaustionReason::Cost));
    assert_eq!(report.escalation_count(), 0);
}

// ── Scenario D ─────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_d_failing_sink_does_not_change_outcome() {
    let ladder = [restricted_tier("cheap", 3), restricted_tier("strong", 2)];

    let healthy = EscalationEngine::new(
        roster_of(ScriptedAgent::always("patch", 0.05)),
        ScriptedTestRunner::passes_after(3),
        AuditLog::new(Arc::new(MemoryAuditSink::new())),
    );
    let broken = EscalationEngine::new(
        roster_of(ScriptedAgent::always("patch", 0.05)),
        ScriptedTestRunner::passes_after(3),
        AuditLog::new(Arc::new(AlwaysFailingSink)),
    );

    let a = healthy
        .run(&Session::new("obj", "/tmp", "true"), &ladder, &mut budget(10.0))
        .await;
    let b = broken
        .run(&Session::new("obj", "/tmp", "true"), &ladder, &mut budget(10.0))
        .await;

    assert_eq!(a.outcome, b.outcome);
    assert_eq!(a.attempt_count(), b.attempt_count());
    assert_eq!(a.escalation_count(), b.escalation_count());
    assert_eq!(a.resolved_by, b.resolved_by);
    assert_eq!(a.audit_writes_dropped, 0);
    // start row + 4 attempts + end row
    assert_eq!(b.audit_writes_dropped, 6);
}
