//! Circuit breaker behaviour inside full sessions.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{restricted_tier, roster_of, ScriptedAgent, ScriptedTestRunner};
use repair_coordination::{
    AuditLog, Budget, EscalationEngine, Phase, Session, SessionOutcome, ShellTestRunner,
    TestReport, TestVerdict, TierExit,
};

fn session() -> Session {
    Session::new("make tests pass", "/tmp/repo", "cargo test")
}

fn roomy_budget() -> Budget {
    Budget::new(100.0, Duration::from_secs(3600))
}

#[tokio::test]
async fn test_trips_on_third_identical_signature_despite_headroom() {
    let runner = ScriptedTestRunner::new(
        vec![
            Ok(TestReport::failed(vec![], vec!["panicked at src/lib.rs:10:5: overflow".into()])),
            Ok(TestReport::failed(vec![], vec!["panicked at src/lib.rs:12:9: overflow".into()])),
            Ok(TestReport::failed(vec![], vec!["panicked at src/lib.rs:31:1: overflow".into()])),
        ],
        Ok(TestReport::passed()),
    );
    let engine = EscalationEngine::new(
        roster_of(ScriptedAgent::always("patch", 0.01)),
        runner.clone(),
        AuditLog::disabled(),
    );

    let report = engine
        .run(&session(), &[restricted_tier("a", 10), restricted_tier("b", 10)], &mut roomy_budget())
        .await;

    assert_eq!(report.outcome, SessionOutcome::AbortedByCircuitBreaker);
    assert_eq!(report.attempt_count(), 3);
    assert_eq!(runner.calls(), 3);
    assert_eq!(report.tiers[0].exit, Some(TierExit::CircuitBreakerTripped));
    let trip = report.breaker_trip.unwrap();
    assert_eq!(trip.occurrences, 3);
    assert_eq!(trip.attempt, 3);
    assert_eq!(trip.signature, "panicked at src/lib.rs:#:#: overflow");
}

#[tokio::test]
async fn test_distinct_signatures_do_not_trip() {
    let engine = EscalationEngine::new(
        roster_of(ScriptedAgent::always("patch", 0.01)),
        ScriptedTestRunner::distinct_failures(),
        AuditLog::disabled(),
    );

    let report = engine
        .run(&session(), &[restricted_tier("a", 8)], &mut roomy_budget())
        .await;

    assert_eq!(report.outcome, SessionOutcome::AllTiersExhausted);
    assert_eq!(report.attempt_count(), 8);
    assert!(report.breaker_trip.is_none());
}

#[tokio::test]
async fn test_interleaved_signatures_keep_their_own_counts() {
    let fail = |msg: &str| -> Result<TestReport, String> {
        Ok(TestReport::failed(vec![], vec![msg.to_string()]))
    };
    let runner = ScriptedTestRunner::new(
        vec![
            fail("type mismatch"),
            fail("borrow of moved value"),
            fail("type mismatch"),
            fail("borrow of moved value"),
            fail("type mismatch"),
        ],
        Ok(TestReport::passed()),
    );
    let engine = EscalationEngine::new(
        roster_of(ScriptedAgent::always("patch", 0.01)),
        runner,
        AuditLog::disabled(),
    );

    let report = engine
        .run(&session(), &[restricted_tier("a", 10)], &mut roomy_budget())
        .await;

    assert_eq!(report.outcome, SessionOutcome::AbortedByCircuitBreaker);
    assert_eq!(report.attempt_count(), 5);
    assert_eq!(report.breaker_trip.unwrap().signature, "type mismatch");
}

#[tokio::test]
async fn test_breaker_window_spans_tiers() {
    let engine = EscalationEngine::new(
        roster_of(ScriptedAgent::always("patch", 0.01)),
        ScriptedTestRunner::same_failure("linker error: undefined symbol"),
        AuditLog::disabled(),
    );

    let report = engine
        .run(&session(), &[restricted_tier("a", 2), restricted_tier("b", 5)], &mut roomy_budget())
        .await;

    assert_eq!(report.outcome, SessionOutcome::AbortedByCircuitBreaker);
    assert_eq!(report.attempt_count(), 3);
    assert_eq!(report.escalation_count(), 1);
    let trip = report.breaker_trip.unwrap();
    assert_eq!(trip.tier_name, "b");
    assert_eq!(trip.attempt, 1);
}

#[tokio::test]
async fn test_errored_attempts_feed_the_breaker() {
    let engine = EscalationEngine::new(
        roster_of(ScriptedAgent::failing("upstream timeout after 30s")),
        ScriptedTestRunner::same_failure("never reached"),
        AuditLog::disabled(),
    );

    let report = engine
        .run(&session(), &[restricted_tier("a", 10)], &mut roomy_budget())
        .await;

    assert_eq!(report.outcome, SessionOutcome::AbortedByCircuitBreaker);
    assert_eq!(report.attempt_count(), 3);
    for record in &report.attempts {
        assert_eq!(record.verdict, TestVerdict::Errored);
        assert_eq!(record.errored_phase, Some(Phase::Generate));
    }
    assert_eq!(
        report.breaker_trip.unwrap().signature,
        "generate agent failed: upstream timeout after #s"
    );
}

/// Cargo prints the same progress line to stderr on every run; only stdout
/// carries the failure that changed.
#[cfg(unix)]
const CHANGING_FAILURE_SCRIPT: &str = r#"
echo "   Compiling demo v0.1.0 (/work/demo)" >&2
echo "    Finished test profile [unoptimized + debuginfo] target(s) in 0.52s" >&2
n=$(cat runs 2>/dev/null || echo 0)
n=$((n + 1))
echo "$n" > runs
echo "test parser::case_$n ... FAILED"
case "$n" in
  1) echo "thread 'parser::case_1' panicked: type mismatch" ;;
  2) echo "thread 'parser::case_2' panicked: borrow of moved value" ;;
  *) echo "thread 'parser::case_3' panicked: index out of bounds" ;;
esac
exit 101
"#;

#[cfg(unix)]
#[tokio::test]
async fn test_shell_runner_build_noise_does_not_trip() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("check.sh"), CHANGING_FAILURE_SCRIPT).unwrap();
    let engine = EscalationEngine::new(
        roster_of(ScriptedAgent::always("patch", 0.01)),
        Arc::new(ShellTestRunner::new()),
        AuditLog::disabled(),
    );
    let session = Session::new("make tests pass", dir.path(), "sh check.sh");

    let report = engine
        .run(&session, &[restricted_tier("a", 3)], &mut roomy_budget())
        .await;

    assert_eq!(report.outcome, SessionOutcome::AllTiersExhausted);
    assert_eq!(report.attempt_count(), 3);
    assert!(report.breaker_trip.is_none());
    let firsts: Vec<&str> = report
        .attempts
        .iter()
        .map(|r| r.error_messages[0].as_str())
        .collect();
    assert_eq!(
        firsts,
        vec![
            "thread 'parser::case_1' panicked: type mismatch",
            "thread 'parser::case_2' panicked: borrow of moved value",
            "thread 'parser::case_3' panicked: index out of bounds",
        ]
    );
    assert_eq!(report.attempts[1].failing_tests, vec!["parser::case_2".to_string()]);
}
