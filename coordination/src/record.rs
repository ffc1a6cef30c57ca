//! Session and attempt records — the rows of the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pass/fail signal from the TEST phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestVerdict {
    Passed,
    Failed,
    /// A collaborator failed before a verdict could be produced.
    Errored,
}

impl TestVerdict {
    pub fn is_pass(self) -> bool {
        matches!(self, Self::Passed)
    }
}

impl std::fmt::Display for TestVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// Advisory verdict parsed from the REVIEW phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approve,
    RequestChanges,
    Unknown,
}

impl ReviewVerdict {
    /// Look for an explicit verdict keyword in free-form review text.
    ///
    /// Keywords match whole words only; a negated approval ("not approved",
    /// "do not approve") counts as a request for changes.
    pub fn parse(review: &str) -> Self {
        let lower = review.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '\''))
            .filter(|w| !w.is_empty())
            .collect();

        let rejects = words.iter().any(|w| {
            matches!(
                *w,
                "request_changes" | "reject" | "rejected" | "disapprove" | "disapproved"
            )
        }) || words
            .windows(2)
            .any(|p| matches!(p, ["request", "changes"] | ["changes", "requested"]));
        if rejects {
            return Self::RequestChanges;
        }

        let mut approved = false;
        for (i, word) in words.iter().enumerate() {
            if !matches!(*word, "approve" | "approved" | "lgtm") {
                continue;
            }
            let negated = i > 0
                && matches!(
                    words[i - 1],
                    "not" | "never" | "cannot" | "can't" | "don't" | "won't" | "no"
                );
            if negated {
                return Self::RequestChanges;
            }
            approved = true;
        }
        if approved {
            Self::Approve
        } else {
            Self::Unknown
        }
    }
}

/// Pipeline phases of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Gather,
    Generate,
    Review,
    Test,
    Adversarial,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gather => write!(f, "gather"),
            Self::Generate => write!(f, "generate"),
            Self::Review => write!(f, "review"),
            Self::Test => write!(f, "test"),
            Self::Adversarial => write!(f, "adversarial"),
        }
    }
}

/// One pass through the iteration pipeline. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub session_id: String,
    /// 0-based position in the ladder
    pub tier_index: usize,
    pub tier_name: String,
    /// 1-based, strictly increasing within (session, tier)
    pub attempt: u32,
    pub change_description: String,
    pub verdict: TestVerdict,
    #[serde(default)]
    pub failing_tests: Vec<String>,
    #[serde(default)]
    pub error_messages: Vec<String>,
    /// Phase whose collaborator failed, for errored attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errored_phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewVerdict>,
    /// Informational only; never part of the verdict or failure signatures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adversarial_notes: Option<String>,
    pub cost_usd: f64,
    #[serde(default)]
    pub tokens_used: u64,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn passed(&self) -> bool {
        self.verdict.is_pass()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Raw failure text fed to the circuit breaker. `None` for passes.
    pub fn failure_signature(&self) -> Option<String> {
        if self.passed() {
            return None;
        }
        Some(
            self.error_messages
                .iter()
                .find(|m| !m.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| self.verdict.to_string()),
        )
    }
}

/// Terminal outcome of a session. Exactly one per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionOutcome {
    Success,
    AllTiersExhausted,
    BudgetExhausted,
    AbortedByCircuitBreaker,
    ValidationFailed,
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::AllTiersExhausted => write!(f, "all-tiers-exhausted"),
            Self::BudgetExhausted => write!(f, "budget-exhausted"),
            Self::AbortedByCircuitBreaker => write!(f, "aborted-by-circuit-breaker"),
            Self::ValidationFailed => write!(f, "validation-failed"),
        }
    }
}

/// One end-to-end run against a single objective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub objective: String,
    pub working_dir: PathBuf,
    pub test_command: String,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        objective: impl Into<String>,
        working_dir: impl AsRef<Path>,
        test_command: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            objective: objective.into(),
            working_dir: working_dir.as_ref().to_path_buf(),
            test_command: test_command.into(),
            started_at: Utc::now(),
        }
    }

    /// Use a caller-chosen id instead of a random one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Which tier/attempt produced the passing test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub tier_index: usize,
    pub tier_name: String,
    pub attempt: u32,
}

/// Per-session audit row. Upserted at start (no outcome) and at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub objective: String,
    pub working_dir: PathBuf,
    pub test_command: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SessionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<Resolution>,
    #[serde(default)]
    pub total_attempts: u32,
    #[serde(default)]
    pub total_cost_usd: f64,
    /// Why validation failed, for the failed-validation marker row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SessionSummary {
    /// Row written when the session starts.
    pub fn started(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            objective: session.objective.clone(),
            working_dir: session.working_dir.clone(),
            test_command: session.test_command.clone(),
            started_at: session.started_at,
            ended_at: None,
            outcome: None,
            resolved_by: None,
            total_attempts: 0,
            total_cost_usd: 0.0,
            detail: None,
        }
    }

    /// Close out the row with a terminal outcome.
    pub fn finish(mut self, outcome: SessionOutcome) -> Self {
        self.outcome = Some(outcome);
        self.ended_at = Some(Utc::now());
        self
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }
}
