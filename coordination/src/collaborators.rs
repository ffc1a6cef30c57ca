//! Collaborator contracts consumed by the orchestrator.
//!
//! Agents and the test runner are black boxes: the core only sees their
//! output text, spend, and verdict. Prompting, transport and per-framework
//! output parsing live on the other side of these traits.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::context::AttemptContext;
use crate::error::{AgentError, TestRunnerError};
use crate::record::TestVerdict;

/// Roles an agent can play within one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Gather,
    Generate,
    Review,
    Adversarial,
}

impl AgentRole {
    pub const ALL: [AgentRole; 4] = [
        AgentRole::Gather,
        AgentRole::Generate,
        AgentRole::Review,
        AgentRole::Adversarial,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gather => "gather",
            Self::Generate => "generate",
            Self::Review => "review",
            Self::Adversarial => "adversarial",
        }
    }

    pub fn parse_role(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an agent is asked to do.
#[derive(Debug, Clone, Copy)]
pub struct AgentRequest<'a> {
    pub role: AgentRole,
    /// Model identifier from the tier definition.
    pub model: &'a str,
    pub context: &'a AttemptContext,
}

/// What an agent hands back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutput {
    pub output: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

impl AgentOutput {
    pub fn new(output: impl Into<String>, tokens_used: u64, cost_usd: f64) -> Self {
        Self {
            output: output.into(),
            tokens_used,
            cost_usd,
        }
    }
}

/// A code-generation / review agent.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self, request: AgentRequest<'_>) -> Result<AgentOutput, AgentError>;
}

/// Agents registered per role.
#[derive(Clone, Default)]
pub struct AgentRoster {
    agents: HashMap<AgentRole, Arc<dyn Agent>>,
}

impl AgentRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, role: AgentRole, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(role, agent);
        self
    }

    pub fn get(&self, role: AgentRole) -> Option<&Arc<dyn Agent>> {
        self.agents.get(&role)
    }

    pub fn has(&self, role: AgentRole) -> bool {
        self.agents.contains_key(&role)
    }
}

impl std::fmt::Debug for AgentRoster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut roles: Vec<_> = self.agents.keys().collect();
        roles.sort();
        f.debug_struct("AgentRoster").field("roles", &roles).finish()
    }
}

/// Outcome of one test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub verdict: TestVerdict,
    pub failing_tests: Vec<String>,
    pub error_messages: Vec<String>,
}

impl TestReport {
    pub fn passed() -> Self {
        Self {
            verdict: TestVerdict::Passed,
            failing_tests: Vec::new(),
            error_messages: Vec::new(),
        }
    }

    pub fn failed(failing_tests: Vec<String>, error_messages: Vec<String>) -> Self {
        Self {
            verdict: TestVerdict::Failed,
            failing_tests,
            error_messages,
        }
    }
}

/// Runs the objective's test command.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, command: &str, working_dir: &Path) -> Result<TestReport, TestRunnerError>;
}

/// Maximum output lines kept as error messages.
const MAX_ERROR_LINES: usize = 8;

/// Cargo status lines (`Compiling`, `Finished ... in 0.52s`, `Running ...`).
static CARGO_PROGRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:Compiling|Checking|Finished|Running|Doc-tests|Fresh|Blocking|Updating|Locking",
        r"|Downloading|Downloaded|Building|Adding)\b",
    ))
    .unwrap()
});

/// libtest chatter that is identical across unrelated failures.
static HARNESS_CHATTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:running \d+ tests?$|test result:|failures:$|successes:$|---- .+ ----$",
        r"|note: run with `RUST_BACKTRACE|error: test failed|test .+ \.\.\. (?:ok|ignored)$)",
    ))
    .unwrap()
});

static FAILED_TEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^test (\S+) \.\.\. FAILED$").unwrap());

/// Framework-agnostic runner: the exit status is the verdict. Error text is
/// taken from stdout then stderr with build progress and harness chatter
/// stripped, so distinct failures keep distinct first messages.
#[derive(Debug, Clone, Default)]
pub struct ShellTestRunner {
    timeout: Option<Duration>,
}

impl ShellTestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Split failing output into `(failing_tests, error_messages)`.
    fn scan_output(stdout: &str, stderr: &str) -> (Vec<String>, Vec<String>) {
        let mut failing_tests = Vec::new();
        let mut lines = Vec::new();
        for line in stdout.lines().chain(stderr.lines()).map(str::trim) {
            if line.is_empty() || CARGO_PROGRESS.is_match(line) {
                continue;
            }
            if let Some(caps) = FAILED_TEST.captures(line) {
                failing_tests.push(caps[1].to_string());
                continue;
            }
            if HARNESS_CHATTER.is_match(line) {
                continue;
            }
            lines.push(line);
        }

        // The closing `failures:` block repeats the names on their own lines.
        let errors = lines
            .into_iter()
            .filter(|l| !failing_tests.iter().any(|t| t == l))
            .take(MAX_ERROR_LINES)
            .map(str::to_string)
            .collect();
        (failing_tests, errors)
    }
}

#[async_trait]
impl TestRunner for ShellTestRunner {
    async fn run(&self, command: &str, working_dir: &Path) -> Result<TestReport, TestRunnerError> {
        let argv = shlex::split(command)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| TestRunnerError::InvalidCommand(command.to_string()))?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| TestRunnerError::InvalidCommand(command.to_string()))?;

        debug!(command, dir = %working_dir.display(), "running test command");

        let child = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child)
                .await
                .map_err(|_| TestRunnerError::Timeout {
                    secs: limit.as_secs(),
                })?,
            None => child.await,
        }
        .map_err(|source| TestRunnerError::Spawn {
            command: command.to_string(),
            dir: working_dir.to_path_buf(),
            source,
        })?;

        if output.status.success() {
            return Ok(TestReport::passed());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let (failing_tests, mut errors) = Self::scan_output(&stdout, &stderr);
        if errors.is_empty() {
            errors.push(match output.status.code() {
                Some(code) => format!("test command exited with status {code}"),
                None => "test command terminated by signal".to_string(),
            });
        }
        Ok(TestReport::failed(failing_tests, errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in AgentRole::ALL {
            assert_eq!(AgentRole::parse_role(role.as_str()), Some(role));
        }
        assert_eq!(AgentRole::parse_role("planner"), None);
    }

    #[test]
    fn test_scan_output_skips_build_noise() {
        let stderr = "   Compiling demo v0.1.0 (/work/demo)\n    \
                      Finished `test` profile [unoptimized + debuginfo] target(s) in 0.52s\n     \
                      Running unittests src/lib.rs (target/debug/deps/demo-1a2b)\n\
                      error: test failed, to rerun pass `--lib`\n";
        let stdout = "\nrunning 2 tests\n\
                      test parser::empty ... ok\n\
                      test parser::unicode ... FAILED\n\n\
                      failures:\n\n\
                      ---- parser::unicode stdout ----\n\
                      thread 'parser::unicode' panicked at src/parser.rs:40:9:\n\
                      byte index 3 is not a char boundary\n\
                      note: run with `RUST_BACKTRACE=1` to display a backtrace\n\n\
                      failures:\n    parser::unicode\n\n\
                      test result: FAILED. 1 passed; 1 failed; 0 ignored; finished in 0.00s\n";

        let (failing, errors) = ShellTestRunner::scan_output(stdout, stderr);
        assert_eq!(failing, vec!["parser::unicode".to_string()]);
        assert_eq!(
            errors,
            vec![
                "thread 'parser::unicode' panicked at src/parser.rs:40:9:".to_string(),
                "byte index 3 is not a char boundary".to_string(),
            ]
        );
    }

    #[test]
    fn test_scan_output_bounds_and_falls_back_to_stderr() {
        let stdout: String = (0..20).map(|i| format!("line {i}\n")).collect();
        let (_, errors) = ShellTestRunner::scan_output(&stdout, "");
        assert_eq!(errors.len(), MAX_ERROR_LINES);
        assert_eq!(errors.first().map(String::as_str), Some("line 0"));

        let (_, errors) = ShellTestRunner::scan_output("  \n", "error[E0308]: mismatched types\n");
        assert_eq!(errors, vec!["error[E0308]: mismatched types".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_verdicts() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellTestRunner::new();

        let report = runner.run("true", dir.path()).await.unwrap();
        assert_eq!(report.verdict, TestVerdict::Passed);

        let report = runner
            .run("sh -c 'echo boom >&2; exit 3'", dir.path())
            .await
            .unwrap();
        assert_eq!(report.verdict, TestVerdict::Failed);
        assert_eq!(report.error_messages, vec!["boom".to_string()]);

        let noisy = "sh -c 'echo \"  Finished in 0.5s\" >&2; echo \"expected 3\"; exit 101'";
        let report = runner.run(noisy, dir.path()).await.unwrap();
        assert_eq!(report.error_messages, vec!["expected 3".to_string()]);

        let report = runner.run("false", dir.path()).await.unwrap();
        assert_eq!(
            report.error_messages,
            vec!["test command exited with status 1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_shell_runner_rejects_empty_command() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShellTestRunner::new().run("   ", dir.path()).await.unwrap_err();
        assert!(matches!(err, TestRunnerError::InvalidCommand(_)));
    }

    #[tokio::test]
    async fn test_shell_runner_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShellTestRunner::new()
            .run("definitely-not-a-real-binary-xyz", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, TestRunnerError::Spawn { .. }));
    }
}
