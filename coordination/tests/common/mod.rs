//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use repair_coordination::{
    Agent, AgentError, AgentOutput, AgentRequest, AgentRole, AgentRoster, AttemptContext,
    TestReport, TestRunner, TestRunnerError, TierSpec,
};

/// Words that survive signature normalisation as distinct failures.
const WORDS: [&str; 12] = [
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliet",
    "kilo", "lima",
];

/// One scripted agent response.
#[derive(Debug, Clone)]
pub enum Step {
    Reply { output: String, cost_usd: f64 },
    Fail { message: String, cost_usd: f64 },
}

impl Step {
    pub fn reply(output: &str, cost_usd: f64) -> Self {
        Self::Reply {
            output: output.to_string(),
            cost_usd,
        }
    }

    pub fn fail(message: &str) -> Self {
        Self::Fail {
            message: message.to_string(),
            cost_usd: 0.0,
        }
    }
}

/// Agent that replays a script, then repeats its fallback forever.
pub struct ScriptedAgent {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    delay: Option<Duration>,
    seen: Mutex<Vec<AttemptContext>>,
}

impl ScriptedAgent {
    pub fn new(script: Vec<Step>, fallback: Step) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            delay: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn always(output: &str, cost_usd: f64) -> Arc<Self> {
        Arc::new(Self::new(Vec::new(), Step::reply(output, cost_usd)))
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self::new(Vec::new(), Step::fail(message)))
    }

    /// Sleep on the tokio clock before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Contexts received, in call order.
    pub fn contexts(&self) -> Vec<AttemptContext> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn run(&self, request: AgentRequest<'_>) -> Result<AgentOutput, AgentError> {
        self.seen.lock().unwrap().push(request.context.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Reply { output, cost_usd } => Ok(AgentOutput::new(output, 100, cost_usd)),
            Step::Fail { message, cost_usd } => {
                Err(AgentError::new(request.role, message).with_spend(cost_usd, 0))
            }
        }
    }
}

/// Test runner that replays reports, then repeats its fallback.
pub struct ScriptedTestRunner {
    script: Mutex<VecDeque<Result<TestReport, String>>>,
    fallback: Result<TestReport, String>,
    calls: Mutex<usize>,
}

impl ScriptedTestRunner {
    pub fn new(
        script: Vec<Result<TestReport, String>>,
        fallback: Result<TestReport, String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(0),
        })
    }

    /// `failures` distinct failing reports followed by a pass.
    pub fn passes_after(failures: usize) -> Arc<Self> {
        let script = (0..failures).map(|i| Ok(distinct_failure(i))).collect();
        Self::new(script, Ok(TestReport::passed()))
    }

    /// Every run fails, each with a different signature.
    pub fn distinct_failures() -> Arc<Self> {
        let script = (0..WORDS.len()).map(|i| Ok(distinct_failure(i))).collect();
        Self::new(script, Ok(distinct_failure(0)))
    }

    /// Every run fails with the same message.
    pub fn same_failure(message: &str) -> Arc<Self> {
        Self::new(
            Vec::new(),
            Ok(TestReport::failed(vec!["suite::case".into()], vec![message.to_string()])),
        )
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl TestRunner for ScriptedTestRunner {
    async fn run(
        &self,
        _command: &str,
        _working_dir: &Path,
    ) -> Result<TestReport, TestRunnerError> {
        *self.calls.lock().unwrap() += 1;
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        next.map_err(TestRunnerError::Other)
    }
}

pub fn distinct_failure(i: usize) -> TestReport {
    let word = WORDS[i % WORDS.len()];
    TestReport::failed(
        vec![format!("suite::{word}")],
        vec![format!("assertion failed in {word} case")],
    )
}

pub fn restricted_tier(name: &str, cap: i64) -> TierSpec {
    TierSpec::new(name, "restricted", cap).with_model(AgentRole::Generate, "small-coder")
}

pub fn full_tier(name: &str, cap: i64) -> TierSpec {
    TierSpec::new(name, "full", cap)
        .with_model(AgentRole::Gather, "scout")
        .with_model(AgentRole::Generate, "big-coder")
        .with_model(AgentRole::Review, "critic")
}

/// The same agent behind every role.
pub fn roster_of(agent: Arc<ScriptedAgent>) -> AgentRoster {
    AgentRole::ALL
        .into_iter()
        .fold(AgentRoster::new(), |roster, role| {
            roster.with_agent(role, agent.clone())
        })
}
