//! Repair Coordination Library
//!
//! Control core of an autonomous code-repair loop: it drives external
//! generation/review agents against one objective, escalates through a
//! ladder of capability tiers when cheaper tiers fail, stops on budget or on
//! a repeating failure, and audits every attempt.
//!
//! # Components
//!
//! - [`budget`]: session-wide cost / duration / iteration ledger
//! - [`orchestrator`]: one attempt through GATHER → GENERATE → REVIEW → TEST → ADVERSARIAL
//! - [`circuit_breaker`]: aborts when one failure signature keeps repeating
//! - [`accumulator`]: bounded failure digest handed to the next tier
//! - [`engine`]: walks the tier ladder to a terminal outcome
//! - [`audit`]: best-effort, append-only attempt and session rows
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use repair_coordination::{config, AgentRoster, EscalationEngine, Session, ShellTestRunner};
//!
//! # async fn demo(roster: AgentRoster) -> anyhow::Result<()> {
//! let cfg = config::load_from_path("repair.toml")?;
//! let engine = EscalationEngine::new(roster, Arc::new(ShellTestRunner::new()), cfg.audit_log()?)
//!     .with_config(cfg.engine_config());
//! let session = Session::new("make tests pass", ".", "cargo test");
//! let report = engine.run(&session, &cfg.tiers, &mut cfg.budget()).await;
//! println!("{}", report.outcome);
//! # Ok(())
//! # }
//! ```

pub mod accumulator;
pub mod audit;
pub mod budget;
pub mod circuit_breaker;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod record;
pub mod telemetry;
pub mod tier;

pub use accumulator::{build_bundle, EscalationBundle};
pub use audit::{AuditLog, AuditReceipt, AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use budget::{Budget, ExhaustionReason};
pub use circuit_breaker::{BreakerConfig, BreakerTrip, CircuitBreaker};
pub use collaborators::{
    Agent, AgentOutput, AgentRequest, AgentRole, AgentRoster, ShellTestRunner, TestReport,
    TestRunner,
};
pub use config::LoopConfig;
pub use context::AttemptContext;
pub use engine::{
    EngineConfig, EscalationEngine, EscalationRecord, SessionReport, TierExit, TierReport,
};
pub use error::{AgentError, AuditError, ConfigError, LadderError, TestRunnerError};
pub use orchestrator::{AttemptOutcome, IterationOrchestrator};
pub use record::{
    AttemptRecord, Phase, Resolution, ReviewVerdict, Session, SessionOutcome, SessionSummary,
    TestVerdict,
};
pub use tier::{PipelineMode, TierDefinition, TierLadder, TierSpec};
