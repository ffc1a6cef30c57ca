//! Audit Log — best-effort, append-only record of every attempt.
//!
//! Sinks may fail; [`AuditLog`] catches every failure, logs a warning, and
//! hands back an [`AuditReceipt`]. The receipt is `#[must_use]` so callers
//! have to acknowledge it, but nothing obliges them to act on a drop.
//!
//! # Sinks
//!
//! - [`JsonlAuditSink`]: two JSONL relations under a directory
//! - [`MemoryAuditSink`]: in-process, for embedding and tests

pub mod jsonl;
pub mod memory;
pub mod schema;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::AuditError;
use crate::record::{AttemptRecord, SessionSummary};

pub use jsonl::JsonlAuditSink;
pub use memory::MemoryAuditSink;

/// Persistence sink for attempt and session rows.
///
/// Implementations must be synchronous and must not block on contention;
/// return [`AuditError::Contention`] instead.
pub trait AuditSink: Send + Sync {
    fn append_attempt(&self, record: &AttemptRecord) -> Result<(), AuditError>;
    fn upsert_session(&self, summary: &SessionSummary) -> Result<(), AuditError>;
}

/// Result of one audit write.
#[must_use = "acknowledge the receipt; a dropped write never changes control flow"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditReceipt {
    Written,
    Dropped { reason: String },
}

impl AuditReceipt {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written)
    }

    /// Consume the receipt without acting on it.
    pub fn acknowledge(self) {}
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn append_attempt(&self, _record: &AttemptRecord) -> Result<(), AuditError> {
        Ok(())
    }

    fn upsert_session(&self, _summary: &SessionSummary) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Fire-and-forget front for an [`AuditSink`].
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NullAuditSink))
    }

    pub fn append(&self, record: &AttemptRecord) -> AuditReceipt {
        let key = schema::keys::attempt(&record.session_id, record.tier_index, record.attempt);
        match self.sink.append_attempt(record) {
            Ok(()) => {
                debug!(key = %key, "audit attempt written");
                AuditReceipt::Written
            }
            Err(e) => {
                warn!(key = %key, error = %e, "audit write failed; continuing without it");
                AuditReceipt::Dropped {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn upsert(&self, summary: &SessionSummary) -> AuditReceipt {
        let key = schema::keys::session(&summary.session_id);
        match self.sink.upsert_session(summary) {
            Ok(()) => {
                debug!(key = %key, outcome = ?summary.outcome, "audit session written");
                AuditReceipt::Written
            }
            Err(e) => {
                warn!(key = %key, error = %e, "audit session write failed; continuing without it");
                AuditReceipt::Dropped {
                    reason: e.to_string(),
                }
            }
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}
