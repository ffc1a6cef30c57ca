//! In-process audit sink.

use std::collections::HashMap;
use std::sync::Mutex;

use super::AuditSink;
use crate::error::AuditError;
use crate::record::{AttemptRecord, SessionSummary};

#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    attempts: Mutex<Vec<AttemptRecord>>,
    sessions: Mutex<HashMap<String, SessionSummary>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt rows for a session, in write order.
    pub fn attempts(&self, session_id: &str) -> Vec<AttemptRecord> {
        self.attempts
            .lock()
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.session_id == session_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn session(&self, session_id: &str) -> Option<SessionSummary> {
        self.sessions
            .lock()
            .ok()
            .and_then(|rows| rows.get(session_id).cloned())
    }
}

impl AuditSink for MemoryAuditSink {
    fn append_attempt(&self, record: &AttemptRecord) -> Result<(), AuditError> {
        self.attempts
            .lock()
            .map_err(|_| AuditError::LockPoisoned)?
            .push(record.clone());
        Ok(())
    }

    fn upsert_session(&self, summary: &SessionSummary) -> Result<(), AuditError> {
        self.sessions
            .lock()
            .map_err(|_| AuditError::LockPoisoned)?
            .insert(summary.session_id.clone(), summary.clone());
        Ok(())
    }
}
