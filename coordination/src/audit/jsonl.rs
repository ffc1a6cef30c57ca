//! JSONL-backed audit sink.
//!
//! Each relation is an append-only file. Session "upserts" append a fresh
//! row and readers keep the last row per session id, so nothing is ever
//! rewritten in place.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, TryLockError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::schema::{ATTEMPTS_FILE, SESSIONS_FILE};
use super::AuditSink;
use crate::error::AuditError;
use crate::record::{AttemptRecord, SessionSummary};

pub struct JsonlAuditSink {
    dir: PathBuf,
    attempts_lock: Mutex<()>,
    sessions_lock: Mutex<()>,
}

impl JsonlAuditSink {
    /// Open (creating if needed) an audit directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            attempts_lock: Mutex::new(()),
            sessions_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn relation_path(&self, relation: &str) -> PathBuf {
        self.dir.join(relation)
    }

    /// Append one row without ever waiting on another writer.
    fn append_row<T: Serialize>(
        &self,
        lock: &Mutex<()>,
        relation: &str,
        row: &T,
    ) -> Result<(), AuditError> {
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                return Err(AuditError::Contention(relation.to_string()))
            }
            Err(TryLockError::Poisoned(_)) => return Err(AuditError::LockPoisoned),
        };

        let line = serde_json::to_string(row)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.relation_path(relation))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Read every parseable row of a relation. Corrupt lines are skipped.
    fn read_rows<T: DeserializeOwned>(&self, relation: &str) -> Result<Vec<T>, AuditError> {
        let path = self.relation_path(relation);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut rows = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(row) => rows.push(row),
                Err(e) => warn!(
                    relation,
                    line = lineno + 1,
                    error = %e,
                    "skipping unreadable audit row"
                ),
            }
        }
        Ok(rows)
    }

    /// Attempt rows for a session, in write order.
    pub fn read_attempts(&self, session_id: &str) -> Result<Vec<AttemptRecord>, AuditError> {
        Ok(self
            .read_rows::<AttemptRecord>(ATTEMPTS_FILE)?
            .into_iter()
            .filter(|r| r.session_id == session_id)
            .collect())
    }

    /// Latest summary row for a session.
    pub fn read_summary(&self, session_id: &str) -> Result<Option<SessionSummary>, AuditError> {
        Ok(self
            .read_rows::<SessionSummary>(SESSIONS_FILE)?
            .into_iter()
            .rev()
            .find(|s| s.session_id == session_id))
    }

    /// Latest summary row of every session, oldest start first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, AuditError> {
        let mut latest: Vec<SessionSummary> = Vec::new();
        for row in self.read_rows::<SessionSummary>(SESSIONS_FILE)? {
            match latest.iter_mut().find(|s| s.session_id == row.session_id) {
                Some(existing) => *existing = row,
                None => latest.push(row),
            }
        }
        latest.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(latest)
    }
}

impl AuditSink for JsonlAuditSink {
    fn append_attempt(&self, record: &AttemptRecord) -> Result<(), AuditError> {
        self.append_row(&self.attempts_lock, ATTEMPTS_FILE, record)
    }

    fn upsert_session(&self, summary: &SessionSummary) -> Result<(), AuditError> {
        self.append_row(&self.sessions_lock, SESSIONS_FILE, summary)
    }
}
