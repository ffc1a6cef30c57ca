//! On-disk layout for the JSONL audit sink.
//!
//! Two append-only relations, both keyed by session id:
//! - `attempts.jsonl`: one [`AttemptRecord`](crate::record::AttemptRecord) per line
//! - `sessions.jsonl`: one [`SessionSummary`](crate::record::SessionSummary) per line;
//!   the last row for a session id wins

/// Attempt relation file name
pub const ATTEMPTS_FILE: &str = "attempts.jsonl";

/// Session relation file name
pub const SESSIONS_FILE: &str = "sessions.jsonl";

/// Row keys used for logging and lookups
pub mod keys {
    /// Key for an attempt row
    pub fn attempt(session_id: &str, tier_index: usize, attempt: u32) -> String {
        format!("attempt:{}:{}:{}", session_id, tier_index, attempt)
    }

    /// Key for a session row
    pub fn session(session_id: &str) -> String {
        format!("sess:{}", session_id)
    }
}
