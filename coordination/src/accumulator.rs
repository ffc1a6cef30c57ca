//! Failure Accumulator — attempt records → bounded escalation bundle.
//!
//! Pure and deterministic: the same record list always renders the same
//! text. One section per tier, oldest first. When over budget, whole
//! sections are dropped from the oldest end behind a `[truncated]` marker;
//! the most recent tier's section is always kept intact.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::circuit_breaker::normalize_signature;
use crate::record::AttemptRecord;

/// Default character budget for a bundle.
pub const DEFAULT_CHAR_BUDGET: usize = 4000;

/// Marker placed in front of the retained sections after truncation.
pub const TRUNCATION_MARKER: &str = "[truncated]";

/// Longest change / error excerpt kept on a synopsis line.
const MAX_EXCERPT_CHARS: usize = 160;

/// Errors quoted per synopsis line.
const ERRORS_PER_LINE: usize = 2;

/// Failure digest handed to the next tier. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationBundle {
    text: String,
    /// Tier names whose sections survived, oldest first.
    pub tiers_covered: Vec<String>,
    /// Sections dropped to fit the budget.
    pub dropped_sections: usize,
}

impl EscalationBundle {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn truncated(&self) -> bool {
        self.dropped_sections > 0
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Collapse whitespace and clip to `max` chars on a char boundary.
fn excerpt(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let clipped: String = flat.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", clipped.trim_end())
}

fn synopsis(record: &AttemptRecord) -> String {
    let change = excerpt(&record.change_description, MAX_EXCERPT_CHARS);
    let change = if change.is_empty() {
        "(no change)".to_string()
    } else {
        change.trim_end_matches('.').to_string()
    };

    let outcome = if record.passed() {
        "passed".to_string()
    } else {
        let errors: Vec<String> = record
            .error_messages
            .iter()
            .map(|e| excerpt(e, MAX_EXCERPT_CHARS))
            .filter(|e| !e.is_empty())
            .take(ERRORS_PER_LINE)
            .collect();
        if !errors.is_empty() {
            errors.join("; ")
        } else if !record.failing_tests.is_empty() {
            let tests: Vec<&str> = record
                .failing_tests
                .iter()
                .take(ERRORS_PER_LINE)
                .map(String::as_str)
                .collect();
            format!("{} failing: {}", record.verdict, tests.join(", "))
        } else {
            record.verdict.to_string()
        }
    };

    format!("attempt {}: {}. outcome: {}", record.attempt, change, outcome)
}

/// Render one tier's section. `records` all belong to the same tier.
fn render_section(tier_index: usize, tier_name: &str, records: &[&AttemptRecord]) -> String {
    let mut lines = vec![format!(
        "[tier {}: {}] {} attempt{}",
        tier_index + 1,
        tier_name,
        records.len(),
        if records.len() == 1 { "" } else { "s" }
    )];
    lines.extend(records.iter().map(|r| synopsis(r)));

    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for record in records {
        for message in &record.error_messages {
            let key = normalize_signature(message);
            if key.is_empty() || !seen.insert(key) {
                continue;
            }
            unique.push(excerpt(message, MAX_EXCERPT_CHARS));
        }
    }
    if !unique.is_empty() {
        lines.push("unique errors:".to_string());
        lines.extend(unique.into_iter().map(|e| format!("- {e}")));
    }

    lines.join("\n")
}

/// Build the bundle from every record produced so far.
///
/// Records are grouped by tier index in ladder order, and by attempt number
/// within a tier, so the input order does not affect the output.
pub fn build_bundle(records: &[AttemptRecord], char_budget: usize) -> EscalationBundle {
    let mut ordered: Vec<&AttemptRecord> = records.iter().collect();
    ordered.sort_by_key(|r| (r.tier_index, r.attempt));

    let mut sections: Vec<(String, String)> = Vec::new();
    for group in ordered.chunk_by(|a, b| a.tier_index == b.tier_index) {
        let first = group[0];
        sections.push((
            first.tier_name.clone(),
            render_section(first.tier_index, &first.tier_name, group),
        ));
    }

    if sections.is_empty() {
        return EscalationBundle {
            text: String::new(),
            tiers_covered: Vec::new(),
            dropped_sections: 0,
        };
    }

    let separator = "\n\n";
    let full_len = |secs: &[(String, String)], marker: bool| -> usize {
        let body: usize = secs.iter().map(|(_, s)| s.chars().count()).sum::<usize>()
            + separator.len() * secs.len().saturating_sub(1);
        if marker {
            body + TRUNCATION_MARKER.len() + 1
        } else {
            body
        }
    };

    let mut dropped = 0;
    while sections.len() - dropped > 1
        && full_len(&sections[dropped..], dropped > 0) > char_budget
    {
        dropped += 1;
    }

    let kept = &sections[dropped..];
    let body = kept
        .iter()
        .map(|(_, s)| s.as_str())
        .collect::<Vec<_>>()
        .join(separator);
    let text = if dropped > 0 {
        format!("{TRUNCATION_MARKER}\n{body}")
    } else {
        body
    };

    EscalationBundle {
        text,
        tiers_covered: kept.iter().map(|(name, _)| name.clone()).collect(),
        dropped_sections: dropped,
    }
}
