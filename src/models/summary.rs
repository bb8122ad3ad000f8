use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Content that cannot be parsed or lacks required fields. Never retried.
    TerminalContent,
    /// A merge that would map one raw post to two master events.
    Integrity,
    /// Storage or service trouble with one post; retried on the next pass.
    Transient,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::TerminalContent => f.write_str("terminal-content"),
            FailureKind::Integrity => f.write_str("integrity"),
            FailureKind::Transient => f.write_str("transient"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineFailure {
    pub kind: FailureKind,
    pub raw_post_id: i64,
    pub source: String,
    pub master_event_id: Option<i64>,
    pub detail: String,
}

/// Outcome counts of one pipeline pass. Partial failure is normal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub fetched: usize,
    pub classified: usize,
    /// Posts left `contains-event` for a later pass.
    pub pending: usize,
    pub extracted: usize,
    pub merged: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub failures: Vec<PipelineFailure>,
}

impl RunSummary {
    pub fn record_failure(&mut self, failure: PipelineFailure) {
        self.failed += 1;
        self.failures.push(failure);
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fetched {}, classified {}, pending {}, extracted {}, merged {}, failed {}",
            self.fetched, self.classified, self.pending, self.extracted, self.merged, self.failed
        )?;
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}
