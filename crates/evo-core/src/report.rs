//! Per-generation and per-run reports

use evo_archive::{VariantId, VariantStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Count of committed attempts per terminal status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Kept
    pub archived: usize,
    /// Evaluated or no-op, not kept
    pub discarded: usize,
    /// Patch did not apply
    pub failed_compile: usize,
    /// Time bound exceeded
    pub timed_out: usize,
    /// Adapter failure
    pub error: usize,
}

impl StatusCounts {
    /// Count one committed status; non-terminal statuses are ignored
    pub fn record(&mut self, status: VariantStatus) {
        match status {
            VariantStatus::Archived => self.archived += 1,
            VariantStatus::Discarded => self.discarded += 1,
            VariantStatus::FailedCompile => self.failed_compile += 1,
            VariantStatus::TimedOut => self.timed_out += 1,
            VariantStatus::Error => self.error += 1,
            VariantStatus::Pending
            | VariantStatus::EvaluatingShallow
            | VariantStatus::EvaluatingDeep => {}
        }
    }

    /// Count for one status
    #[must_use]
    pub fn get(&self, status: VariantStatus) -> usize {
        match status {
            VariantStatus::Archived => self.archived,
            VariantStatus::Discarded => self.discarded,
            VariantStatus::FailedCompile => self.failed_compile,
            VariantStatus::TimedOut => self.timed_out,
            VariantStatus::Error => self.error,
            VariantStatus::Pending
            | VariantStatus::EvaluatingShallow
            | VariantStatus::EvaluatingDeep => 0,
        }
    }

    /// Total committed
    #[must_use]
    pub fn total(&self) -> usize {
        self.archived + self.discarded + self.failed_compile + self.timed_out + self.error
    }
}

impl FromIterator<VariantStatus> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = VariantStatus>>(iter: I) -> Self {
        let mut counts = Self::default();
        for status in iter {
            counts.record(status);
        }
        counts
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for status in VariantStatus::TERMINAL {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "{status}={}", self.get(status))?;
        }
        Ok(())
    }
}

/// Outcome of one generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    /// Generation index
    pub generation: u32,
    /// Parent of each attempt, in launch order
    pub parents: Vec<VariantId>,
    /// Terminal status counts
    pub counts: StatusCounts,
    /// Ids committed, in commit order
    pub committed: Vec<VariantId>,
    /// Best final score among this generation's evaluated children
    pub best_score: Option<f64>,
    /// Wall-clock time for the generation
    pub elapsed: Duration,
}

/// Outcome of a whole run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Generations run by this call, in order
    pub generations: Vec<GenerationReport>,
    /// Whether the run ended early on a stop request
    pub stopped_by_signal: bool,
    /// Highest-scoring archived variant
    pub best_variant: Option<VariantId>,
    /// Its score
    pub best_score: Option<f64>,
}

impl RunReport {
    /// Status counts summed over all generations
    #[must_use]
    pub fn totals(&self) -> StatusCounts {
        let mut totals = StatusCounts::default();
        for report in &self.generations {
            totals.archived += report.counts.archived;
            totals.discarded += report.counts.discarded;
            totals.failed_compile += report.counts.failed_compile;
            totals.timed_out += report.counts.timed_out;
            totals.error += report.counts.error;
        }
        totals
    }
}
