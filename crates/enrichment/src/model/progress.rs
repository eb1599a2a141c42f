//! Progress snapshots pushed over the job stream.

use serde::{Deserialize, Serialize};

use super::answer::EnrichmentAnswer;
use super::job::{clamp_percent, percent_of, JobStatus};

/// One pushed snapshot of a job's row processing. Consumed once, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentProgressEvent {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub completed_rows: u64,
    #[serde(default)]
    pub total_rows: u64,
    #[serde(default)]
    pub progress_percent: Option<f64>,
    /// Row currently being processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_row_id: Option<String>,
    /// Result just computed for `current_row_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnrichmentProgressEvent {
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn progress(&self) -> f64 {
        match self.progress_percent {
            Some(percent) => clamp_percent(percent),
            None => percent_of(self.completed_rows, self.total_rows),
        }
    }

    /// Structured view of `current_result`, if one came with the event.
    pub fn answer(&self) -> Option<EnrichmentAnswer> {
        self.current_result.as_deref().map(EnrichmentAnswer::parse_str)
    }
}
