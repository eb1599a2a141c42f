//! Enrichment job records as reported by the backend.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Status of an enrichment job.
///
/// `pending` and `running` are live; everything in [`JobStatus::TERMINAL`]
/// is final and never changes again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// The only list of terminal states. Add new terminal statuses here.
    pub const TERMINAL: [JobStatus; 3] =
        [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processor tier, ordered from cheapest/fastest to most thorough.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorTier {
    Lite,
    #[default]
    Base,
    Core,
    Pro,
    Ultra,
}

impl ProcessorTier {
    pub const ALL: [ProcessorTier; 5] = [
        ProcessorTier::Lite,
        ProcessorTier::Base,
        ProcessorTier::Core,
        ProcessorTier::Pro,
        ProcessorTier::Ultra,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorTier::Lite => "lite",
            ProcessorTier::Base => "base",
            ProcessorTier::Core => "core",
            ProcessorTier::Pro => "pro",
            ProcessorTier::Ultra => "ultra",
        }
    }
}

impl fmt::Display for ProcessorTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown processor tier '{0}' (expected one of: lite, base, core, pro, ultra)")]
pub struct UnknownTier(pub String);

impl FromStr for ProcessorTier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ProcessorTier::ALL
            .into_iter()
            .find(|tier| tier.as_str() == wanted)
            .ok_or_else(|| UnknownTier(s.to_string()))
    }
}

/// Request body for `POST /jobs`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreateJobRequest {
    pub export_id: String,
    pub column_name: String,
    pub prompt: String,
    /// Left out of the body when `None` so the backend picks its default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor: Option<ProcessorTier>,
}

impl CreateJobRequest {
    pub fn new(
        export_id: impl Into<String>,
        column_name: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            export_id: export_id.into(),
            column_name: column_name.into(),
            prompt: prompt.into(),
            processor: None,
        }
    }

    pub fn with_processor(mut self, processor: ProcessorTier) -> Self {
        self.processor = Some(processor);
        self
    }
}

/// One enrichment job: a prompt applied to one column of one export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentJob {
    pub id: String,
    pub export_id: String,
    pub column_key: String,
    pub column_name: String,
    pub prompt: String,
    /// Tier name as echoed by the backend.
    #[serde(default)]
    pub processor: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub total_rows: u64,
    #[serde(default)]
    pub completed_rows: u64,
    #[serde(default)]
    pub failed_rows: u64,
    /// External research task group, when the backend batches rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taskgroup_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
}

impl EnrichmentJob {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Percentage of rows completed, always within `[0, 100]`.
    pub fn progress(&self) -> f64 {
        match self.progress_percent {
            Some(percent) => clamp_percent(percent),
            None => percent_of(self.completed_rows, self.total_rows),
        }
    }

    /// Tier parsed from the echoed processor name, if it is a known tier.
    pub fn processor_tier(&self) -> Option<ProcessorTier> {
        self.processor.as_deref().and_then(|p| p.parse().ok())
    }
}

/// `completed / total * 100`, rounded to one decimal; `0` when nothing to do.
pub fn percent_of(completed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = completed as f64 / total as f64 * 100.0;
    clamp_percent((raw * 10.0).round() / 10.0)
}

pub(crate) fn clamp_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        return 0.0;
    }
    percent.clamp(0.0, 100.0)
}

/// Accepts RFC 3339 or the naive ISO-8601 form the backend emits (assumed UTC).
/// Anything unreadable becomes `None` rather than failing the whole record.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    match NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => Some(naive.and_utc()),
        Err(e) => {
            log::warn!("Ignoring unparsable job timestamp '{}': {}", s, e);
            None
        }
    }
}
