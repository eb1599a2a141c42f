//! Builders for creating test data programmatically.

#![allow(dead_code)]

use enrichment::{EnrichmentJob, EnrichmentProgressEvent, JobStatus, ProcessorInfo};

/// Builder for `EnrichmentJob` snapshots.
pub struct JobBuilder {
    job: EnrichmentJob,
}

impl JobBuilder {
    /// A pending job on export `exp-1` with 10 rows.
    pub fn new(id: &str) -> Self {
        Self {
            job: EnrichmentJob {
                id: id.to_string(),
                export_id: "exp-1".to_string(),
                column_key: "headquarters".to_string(),
                column_name: "Headquarters".to_string(),
                prompt: "Where is the company headquartered?".to_string(),
                processor: Some("base".to_string()),
                status: JobStatus::Pending,
                total_rows: 10,
                completed_rows: 0,
                failed_rows: 0,
                taskgroup_id: None,
                error_message: None,
                created_at: None,
                started_at: None,
                completed_at: None,
                progress_percent: Some(0.0),
            },
        }
    }

    pub fn export(mut self, export_id: &str) -> Self {
        self.job.export_id = export_id.to_string();
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    /// Sets completed/total rows and the matching percentage.
    pub fn rows(mut self, completed: u64, total: u64) -> Self {
        self.job.completed_rows = completed;
        self.job.total_rows = total;
        self.job.progress_percent = Some(enrichment::model::percent_of(completed, total));
        self
    }

    pub fn error(mut self, message: &str) -> Self {
        self.job.error_message = Some(message.to_string());
        self
    }

    pub fn build(self) -> EnrichmentJob {
        self.job
    }
}

/// Progress event for job `job_id`.
pub fn event(job_id: &str, status: JobStatus, completed: u64, total: u64) -> EnrichmentProgressEvent {
    EnrichmentProgressEvent {
        job_id: job_id.to_string(),
        status,
        completed_rows: completed,
        total_rows: total,
        progress_percent: Some(enrichment::model::percent_of(completed, total)),
        current_row_id: None,
        current_result: None,
        error: None,
    }
}

pub fn processor(name: &str, cost: &str) -> ProcessorInfo {
    ProcessorInfo {
        name: name.to_string(),
        description: format!("{} research", name),
        relative_cost: cost.to_string(),
        recommended_for: "Company lookups".to_string(),
    }
}

/// The five tiers in catalog order.
pub fn catalog() -> Vec<ProcessorInfo> {
    vec![
        processor("lite", "$"),
        processor("base", "$$"),
        processor("core", "$$$"),
        processor("pro", "$$$$"),
        processor("ultra", "$$$$$"),
    ]
}
