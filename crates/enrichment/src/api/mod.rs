//! Transport seam between the job client and the enrichment backend.

pub mod http;
pub mod sse;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::Result;
use crate::model::{CreateJobRequest, EnrichmentJob, ProcessorInfo};

pub use http::HttpEnrichmentApi;
pub use sse::SseDecoder;

/// Data payloads of a job's progress channel, in server-send order.
/// An `Err` item means the channel itself failed.
pub type ProgressStream = BoxStream<'static, Result<String>>;

pub const FALLBACK_LIST_PROCESSORS: &str = "Failed to fetch processors";
pub const FALLBACK_CREATE_JOB: &str = "Failed to create enrichment job";
pub const FALLBACK_GET_JOB: &str = "Failed to fetch enrichment job";
pub const FALLBACK_CANCEL_JOB: &str = "Failed to cancel enrichment job";
pub const FALLBACK_LIST_JOBS: &str = "Failed to list enrichment jobs";
pub const FALLBACK_OPEN_STREAM: &str = "Failed to open progress stream";

/// The endpoints under `/api/enrichment`.
#[async_trait]
pub trait EnrichmentApi: Send + Sync {
    /// `GET /processors`
    async fn list_processors(&self) -> Result<Vec<ProcessorInfo>>;

    /// `POST /jobs`. Starts work on the backend; callers must not retry.
    async fn create_job(&self, request: &CreateJobRequest) -> Result<EnrichmentJob>;

    /// `GET /jobs/{id}`
    async fn get_job(&self, job_id: &str) -> Result<EnrichmentJob>;

    /// `DELETE /jobs/{id}`
    async fn cancel_job(&self, job_id: &str) -> Result<()>;

    /// `GET /exports/{export_id}/jobs`, in backend order.
    async fn list_export_jobs(&self, export_id: &str) -> Result<Vec<EnrichmentJob>>;

    /// `GET /jobs/{id}/stream`
    async fn open_progress_stream(&self, job_id: &str) -> Result<ProgressStream>;
}
