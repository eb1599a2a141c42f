//! Wire types for the enrichment API.

pub mod answer;
pub mod job;
pub mod processor;
pub mod progress;

pub use answer::{Citation, EnrichmentAnswer};
pub use job::{percent_of, CreateJobRequest, EnrichmentJob, JobStatus, ProcessorTier, UnknownTier};
pub use processor::ProcessorInfo;
pub use progress::EnrichmentProgressEvent;
