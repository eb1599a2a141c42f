//! Client for long-running AI enrichment jobs.
//!
//! An enrichment job applies a natural-language prompt to every row of an
//! export, producing a new column. This crate starts jobs, observes them by
//! polling and by a pushed progress stream, and cancels them.

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod observe;
pub mod secrets;
pub mod stream;
pub mod watch;

pub use api::{EnrichmentApi, HttpEnrichmentApi, ProgressStream};
pub use client::EnrichmentJobClient;
pub use config::{load_config, ClientConfig};
pub use error::{ConfigError, EnrichmentError, Result};
pub use model::{
    Citation, CreateJobRequest, EnrichmentAnswer, EnrichmentJob, EnrichmentProgressEvent,
    JobStatus, ProcessorInfo, ProcessorTier,
};
pub use observe::{JobLedger, Observation};
pub use stream::{ProgressCallbacks, ProgressListener, ProgressSubscription};
pub use watch::{ExportJobsWatch, JobWatch};
